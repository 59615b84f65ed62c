//! The RPC transport boundary. The gateway only needs one operation:
//! invoke `(service, method)` with a JSON payload and either get JSON back
//! or a classifiable error. Retries, load balancing and connection pooling
//! are the RPC client's problem, not the gateway's (see spec non-goals).

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

/// The structured shape an upstream RPC error can arrive in — either as a
/// typed [`RpcError::Structured`] from a well-behaved client, or as free text
/// that may or may not parse as a JSON object with the same fields.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("{message}")]
    Structured {
        code: u64,
        id: String,
        namespace: String,
        message: String,
        /// Extra context preserved from the wrapped error, surfaced in logs
        /// rather than dropped on the floor.
        detail: Option<String>,
    },
    #[error("{0}")]
    Other(String),
}

/// Per-call outbound metadata: a whitelisted subset of inbound headers plus
/// the gateway's synthesized ones (`Content-Type`, `Client-IP`, ...). See
/// `dispatch::build_call_metadata`.
pub type CallMetadata = HashMap<String, String>;

#[async_trait]
pub trait RpcClient: Send + Sync {
    async fn call(
        &self,
        service: &str,
        method: &str,
        metadata: &CallMetadata,
        payload: Value,
    ) -> Result<Value, RpcError>;
}

/// An in-process RPC double for tests: a fixed table of canned responses (or
/// errors), optionally with an artificial delay to exercise the dispatch
/// engine's deadline handling.
pub struct InMemoryRpcClient {
    handlers: std::collections::HashMap<(String, String), Handler>,
}

enum Handler {
    Reply(Value, Option<std::time::Duration>),
    Fail(RpcErrorTemplate),
}

#[derive(Clone)]
enum RpcErrorTemplate {
    Structured {
        code: u64,
        id: String,
        namespace: String,
        message: String,
    },
    Other(String),
}

impl InMemoryRpcClient {
    pub fn new() -> Self {
        InMemoryRpcClient {
            handlers: std::collections::HashMap::new(),
        }
    }

    pub fn with_reply(mut self, service: &str, method: &str, reply: Value) -> Self {
        self.handlers.insert(
            (service.to_string(), method.to_string()),
            Handler::Reply(reply, None),
        );
        self
    }

    pub fn with_delayed_reply(
        mut self,
        service: &str,
        method: &str,
        reply: Value,
        delay: std::time::Duration,
    ) -> Self {
        self.handlers.insert(
            (service.to_string(), method.to_string()),
            Handler::Reply(reply, Some(delay)),
        );
        self
    }

    pub fn with_structured_error(
        mut self,
        service: &str,
        method: &str,
        code: u64,
        id: &str,
        namespace: &str,
        message: &str,
    ) -> Self {
        self.handlers.insert(
            (service.to_string(), method.to_string()),
            Handler::Fail(RpcErrorTemplate::Structured {
                code,
                id: id.to_string(),
                namespace: namespace.to_string(),
                message: message.to_string(),
            }),
        );
        self
    }
}

impl Default for InMemoryRpcClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RpcClient for InMemoryRpcClient {
    async fn call(
        &self,
        service: &str,
        method: &str,
        _metadata: &CallMetadata,
        _payload: Value,
    ) -> Result<Value, RpcError> {
        match self.handlers.get(&(service.to_string(), method.to_string())) {
            Some(Handler::Reply(value, delay)) => {
                if let Some(delay) = delay {
                    tokio::time::sleep(*delay).await;
                }
                Ok(value.clone())
            }
            Some(Handler::Fail(RpcErrorTemplate::Structured {
                code,
                id,
                namespace,
                message,
            })) => Err(RpcError::Structured {
                code: *code,
                id: id.clone(),
                namespace: namespace.clone(),
                message: message.clone(),
                detail: None,
            }),
            Some(Handler::Fail(RpcErrorTemplate::Other(message))) => {
                Err(RpcError::Other(message.clone()))
            }
            None => Err(RpcError::Other(format!(
                "no handler registered for {}.{}",
                service, method
            ))),
        }
    }
}
