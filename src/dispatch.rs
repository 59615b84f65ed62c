//! The batched concurrent dispatch engine: resolves a batch of [`Call`]s
//! against the routing table, fans them out to the RPC client under a
//! shared deadline, and assembles the per-call [`Response`] map.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::warn;

use crate::error::{GatewayError, ERR_NAMESPACE};
use crate::routing::RoutingTable;
use crate::rpc::{CallMetadata, RpcClient, RpcError};
use crate::types::{ApiRequests, Call, Response};

/// Parses `X-Api-Call-Timeout`. Absent, empty, or non-integer values fall
/// back to `default_ms` (the configured `dispatch.default_call_timeout_ms`)
/// silently — never an error.
pub fn resolve_deadline_ms(header_value: Option<&str>, default_ms: u64) -> u64 {
    header_value
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default_ms)
}

/// Builds the outbound RPC metadata: a whitelisted subset of inbound
/// headers plus the gateway's own synthesized entries. `headers` is
/// expected to use lower-cased keys (as produced by the HTTP layer).
pub fn build_call_metadata(
    headers: &HashMap<String, String>,
    forwarded_headers: &[String],
    client_ip: &str,
    cookies: &[String],
    deadline_ms: u64,
) -> CallMetadata {
    let mut metadata = CallMetadata::new();

    for name in forwarded_headers {
        if let Some(value) = headers.get(&name.to_ascii_lowercase()) {
            metadata.insert(name.clone(), value.clone());
        }
    }

    if let Some(content_type) = headers.get("content-type") {
        let stripped = content_type.split(';').next().unwrap_or(content_type).trim();
        metadata.insert("Content-Type".to_string(), stripped.to_string());
    }
    metadata.insert("Client-IP".to_string(), client_ip.to_string());
    metadata.insert(
        "Cookies".to_string(),
        serde_json::to_string(cookies).unwrap_or_else(|_| "[]".to_string()),
    );
    if let Some(user_agent) = headers.get("user-agent") {
        metadata.insert("User-Agent".to_string(), user_agent.clone());
    }
    if let Some(request_id) = headers.get("x-request-id") {
        metadata.insert("Request-Id".to_string(), request_id.clone());
    }
    metadata.insert("Timeout".to_string(), deadline_ms.to_string());

    metadata
}

/// Resolves every call in the batch against the routing table. All-or-
/// nothing: the first unresolvable call fails the whole batch.
fn preflight(batch: &ApiRequests, table: &RoutingTable) -> Result<(), GatewayError> {
    for call in &batch.calls {
        if table.lookup(&call.api, &call.version).is_none() {
            return Err(GatewayError::BadRequest(format!(
                "api not exist, {}:{}",
                call.api, call.version
            )));
        }
    }
    Ok(())
}

/// Dispatches a pre-parsed batch concurrently and returns one [`Response`]
/// per call, keyed by [`Call::response_key`]. Never fails partially — a
/// batch-level error (unroutable call) is returned as `Err` before any RPC
/// is issued; once dispatch starts every call is guaranteed a response,
/// synthesized if necessary.
pub async fn dispatch(
    batch: ApiRequests,
    table: Arc<RoutingTable>,
    rpc: Arc<dyn RpcClient>,
    metadata: CallMetadata,
    deadline_ms: u64,
) -> Result<HashMap<String, Response>, GatewayError> {
    preflight(&batch, &table)?;

    let n = batch.calls.len();
    let (tx, mut rx) = mpsc::channel::<Response>(n.max(1));

    for call in &batch.calls {
        let call = call.clone();
        let table = table.clone();
        let rpc = rpc.clone();
        let metadata = metadata.clone();
        let tx = tx.clone();

        tokio::spawn(async move {
            let response = run_one_call(&call, &table, rpc.as_ref(), &metadata).await;
            let _ = tx.try_send(response);
        });
    }
    drop(tx);

    let mut responses = HashMap::with_capacity(n);
    let deadline = tokio::time::sleep(Duration::from_millis(deadline_ms));
    tokio::pin!(deadline);
    let mut timed_out = false;

    for _ in 0..n {
        tokio::select! {
            received = rx.recv() => {
                match received {
                    Some(response) => {
                        let key = response_key(&response);
                        responses.insert(key, response);
                    }
                    None => break,
                }
            }
            _ = &mut deadline => {
                timed_out = true;
                break;
            }
        }
    }

    for call in &batch.calls {
        let key = call.response_key();
        if !responses.contains_key(&key) {
            let response = if timed_out {
                placeholder(call, GatewayError::RequestTimeout)
            } else {
                placeholder(
                    call,
                    GatewayError::InternalServerError("response did not received".to_string()),
                )
            };
            responses.insert(key, response);
        }
    }

    Ok(responses)
}

fn response_key(response: &Response) -> String {
    if response.explicit {
        format!("{}:{}", response.api, response.version)
    } else {
        response.api.clone()
    }
}

fn placeholder(call: &Call, err: GatewayError) -> Response {
    Response {
        api: call.api.clone(),
        version: call.version.clone(),
        explicit: call.explicit,
        code: err.code(),
        message: err.to_string(),
        err_id: err.err_id().to_string(),
        err_namespace: ERR_NAMESPACE.to_string(),
        result: None,
    }
}

async fn run_one_call(
    call: &Call,
    table: &RoutingTable,
    rpc: &dyn RpcClient,
    metadata: &CallMetadata,
) -> Response {
    let endpoint = match table.lookup(&call.api, &call.version) {
        Some(endpoint) => endpoint,
        None => {
            return placeholder(
                call,
                GatewayError::BadRequest("api not exist".to_string()),
            )
        }
    };

    match rpc
        .call(&endpoint.service, &endpoint.method, metadata, call.payload.clone())
        .await
    {
        Ok(result) => Response {
            api: call.api.clone(),
            version: call.version.clone(),
            explicit: call.explicit,
            result: Some(result),
            ..Default::default()
        },
        Err(err) => from_rpc_error(call, err),
    }
}

/// Classifies an [`RpcError`] per the envelope rules: a structured error
/// carries its own code/id/namespace through; an unstructured one is tried
/// as a JSON-encoded `{code,id,namespace,message}` object before falling
/// back to a generic 500.
fn from_rpc_error(call: &Call, err: RpcError) -> Response {
    match err {
        RpcError::Structured {
            code,
            id,
            namespace,
            message,
            detail,
        } => {
            if let Some(detail) = &detail {
                warn!(detail = %detail, "rpc call failed with structured error");
            }
            Response {
                api: call.api.clone(),
                version: call.version.clone(),
                explicit: call.explicit,
                code,
                message,
                err_id: id,
                err_namespace: namespace,
                result: None,
            }
        }
        RpcError::Other(text) => {
            if let Some(parsed) = parse_error_envelope(&text) {
                Response {
                    api: call.api.clone(),
                    version: call.version.clone(),
                    explicit: call.explicit,
                    ..parsed
                }
            } else {
                placeholder(call, GatewayError::InternalServerError(text))
            }
        }
    }
}

/// Attempts to read `text` as a JSON object carrying `{code,id,namespace,
/// message}`; returns `None` unless all three non-message fields are
/// present and `code > 0`.
fn parse_error_envelope(text: &str) -> Option<Response> {
    let value: Value = serde_json::from_str(text).ok()?;
    let obj = value.as_object()?;
    let code = obj.get("code")?.as_u64()?;
    let id = obj.get("id")?.as_str()?.to_string();
    let namespace = obj.get("namespace")?.as_str()?.to_string();
    if code == 0 || id.is_empty() || namespace.is_empty() {
        return None;
    }
    let message = obj
        .get("message")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    Some(Response {
        code,
        message,
        err_id: id,
        err_namespace: namespace,
        result: None,
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::InMemoryRpcClient;
    use crate::types::{Action, Event, Node, ServiceEndpoint, ServiceRecord};
    use serde_json::json;
    use std::collections::HashMap as Map;

    fn table_with(entries: &[(&str, &str, &str, &str)]) -> Arc<RoutingTable> {
        let table = RoutingTable::new();
        for (api, version, service, method) in entries {
            let mut metadata = Map::new();
            metadata.insert("post_api".to_string(), api.to_string());
            metadata.insert("post_api_ver".to_string(), version.to_string());
            table.apply(&Event {
                action: Action::Create,
                service: ServiceRecord {
                    name: service.to_string(),
                    nodes: vec![Node {
                        id: "n1".to_string(),
                        address: "127.0.0.1:1".to_string(),
                    }],
                    endpoints: vec![ServiceEndpoint {
                        name: method.to_string(),
                        metadata,
                    }],
                },
            });
        }
        Arc::new(table)
    }

    fn call(api: &str, version: &str, explicit: bool) -> Call {
        Call {
            api: api.to_string(),
            version: version.to_string(),
            explicit,
            payload: json!({}),
        }
    }

    #[tokio::test]
    async fn happy_path_single_call() {
        let table = table_with(&[("user.login", "v1", "svc.user", "Login")]);
        let rpc: Arc<dyn RpcClient> = Arc::new(
            InMemoryRpcClient::new().with_reply("svc.user", "Login", json!({"ok": true})),
        );
        let batch = ApiRequests {
            calls: vec![call("user.login", "v1", false)],
            is_multi_call: false,
            major_version: "v1".to_string(),
        };

        let responses = dispatch(batch, table, rpc, CallMetadata::new(), 1000)
            .await
            .unwrap();
        let response = &responses["user.login"];
        assert_eq!(response.code, 0);
        assert_eq!(response.result, Some(json!({"ok": true})));
    }

    #[tokio::test]
    async fn unresolvable_call_rejects_whole_batch() {
        let table = table_with(&[("a", "v1", "svc.a", "Do")]);
        let rpc: Arc<dyn RpcClient> = Arc::new(InMemoryRpcClient::new());
        let batch = ApiRequests {
            calls: vec![call("a", "v1", false), call("ghost", "v1", true)],
            is_multi_call: true,
            major_version: "v1".to_string(),
        };

        let err = dispatch(batch, table, rpc, CallMetadata::new(), 1000)
            .await
            .unwrap_err();
        match err {
            GatewayError::BadRequest(message) => {
                assert!(message.contains("ghost:v1"));
            }
            other => panic!("expected BadRequest, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn slow_call_times_out_fast_call_succeeds() {
        let table = table_with(&[
            ("fast", "v1", "svc.fast", "Do"),
            ("slow", "v1", "svc.slow", "Do"),
        ]);
        let rpc: Arc<dyn RpcClient> = Arc::new(
            InMemoryRpcClient::new()
                .with_reply("svc.fast", "Do", json!({"ok": 1}))
                .with_delayed_reply(
                    "svc.slow",
                    "Do",
                    json!({"ok": 2}),
                    Duration::from_millis(500),
                ),
        );
        let batch = ApiRequests {
            calls: vec![call("fast", "v1", false), call("slow", "v1", false)],
            is_multi_call: true,
            major_version: "v1".to_string(),
        };

        let responses = dispatch(batch, table, rpc, CallMetadata::new(), 50)
            .await
            .unwrap();
        assert_eq!(responses["fast"].code, 0);
        assert_eq!(responses["slow"].code, 408);
        assert_eq!(responses["slow"].err_namespace, ERR_NAMESPACE);
    }

    #[tokio::test]
    async fn structured_upstream_error_is_wrapped() {
        let table = table_with(&[("a", "v1", "svc.a", "Do")]);
        let rpc: Arc<dyn RpcClient> = Arc::new(InMemoryRpcClient::new().with_structured_error(
            "svc.a",
            "Do",
            42001,
            "X",
            "AUTH",
            "denied",
        ));
        let batch = ApiRequests {
            calls: vec![call("a", "v1", false)],
            is_multi_call: false,
            major_version: "v1".to_string(),
        };

        let responses = dispatch(batch, table, rpc, CallMetadata::new(), 1000)
            .await
            .unwrap();
        let response = &responses["a"];
        assert_eq!(response.code, 42001);
        assert_eq!(response.err_id, "X");
        assert_eq!(response.err_namespace, "AUTH");
        assert_eq!(response.message, "denied");
    }

    #[test]
    fn deadline_falls_back_to_default_on_garbage_header() {
        assert_eq!(resolve_deadline_ms(None, 30_000), 30_000);
        assert_eq!(resolve_deadline_ms(Some(""), 30_000), 30_000);
        assert_eq!(resolve_deadline_ms(Some("not a number"), 30_000), 30_000);
        assert_eq!(resolve_deadline_ms(Some(" 50 "), 30_000), 50);
    }
}
