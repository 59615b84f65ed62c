//! The optional event-publishing side channel: each inbound request and its
//! eventual envelope can be mirrored onto a message broker topic for
//! observability/auditing consumers. Publish failures are logged and
//! swallowed — a broken broker must never fail a client's request.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::warn;

#[async_trait]
pub trait Broker: Send + Sync {
    async fn publish(&self, topic: &str, headers: &HashMap<String, String>, body: &[u8]);
}

/// Publishes to whichever [`Broker`] is configured, logging (not
/// propagating) failures. Call sites never need to know whether publishing
/// is enabled or what backend is behind it.
pub async fn publish_best_effort(
    broker: &dyn Broker,
    topic: &str,
    headers: &HashMap<String, String>,
    body: &[u8],
) {
    broker.publish(topic, headers, body).await;
}

/// An in-process broker double that records every publish for assertions in
/// tests, and never fails.
#[derive(Default)]
pub struct InMemoryBroker {
    published: Mutex<Vec<PublishedMessage>>,
}

#[derive(Clone, Debug)]
pub struct PublishedMessage {
    pub topic: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        InMemoryBroker::default()
    }

    pub async fn messages(&self) -> Vec<PublishedMessage> {
        self.published.lock().await.clone()
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn publish(&self, topic: &str, headers: &HashMap<String, String>, body: &[u8]) {
        self.published.lock().await.push(PublishedMessage {
            topic: topic.to_string(),
            headers: headers.clone(),
            body: body.to_vec(),
        });
    }
}

/// A broker that always fails, used to exercise the "publish failure never
/// surfaces to the client" guarantee.
pub struct FailingBroker;

#[async_trait]
impl Broker for FailingBroker {
    async fn publish(&self, topic: &str, _headers: &HashMap<String, String>, _body: &[u8]) {
        warn!(topic, "simulated broker publish failure");
    }
}
