//! The service registry boundary: a `Registry` watches for service
//! create/update/delete events and the gateway folds them into the routing
//! table. The real backend (Consul, etcd, a go-micro-style registry, ...) is
//! out of scope for this crate; what's specified is the trait boundary and
//! an in-memory double used by the integration tests, mirroring the way the
//! teacher's `EventListener` hands the rest of the service a `Stream` of
//! decoded SSE data rather than a raw connection.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::Stream;

use crate::types::Event;

/// A stream of registry events, terminated by the registry closing its side
/// or by the gateway dropping the stream on shutdown.
pub type WatchStream = std::pin::Pin<Box<dyn Stream<Item = anyhow::Result<Event>> + Send>>;

#[async_trait]
pub trait Registry: Send + Sync {
    async fn watch(&self) -> anyhow::Result<WatchStream>;
}

/// An in-process registry double driven by a channel, used by integration
/// tests and examples in place of a real Consul/etcd backend.
pub struct InMemoryRegistry {
    sender: mpsc::Sender<anyhow::Result<Event>>,
    receiver: tokio::sync::Mutex<Option<mpsc::Receiver<anyhow::Result<Event>>>>,
}

impl InMemoryRegistry {
    pub fn new() -> (Self, InMemoryRegistryHandle) {
        let (tx, rx) = mpsc::channel(128);
        let handle = InMemoryRegistryHandle { sender: tx.clone() };
        (
            InMemoryRegistry {
                sender: tx,
                receiver: tokio::sync::Mutex::new(Some(rx)),
            },
            handle,
        )
    }
}

/// A clonable handle test code uses to push events into an [`InMemoryRegistry`].
#[derive(Clone)]
pub struct InMemoryRegistryHandle {
    sender: mpsc::Sender<anyhow::Result<Event>>,
}

impl InMemoryRegistryHandle {
    pub async fn push(&self, event: Event) {
        let _ = self.sender.send(Ok(event)).await;
    }

    pub async fn push_error(&self, error: anyhow::Error) {
        let _ = self.sender.send(Err(error)).await;
    }
}

#[async_trait]
impl Registry for InMemoryRegistry {
    async fn watch(&self) -> anyhow::Result<WatchStream> {
        let rx = self
            .receiver
            .lock()
            .await
            .take()
            .ok_or_else(|| anyhow::anyhow!("InMemoryRegistry::watch called more than once"))?;
        let _ = &self.sender;
        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}
