//! The watch loop: a single background task that owns the registry stream
//! and is the routing table's sole writer. Mirrors the teacher's pattern of
//! racing a long-lived background task against a shutdown signal in
//! `tokio::select!` (see `main.rs`'s `run` function).

use std::sync::Arc;

use tokio_stream::StreamExt;
use tracing::{debug, error, info};

use crate::registry::Registry;
use crate::routing::RoutingTable;

/// Subscribes to the registry and folds every event into `table` until the
/// stream ends, errors out, or `shutdown` fires. A registry stream error is
/// treated as fatal for the loop — the routing table simply stops changing
/// and continues serving whatever it last held, rather than the process
/// crashing or flapping into a retry storm the watch loop doesn't manage.
pub async fn run(
    registry: Arc<dyn Registry>,
    table: Arc<RoutingTable>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let mut stream = registry.watch().await?;
    info!("registry watch loop started");

    loop {
        tokio::select! {
            next = stream.next() => {
                match next {
                    Some(Ok(event)) => {
                        debug!(service = %event.service.name, action = ?event.action, "applying registry event");
                        table.apply(&event);
                    }
                    Some(Err(err)) => {
                        error!(error = %err, "registry watch stream reported an error, stopping watch loop");
                        return Err(err);
                    }
                    None => {
                        info!("registry watch stream closed");
                        return Ok(());
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("watch loop shutting down");
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::InMemoryRegistry;
    use crate::types::{Action, Event, Node, ServiceEndpoint, ServiceRecord};
    use std::collections::HashMap;

    fn endpoint(name: &str, api: &str, version: &str) -> ServiceEndpoint {
        let mut metadata = HashMap::new();
        metadata.insert("post_api".to_string(), api.to_string());
        metadata.insert("post_api_ver".to_string(), version.to_string());
        ServiceEndpoint {
            name: name.to_string(),
            metadata,
        }
    }

    #[tokio::test]
    async fn applies_events_until_shutdown() {
        let (registry, handle) = InMemoryRegistry::new();
        let table = Arc::new(RoutingTable::new());
        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

        let registry: Arc<dyn Registry> = Arc::new(registry);
        let table_clone = table.clone();
        let join = tokio::spawn(async move { run(registry, table_clone, shutdown_rx).await });

        handle
            .push(Event {
                action: Action::Create,
                service: ServiceRecord {
                    name: "svc.user".to_string(),
                    nodes: vec![Node {
                        id: "n1".to_string(),
                        address: "127.0.0.1:1".to_string(),
                    }],
                    endpoints: vec![endpoint("Login", "user.login", "v1")],
                },
            })
            .await;

        // Give the spawned task a turn to process the event before asserting.
        tokio::task::yield_now().await;
        for _ in 0..50 {
            if table.lookup("user.login", "v1").is_some() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert!(table.lookup("user.login", "v1").is_some());

        shutdown_tx.send(true).unwrap();
        join.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn stream_error_stops_the_loop() {
        let (registry, handle) = InMemoryRegistry::new();
        let table = Arc::new(RoutingTable::new());
        let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

        let registry: Arc<dyn Registry> = Arc::new(registry);
        handle.push_error(anyhow::anyhow!("connection reset")).await;

        let result = run(registry, table, shutdown_rx).await;
        assert!(result.is_err());
    }
}
