//! The top-level object wiring the routing table, registry, RPC client and
//! broker together and driving both the watch loop and the HTTP server.
//! Mirrors the teacher's `main.rs` `run()` function, which races a spawned
//! REST server against a background task with `tokio::select!`.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use crate::broker::Broker;
use crate::config::Config;
use crate::registry::Registry;
use crate::routing::RoutingTable;
use crate::rpc::RpcClient;
use crate::{server, watch};

/// Everything a running gateway needs, shared behind `Arc` with the per-
/// request handlers and the watch loop.
pub struct Gateway {
    pub config: Config,
    pub table: Arc<RoutingTable>,
    pub registry: Arc<dyn Registry>,
    pub rpc: Arc<dyn RpcClient>,
    pub broker: Arc<dyn Broker>,
}

impl Gateway {
    pub fn new(
        config: Config,
        registry: Arc<dyn Registry>,
        rpc: Arc<dyn RpcClient>,
        broker: Arc<dyn Broker>,
    ) -> Arc<Self> {
        Arc::new(Gateway {
            config,
            table: Arc::new(RoutingTable::new()),
            registry,
            rpc,
            broker,
        })
    }

    /// Starts the watch loop and the HTTP server and runs until `shutdown`
    /// fires or either task exits (an exit of either is treated as fatal,
    /// matching the teacher's `tokio::select!` race in `main.rs`).
    pub async fn run(
        self: Arc<Self>,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        let addr: SocketAddr = self
            .config
            .server
            .bind_address
            .parse()
            .context("Error parsing server bind address")?;

        let routes = server::routes(self.clone());
        let cert_path = self.config.server.tls_cert_file.clone();
        let key_path = self.config.server.tls_key_file.clone();

        let server_task = if !cert_path.is_empty() && !key_path.is_empty() {
            info!(%addr, "gateway listening (tls)");
            let (_, http_server) = warp::serve(routes)
                .tls()
                .cert_path(&cert_path)
                .key_path(&key_path)
                .bind_with_graceful_shutdown(addr, {
                    let mut shutdown = shutdown.clone();
                    async move {
                        let _ = shutdown.changed().await;
                    }
                });
            tokio::spawn(http_server)
        } else {
            info!(%addr, "gateway listening");
            let (_, http_server) = warp::serve(routes).bind_with_graceful_shutdown(addr, {
                let mut shutdown = shutdown.clone();
                async move {
                    let _ = shutdown.changed().await;
                }
            });
            tokio::spawn(http_server)
        };

        let watch_table = self.table.clone();
        let watch_registry = self.registry.clone();
        let watch_shutdown = shutdown.clone();
        let watch_task = tokio::spawn(watch::run(watch_registry, watch_table, watch_shutdown));

        tokio::select! {
            result = watch_task => {
                result.context("watch loop task panicked")?.context("watch loop failed")?;
            }
            result = server_task => {
                result.context("http server task panicked")?;
            }
            _ = shutdown.changed() => {
                info!("shutdown signal received");
            }
        }

        Ok(())
    }
}
