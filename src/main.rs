//! Entrypoint: parse CLI args, load config, wire up the gateway's
//! collaborators and run it. Split from `run()` for the same reason the
//! teacher splits `main()` from its background processing so integration
//! tests can call `run` directly against a test config.

use std::sync::Arc;

use anyhow::{Context, Error};
use clap::Parser;

use post_api_gateway::broker::FailingBroker;
use post_api_gateway::config::{read_config, Config};
use post_api_gateway::gateway::Gateway;
use post_api_gateway::registry::{self, Registry};
use post_api_gateway::rpc::{self, RpcClient};

const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Parser, Debug)]
#[command(author, version, about = "post-api gateway")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let config = read_config(&args.config).context("Error loading configuration")?;

    run(config).await
}

/// Wires a real registry/RPC client/broker (placeholders until a backend is
/// selected — see [`registry::Registry`], [`rpc::RpcClient`]) and runs the
/// gateway until shutdown.
async fn run(config: Config) -> Result<(), Error> {
    let registry: Arc<dyn Registry> = unconfigured_registry();
    let rpc: Arc<dyn RpcClient> = unconfigured_rpc_client();
    let broker = Arc::new(FailingBroker);

    let gateway = Gateway::new(config, registry, rpc, broker);
    let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    gateway
        .run(shutdown_rx)
        .await
        .context("gateway exited with an error")
}

/// No production registry backend is specified by the contract this crate
/// implements; operators plug one in by implementing [`Registry`] and
/// swapping it in here.
fn unconfigured_registry() -> Arc<dyn Registry> {
    let (registry, _handle) = registry::InMemoryRegistry::new();
    Arc::new(registry)
}

/// Same caveat as [`unconfigured_registry`]: no production RPC transport is
/// specified, so the binary ships wired to the in-memory double.
fn unconfigured_rpc_client() -> Arc<dyn RpcClient> {
    Arc::new(rpc::InMemoryRpcClient::new())
}
