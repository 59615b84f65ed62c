//! End-to-end tests: each spins up a real `Gateway` (real HTTP listener,
//! real watch loop) against in-memory registry/RPC/broker doubles and
//! drives it with `reqwest`, mirroring the teacher's
//! `should_respond_to_rest_query`-style integration tests in `main.rs`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use post_api_gateway::broker::InMemoryBroker;
use post_api_gateway::config::Config;
use post_api_gateway::gateway::Gateway;
use post_api_gateway::registry::{InMemoryRegistry, Registry};
use post_api_gateway::rpc::{InMemoryRpcClient, RpcClient};
use post_api_gateway::types::{Action, Event, Node, ServiceEndpoint, ServiceRecord};
use serde_json::json;

fn test_config(port: u16) -> Config {
    let mut config = Config::default();
    config.server.bind_address = format!("127.0.0.1:{port}");
    config.server.base_path = "/api".to_string();
    config
}

fn endpoint(name: &str, api: &str, version: &str) -> ServiceEndpoint {
    let mut metadata = HashMap::new();
    metadata.insert("post_api".to_string(), api.to_string());
    metadata.insert("post_api_ver".to_string(), version.to_string());
    ServiceEndpoint {
        name: name.to_string(),
        metadata,
    }
}

fn create_event(service: &str, endpoints: Vec<ServiceEndpoint>) -> Event {
    Event {
        action: Action::Create,
        service: ServiceRecord {
            name: service.to_string(),
            nodes: vec![Node {
                id: "n1".to_string(),
                address: "127.0.0.1:1".to_string(),
            }],
            endpoints,
        },
    }
}

/// Spins up a gateway on `port` with the given routes pre-registered and
/// the given RPC client, and returns a shutdown sender plus the base URL.
async fn spawn_gateway(
    port: u16,
    routes: Vec<Event>,
    rpc: InMemoryRpcClient,
) -> (tokio::sync::watch::Sender<bool>, String) {
    let (registry, handle) = InMemoryRegistry::new();
    let registry: Arc<dyn Registry> = Arc::new(registry);
    let rpc: Arc<dyn RpcClient> = Arc::new(rpc);
    let broker = Arc::new(InMemoryBroker::new());

    let gateway = Gateway::new(test_config(port), registry, rpc, broker);
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    tokio::spawn(gateway.run(shutdown_rx));

    for event in routes {
        handle.push(event).await;
    }
    // Give the watch loop a moment to apply the seeded events and the
    // server a moment to bind before the test starts issuing requests.
    tokio::time::sleep(Duration::from_millis(200)).await;

    (shutdown_tx, format!("http://127.0.0.1:{port}"))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn single_call_happy_path() {
    let rpc = InMemoryRpcClient::new().with_reply("svc.user", "Login", json!({"ok": true}));
    let (shutdown, base_url) = spawn_gateway(
        18801,
        vec![create_event(
            "svc.user",
            vec![endpoint("Login", "user.login", "v1")],
        )],
        rpc,
    )
    .await;

    let response = reqwest::Client::new()
        .post(format!("{base_url}/api/v1"))
        .header("X-Api", "user.login")
        .json(&json!({"name": "a"}))
        .send()
        .await
        .expect("request failed");

    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["code"], 0);
    assert_eq!(body["result"], json!({"ok": true}));

    let _ = shutdown.send(true);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn multi_call_mixed_versions() {
    let rpc = InMemoryRpcClient::new()
        .with_reply("svc.a", "Do", json!({"x": 1}))
        .with_reply("svc.b", "Do", json!({"y": 2}));
    let (shutdown, base_url) = spawn_gateway(
        18802,
        vec![
            create_event("svc.a", vec![endpoint("Do", "a", "v1")]),
            create_event("svc.b", vec![endpoint("Do", "b", "v2")]),
        ],
        rpc,
    )
    .await;

    let response = reqwest::Client::new()
        .post(format!("{base_url}/api/v1"))
        .header("X-Api-Multi-Call", "true")
        .json(&json!({"a": {}, "b:v2": {}}))
        .send()
        .await
        .expect("request failed");

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["code"], 0);
    let result = &body["result"];
    assert_eq!(result["a"]["result"], json!({"x": 1}));
    assert_eq!(result["b:v2"]["result"], json!({"y": 2}));

    let _ = shutdown.send(true);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unknown_api_in_batch_rejects_whole_request() {
    let rpc = InMemoryRpcClient::new().with_reply("svc.a", "Do", json!({}));
    let (shutdown, base_url) = spawn_gateway(
        18803,
        vec![create_event("svc.a", vec![endpoint("Do", "a", "v1")])],
        rpc,
    )
    .await;

    let response = reqwest::Client::new()
        .post(format!("{base_url}/api/v1"))
        .header("X-Api-Multi-Call", "true")
        .json(&json!({"a": {}, "ghost:v1": {}}))
        .send()
        .await
        .expect("request failed");

    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["code"], 400);
    assert!(body["message"].as_str().unwrap().contains("ghost:v1"));

    let _ = shutdown.send(true);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn one_slow_call_times_out_without_blocking_the_fast_one() {
    let rpc = InMemoryRpcClient::new()
        .with_reply("svc.fast", "Do", json!({"ok": 1}))
        .with_delayed_reply("svc.slow", "Do", json!({"ok": 2}), Duration::from_secs(2));
    let (shutdown, base_url) = spawn_gateway(
        18804,
        vec![
            create_event("svc.fast", vec![endpoint("Do", "fast", "v1")]),
            create_event("svc.slow", vec![endpoint("Do", "slow", "v1")]),
        ],
        rpc,
    )
    .await;

    let response = reqwest::Client::new()
        .post(format!("{base_url}/api/v1"))
        .header("X-Api-Multi-Call", "true")
        .header("X-Api-Call-Timeout", "50")
        .json(&json!({"fast": {}, "slow": {}}))
        .send()
        .await
        .expect("request failed");

    let body: serde_json::Value = response.json().await.unwrap();
    let result = &body["result"];
    assert_eq!(result["fast"]["code"], 0);
    assert_eq!(result["slow"]["code"], 408);
    assert_eq!(result["slow"]["err_namespace"], "POST-API");

    let _ = shutdown.send(true);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn routing_survives_delete_then_recreate() {
    let rpc = InMemoryRpcClient::new().with_reply("svc.a", "Do", json!({"ok": true}));
    let (registry, handle) = InMemoryRegistry::new();
    let registry: Arc<dyn Registry> = Arc::new(registry);
    let rpc: Arc<dyn RpcClient> = Arc::new(rpc);
    let broker = Arc::new(InMemoryBroker::new());

    let gateway = Gateway::new(test_config(18805), registry, rpc, broker);
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(gateway.run(shutdown_rx));
    tokio::time::sleep(Duration::from_millis(100)).await;

    let client = reqwest::Client::new();
    let base_url = "http://127.0.0.1:18805";

    let create = create_event("svc.a", vec![endpoint("Do", "a", "v1")]);
    handle.push(create.clone()).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let response = client
        .post(format!("{base_url}/api/v1"))
        .header("X-Api", "a")
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["code"], 0);

    handle
        .push(Event {
            action: Action::Delete,
            service: ServiceRecord {
                name: "svc.a".to_string(),
                nodes: vec![],
                endpoints: vec![],
            },
        })
        .await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let response = client
        .post(format!("{base_url}/api/v1"))
        .header("X-Api", "a")
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["code"], 400);

    handle.push(create).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let response = client
        .post(format!("{base_url}/api/v1"))
        .header("X-Api", "a")
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["code"], 0);

    let _ = shutdown_tx.send(true);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn upstream_structured_error_is_wrapped_in_envelope() {
    let rpc = InMemoryRpcClient::new().with_structured_error(
        "svc.a", "Do", 42001, "X", "AUTH", "denied",
    );
    let (shutdown, base_url) = spawn_gateway(
        18806,
        vec![create_event("svc.a", vec![endpoint("Do", "a", "v1")])],
        rpc,
    )
    .await;

    let response = reqwest::Client::new()
        .post(format!("{base_url}/api/v1"))
        .header("X-Api", "a")
        .json(&json!({}))
        .send()
        .await
        .expect("request failed");

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["code"], 42001);
    assert_eq!(body["err_id"], "X");
    assert_eq!(body["err_namespace"], "AUTH");
    assert!(body["message"].as_str().unwrap().contains("denied"));

    let _ = shutdown.send(true);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn ping_endpoint_responds_without_touching_the_routing_table() {
    let rpc = InMemoryRpcClient::new();
    let (shutdown, base_url) = spawn_gateway(18807, vec![], rpc).await;

    let response = reqwest::Client::new()
        .get(format!("{base_url}/ping"))
        .send()
        .await
        .expect("request failed");

    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "pong");

    let _ = shutdown.send(true);
}
