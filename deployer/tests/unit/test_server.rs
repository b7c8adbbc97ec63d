//! Gate server tests

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::watch;

use nugget_deployer::deploy::fsm::RunState;
use nugget_deployer::deploy::gate::flash_gate;
use nugget_deployer::server::serve::router;
use nugget_deployer::server::state::ServerState;

async fn spawn_server(state: Arc<ServerState>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.unwrap();
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn test_health_and_state() {
    let (handle, _gate) = flash_gate();
    let (_state_tx, state_rx) = watch::channel(RunState::Provisioning);
    let base = spawn_server(Arc::new(ServerState::new(handle, state_rx))).await;
    let client = reqwest::Client::new();

    let health: Value = client
        .get(format!("{}/health", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "healthy");

    let state: Value = client
        .get(format!("{}/deploy/state", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(state, json!({ "state": "provisioning" }));
}

#[tokio::test]
async fn test_ready_endpoint_statuses() {
    let (handle, mut gate) = flash_gate();
    let (state_tx, state_rx) = watch::channel(RunState::Provisioning);
    let base = spawn_server(Arc::new(ServerState::new(handle, state_rx))).await;
    let client = reqwest::Client::new();
    let ready = || client.post(format!("{}/deploy/ready", base)).send();

    // nothing waiting yet
    assert_eq!(ready().await.unwrap().status(), 409);

    state_tx.send_replace(RunState::Gated {
        index: 0,
        plugin_id: "heltec-gateway".to_string(),
    });
    let response = ready().await.unwrap();
    assert_eq!(response.status(), 202);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["accepted"], true);

    // second press before the device picked up the first
    assert_eq!(ready().await.unwrap().status(), 409);
    gate.wait().await.unwrap();

    drop(gate);
    assert_eq!(ready().await.unwrap().status(), 410);
}
