use serde_json::Value;

use vault_server::proto::health_check_response::ServingStatus;
use vault_server::proto::health_client::HealthClient;
use vault_server::proto::HealthCheckRequest;

use crate::helpers::{spawn, test_config};

#[tokio::test]
async fn interrupted_generation_refuses_to_start() {
    let key_dir = tempfile::tempdir().unwrap();
    // A crash that persisted only one artifact.
    std::fs::write(key_dir.path().join("EncKey.json"), "{}").unwrap();

    let err = vault_server::start(test_config(key_dir.path())).await.unwrap_err();
    assert!(err.to_string().contains("key store corrupt"), "got: {err}");
}

#[tokio::test]
async fn wiping_a_partial_directory_recovers_with_fresh_keys() {
    let key_dir = tempfile::tempdir().unwrap();
    std::fs::write(key_dir.path().join("EncKey.json"), "{}").unwrap();
    assert!(vault_server::start(test_config(key_dir.path())).await.is_err());

    for entry in std::fs::read_dir(key_dir.path()).unwrap() {
        std::fs::remove_file(entry.unwrap().path()).unwrap();
    }

    let running = vault_server::start(test_config(key_dir.path())).await.unwrap();
    let body: Value = reqwest::get(format!("http://{}/health", running.tool_addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "healthy");
    running.shutdown().await;
}

#[tokio::test]
async fn shutdown_walks_the_state_machine_and_stops_serving() {
    let vault = spawn().await;
    let endpoint = vault.rpc_endpoint();

    let mut health = HealthClient::connect(endpoint.clone()).await.unwrap();
    let before = health
        .check(HealthCheckRequest { service: "".into() })
        .await
        .unwrap()
        .into_inner();
    assert_eq!(before.status, ServingStatus::Serving as i32);

    vault.running.shutdown().await;

    // Listener is gone; either the existing channel errors or a new
    // connection is refused.
    let after = health.check(HealthCheckRequest { service: "".into() }).await;
    assert!(after.is_err() || vault_server::proto::health_client::HealthClient::connect(endpoint).await.is_err());
}
