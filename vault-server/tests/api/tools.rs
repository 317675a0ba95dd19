use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{json, Value};

use vault_core::ScoreShape;

use crate::helpers::{spawn, spawn_with, TOKEN};

async fn call_tool(vault: &crate::helpers::TestVault, body: Value) -> (u16, Value) {
    let response = reqwest::Client::new()
        .post(vault.http("/tools/call"))
        .json(&body)
        .send()
        .await
        .unwrap();
    let status = response.status().as_u16();
    (status, response.json().await.unwrap())
}

#[tokio::test]
async fn health_endpoint_reports_healthy_with_keys_loaded() {
    let vault = spawn().await;
    let response = reqwest::get(vault.http("/health")).await.unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["keys_loaded"], true);
    assert!(body["uptime_seconds"].is_u64());
}

#[cfg(unix)]
#[tokio::test]
async fn cold_start_leaves_the_documented_key_directory() {
    use std::os::unix::fs::PermissionsExt;
    let vault = spawn().await;

    let mut names: Vec<String> = std::fs::read_dir(vault.key_dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    names.sort();
    assert_eq!(
        names,
        vec!["EncKey.json", "EvalKey.json", "MetadataKey.json", "PublicInfo.json", "SecKey.json"]
    );

    let mode = std::fs::metadata(vault.key_dir.path().join("SecKey.json"))
        .unwrap()
        .permissions()
        .mode();
    assert_eq!(mode & 0o777, 0o600);
}

#[tokio::test]
async fn metrics_endpoint_serves_exposition_text() {
    let vault = spawn().await;
    // Generate one request so the counter family exists.
    let _ = call_tool(&vault, json!({ "name": "get_public_key", "arguments": { "token": TOKEN } }))
        .await;
    let response = reqwest::get(vault.http("/metrics")).await.unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let text = response.text().await.unwrap();
    assert!(text.contains("vault_requests_total"));
    assert!(text.contains("vault_keys_loaded 1"));
    assert!(text.contains("transport=\"tool\""));
}

#[tokio::test]
async fn tool_listing_names_the_three_operations() {
    let vault = spawn().await;
    let body: Value = reqwest::get(vault.http("/tools"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let names: Vec<&str> = body["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["decrypt_metadata", "decrypt_scores", "get_public_key"]);
}

#[tokio::test]
async fn get_public_key_tool_returns_base64_bundle() {
    let vault = spawn().await;
    let (status, body) =
        call_tool(&vault, json!({ "name": "get_public_key", "arguments": { "token": TOKEN } }))
            .await;
    assert_eq!(status, 200);
    let result = &body["result"];
    assert_eq!(result["dim"], 32);
    assert_eq!(result["index_name"], "demo-index");
    let enc_key = BASE64.decode(result["enc_key"].as_str().unwrap()).unwrap();
    assert!(vault_fhe::EncryptionKey::from_bytes(&enc_key).is_ok());
    assert!(result.get("metadata_key").is_none());
}

#[tokio::test]
async fn decrypt_scores_tool_returns_structured_entries() {
    let vault = spawn().await;
    let ciphertext = vault.encrypt_scores(&[(0, 0, 0.95), (0, 1, 0.10), (0, 2, 0.80)]);
    let (status, body) = call_tool(
        &vault,
        json!({
            "name": "decrypt_scores",
            "arguments": {
                "token": TOKEN,
                "ciphertext": BASE64.encode(&ciphertext),
                "top_k": 2,
            },
        }),
    )
    .await;
    assert_eq!(status, 200);
    let entries = body["result"].as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["row_idx"], 0);
    assert_eq!(entries[1]["row_idx"], 2);
}

#[tokio::test]
async fn flat_profile_renders_index_score_pairs() {
    let vault = spawn_with(|config| config.score_shape = ScoreShape::Flat).await;
    let ciphertext = vault.encrypt_scores(&[(0, 7, 0.9)]);
    let (status, body) = call_tool(
        &vault,
        json!({
            "name": "decrypt_scores",
            "arguments": {
                "token": TOKEN,
                "ciphertext": BASE64.encode(&ciphertext),
                "top_k": 1,
            },
        }),
    )
    .await;
    assert_eq!(status, 200);
    let entries = body["result"].as_array().unwrap();
    assert_eq!(entries[0]["index"], 7);
    assert!(entries[0].get("row_idx").is_none());
}

#[tokio::test]
async fn decrypt_metadata_tool_roundtrips() {
    let vault = spawn().await;
    let items = vec![
        BASE64.encode(vault.wrap_metadata("one")),
        BASE64.encode(vault.wrap_metadata("two")),
    ];
    let (status, body) = call_tool(
        &vault,
        json!({
            "name": "decrypt_metadata",
            "arguments": { "token": TOKEN, "items": items },
        }),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["result"], json!(["one", "two"]));
}

#[tokio::test]
async fn tampered_metadata_is_a_400_with_no_partial_result() {
    let vault = spawn().await;
    let good = vault.wrap_metadata("good");
    let mut bad = vault.wrap_metadata("bad");
    let last = bad.len() - 1;
    bad[last] ^= 0x01;

    let (status, body) = call_tool(
        &vault,
        json!({
            "name": "decrypt_metadata",
            "arguments": {
                "token": TOKEN,
                "items": [BASE64.encode(&good), BASE64.encode(&bad)],
            },
        }),
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "invalid_input");
    assert!(body.get("result").is_none());
}

#[tokio::test]
async fn wrong_token_is_a_401_error_body() {
    let vault = spawn().await;
    let (status, body) =
        call_tool(&vault, json!({ "name": "get_public_key", "arguments": { "token": "wrong" } }))
            .await;
    assert_eq!(status, 401);
    assert_eq!(body["error"]["code"], "unauthorized");
    assert_eq!(body["error"]["message"], "unauthorized");
}

#[tokio::test]
async fn unknown_tool_is_a_400() {
    let vault = spawn().await;
    let (status, body) =
        call_tool(&vault, json!({ "name": "rotate_keys", "arguments": { "token": TOKEN } }))
            .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "invalid_input");
}

#[tokio::test]
async fn negative_top_k_is_a_400() {
    let vault = spawn().await;
    let (status, body) = call_tool(
        &vault,
        json!({
            "name": "decrypt_scores",
            "arguments": { "token": TOKEN, "ciphertext": "AAAA", "top_k": -3 },
        }),
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "invalid_input");
}
