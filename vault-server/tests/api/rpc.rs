use tonic::Code;

use vault_server::proto::health_check_response::ServingStatus;
use vault_server::proto::health_client::HealthClient;
use vault_server::proto::vault_client::VaultClient;
use vault_server::proto::{
    DecryptMetadataRequest, DecryptScoresRequest, GetPublicKeyRequest, HealthCheckRequest,
};

use crate::helpers::{spawn, TEST_DIM, TOKEN};

#[tokio::test]
async fn health_reports_serving_when_ready() {
    let vault = spawn().await;
    let mut client = HealthClient::connect(vault.rpc_endpoint()).await.unwrap();
    let response = client
        .check(HealthCheckRequest { service: "".into() })
        .await
        .unwrap()
        .into_inner();
    assert_eq!(response.status, ServingStatus::Serving as i32);
}

#[tokio::test]
async fn public_key_bundle_roundtrip() {
    let vault = spawn().await;
    let mut client = VaultClient::connect(vault.rpc_endpoint()).await.unwrap();

    let bundle = client
        .get_public_key(GetPublicKeyRequest { token: TOKEN.into() })
        .await
        .unwrap()
        .into_inner();
    assert_eq!(bundle.dim, TEST_DIM);
    assert_eq!(bundle.index_name.as_deref(), Some("demo-index"));
    assert!(!bundle.enc_key.is_empty());
    assert!(!bundle.eval_key.is_empty());

    // The served encryption key is usable for encryption.
    let key = vault_fhe::EncryptionKey::from_bytes(&bundle.enc_key).unwrap();
    assert_eq!(key.dim(), TEST_DIM);
}

#[tokio::test]
async fn repeated_bundles_are_byte_identical() {
    let vault = spawn().await;
    let mut client = VaultClient::connect(vault.rpc_endpoint()).await.unwrap();
    let a = client
        .get_public_key(GetPublicKeyRequest { token: TOKEN.into() })
        .await
        .unwrap()
        .into_inner();
    let b = client
        .get_public_key(GetPublicKeyRequest { token: TOKEN.into() })
        .await
        .unwrap()
        .into_inner();
    assert_eq!(a.enc_key, b.enc_key);
    assert_eq!(a.eval_key, b.eval_key);
}

#[tokio::test]
async fn bundle_does_not_contain_the_secret_key() {
    let vault = spawn().await;
    let mut client = VaultClient::connect(vault.rpc_endpoint()).await.unwrap();
    let bundle = client
        .get_public_key(GetPublicKeyRequest { token: TOKEN.into() })
        .await
        .unwrap()
        .into_inner();

    let needle = vault.secret_key_body();
    for haystack in [&bundle.enc_key, &bundle.eval_key] {
        assert!(
            !haystack.windows(needle.len()).any(|w| w == needle.as_slice()),
            "secret key bytes appeared in the public bundle"
        );
    }
}

#[tokio::test]
async fn decrypt_scores_returns_ordered_top_k() {
    let vault = spawn().await;
    let mut client = VaultClient::connect(vault.rpc_endpoint()).await.unwrap();

    // v = [0.95, 0.10, 0.80, 0.50] at rows 0..4 of shard 0.
    let ciphertext =
        vault.encrypt_scores(&[(0, 0, 0.95), (0, 1, 0.10), (0, 2, 0.80), (0, 3, 0.50)]);
    let response = client
        .decrypt_scores(DecryptScoresRequest {
            token: TOKEN.into(),
            ciphertext,
            top_k: 3,
        })
        .await
        .unwrap()
        .into_inner();

    let coords: Vec<(u32, u32)> = response
        .entries
        .iter()
        .map(|e| (e.shard_idx, e.row_idx))
        .collect();
    assert_eq!(coords, vec![(0, 0), (0, 2), (0, 3)]);
    for (entry, want) in response.entries.iter().zip([0.95f32, 0.80, 0.50]) {
        assert!((entry.score - want).abs() < 1e-3);
    }
}

#[tokio::test]
async fn oversized_top_k_is_clamped_to_k_max() {
    let vault = spawn().await;
    let mut client = VaultClient::connect(vault.rpc_endpoint()).await.unwrap();

    let entries: Vec<(u32, u32, f32)> = (0..16).map(|i| (0, i, i as f32 / 16.0)).collect();
    let ciphertext = vault.encrypt_scores(&entries);
    let response = client
        .decrypt_scores(DecryptScoresRequest {
            token: TOKEN.into(),
            ciphertext,
            top_k: 100,
        })
        .await
        .unwrap()
        .into_inner();
    assert_eq!(response.entries.len(), 10);
}

#[tokio::test]
async fn top_k_zero_returns_no_entries() {
    let vault = spawn().await;
    let mut client = VaultClient::connect(vault.rpc_endpoint()).await.unwrap();
    let ciphertext = vault.encrypt_scores(&[(0, 0, 0.5)]);
    let response = client
        .decrypt_scores(DecryptScoresRequest {
            token: TOKEN.into(),
            ciphertext,
            top_k: 0,
        })
        .await
        .unwrap()
        .into_inner();
    assert!(response.entries.is_empty());
}

#[tokio::test]
async fn wrong_and_malformed_tokens_are_indistinguishable() {
    let vault = spawn().await;
    let mut client = VaultClient::connect(vault.rpc_endpoint()).await.unwrap();
    let ciphertext = vault.encrypt_scores(&[(0, 0, 0.5)]);

    let wrong = client
        .decrypt_scores(DecryptScoresRequest {
            token: "wrong".into(),
            ciphertext: ciphertext.clone(),
            top_k: 1,
        })
        .await
        .unwrap_err();
    let malformed = client
        .decrypt_scores(DecryptScoresRequest {
            token: "".into(),
            ciphertext,
            top_k: 1,
        })
        .await
        .unwrap_err();

    assert_eq!(wrong.code(), Code::Unauthenticated);
    assert_eq!(malformed.code(), Code::Unauthenticated);
    assert_eq!(wrong.message(), malformed.message());
}

#[tokio::test]
async fn garbage_ciphertext_is_invalid_argument() {
    let vault = spawn().await;
    let mut client = VaultClient::connect(vault.rpc_endpoint()).await.unwrap();
    let err = client
        .decrypt_scores(DecryptScoresRequest {
            token: TOKEN.into(),
            ciphertext: b"junk".to_vec(),
            top_k: 1,
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);
}

#[tokio::test]
async fn mismatched_dimension_is_invalid_argument() {
    let vault = spawn().await;
    let mut client = VaultClient::connect(vault.rpc_endpoint()).await.unwrap();

    let foreign = vault_fhe::generate(64).unwrap();
    let ciphertext = vault_fhe::encrypt_scores(&foreign.encryption, &[(0, 0, 0.5)]).to_bytes();
    let err = client
        .decrypt_scores(DecryptScoresRequest {
            token: TOKEN.into(),
            ciphertext,
            top_k: 1,
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);
}

#[tokio::test]
async fn metadata_batch_roundtrips_in_order() {
    let vault = spawn().await;
    let mut client = VaultClient::connect(vault.rpc_endpoint()).await.unwrap();

    let items = vec![
        vault.wrap_metadata("alpha record"),
        vault.wrap_metadata("beta record"),
    ];
    let response = client
        .decrypt_metadata(DecryptMetadataRequest { token: TOKEN.into(), items })
        .await
        .unwrap()
        .into_inner();
    assert_eq!(response.items, vec!["alpha record", "beta record"]);
}

#[tokio::test]
async fn tampered_metadata_fails_the_whole_batch() {
    let vault = spawn().await;
    let mut client = VaultClient::connect(vault.rpc_endpoint()).await.unwrap();

    let good = vault.wrap_metadata("good");
    let mut bad = vault.wrap_metadata("bad");
    let last = bad.len() - 1;
    bad[last] ^= 0x01;

    let err = client
        .decrypt_metadata(DecryptMetadataRequest {
            token: TOKEN.into(),
            items: vec![good, bad],
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);
}
