use std::path::Path;

use vault_core::Config;
use vault_server::{start, RunningVault};

pub const TOKEN: &str = "t-alpha";
pub const TEST_DIM: u32 = 32;

pub struct TestVault {
    pub running: RunningVault,
    pub key_dir: tempfile::TempDir,
}

pub fn test_config(dir: &Path) -> Config {
    Config {
        bind_rpc: "127.0.0.1:0".parse().expect("static address"),
        bind_tool: "127.0.0.1:0".parse().expect("static address"),
        key_dir: dir.to_path_buf(),
        tokens: vec![TOKEN.into()],
        fhe_dim: TEST_DIM,
        index_name: Some("demo-index".into()),
        ..Config::default()
    }
}

pub async fn spawn() -> TestVault {
    spawn_with(|_| {}).await
}

pub async fn spawn_with(tweak: impl FnOnce(&mut Config)) -> TestVault {
    let key_dir = tempfile::tempdir().expect("tempdir");
    let mut config = test_config(key_dir.path());
    tweak(&mut config);
    let running = start(config).await.expect("vault failed to start");
    TestVault { running, key_dir }
}

impl TestVault {
    pub fn rpc_endpoint(&self) -> String {
        format!("http://{}", self.running.rpc_addr)
    }

    pub fn http(&self, path: &str) -> String {
        format!("http://{}{}", self.running.tool_addr, path)
    }

    /// Encrypt entries the way a worker would: with the public key
    /// read from the key directory.
    pub fn encrypt_scores(&self, entries: &[(u32, u32, f32)]) -> Vec<u8> {
        let raw = vault_keystore::layout::read_artifact(
            &self.key_dir.path().join(vault_keystore::layout::ENC_KEY_FILE),
            vault_keystore::layout::FORMAT_ENC_KEY,
        )
        .expect("read EncKey.json");
        let key = vault_fhe::EncryptionKey::from_bytes(&raw).expect("parse EncKey");
        vault_fhe::encrypt_scores(&key, entries).to_bytes()
    }

    /// Wrap metadata the way an upstream component would.
    pub fn wrap_metadata(&self, plaintext: &str) -> Vec<u8> {
        let raw = vault_keystore::layout::read_artifact(
            &self
                .key_dir
                .path()
                .join(vault_keystore::layout::METADATA_KEY_FILE),
            vault_keystore::layout::FORMAT_METADATA_KEY,
        )
        .expect("read MetadataKey.json");
        let key = vault_fhe::MetadataKey::from_bytes(&raw).expect("parse MetadataKey");
        vault_fhe::wrap_metadata(&key, plaintext).expect("wrap")
    }

    /// The on-disk secret key body (header stripped), for leak checks.
    pub fn secret_key_body(&self) -> Vec<u8> {
        let raw = vault_keystore::layout::read_artifact(
            &self.key_dir.path().join(vault_keystore::layout::SECRET_KEY_FILE),
            vault_keystore::layout::FORMAT_SECRET_KEY,
        )
        .expect("read SecKey.json");
        raw[8..].to_vec()
    }
}
