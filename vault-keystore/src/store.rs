//! The key store: first-boot generation, loading, and the in-memory
//! handles the rest of the service works through.

use std::fs;
use std::path::{Path, PathBuf};

use vault_fhe::{
    DecodeError, DecryptContext, EncryptionKey, EvaluationKey, MetadataKey, ScoreCiphertext,
    SecretKey, UnwrapError,
};
use zeroize::Zeroizing;

use crate::error::KeyStoreError;
use crate::layout::{self, PublicInfo};

// ---------------------------------------------------------------------------
// Handles
// ---------------------------------------------------------------------------

/// Owner of the decryption key. The wrapped key never leaves: there is
/// no byte accessor, no serde impl, and no `Clone`. The only way to
/// use it is [`SecretHandle::decrypt_scores`].
pub struct SecretHandle {
    key: SecretKey,
}

impl std::fmt::Debug for SecretHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretHandle {{ .. }}")
    }
}

impl SecretHandle {
    pub fn dim(&self) -> u32 {
        self.key.dim()
    }

    pub fn decrypt_scores(
        &self,
        ctx: &mut DecryptContext,
        ciphertext: &ScoreCiphertext,
    ) -> Result<Vec<(u32, u32, f32)>, DecodeError> {
        ctx.decrypt(&self.key, ciphertext)
    }
}

/// Owner of the metadata key, scoped to unwrapping.
pub struct MetadataKeyHandle {
    key: MetadataKey,
}

impl std::fmt::Debug for MetadataKeyHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MetadataKeyHandle {{ .. }}")
    }
}

impl MetadataKeyHandle {
    pub fn unwrap(&self, blob: &[u8]) -> Result<String, UnwrapError> {
        vault_fhe::unwrap_metadata(&self.key, blob)
    }
}

/// Borrowed view of the public bundle. Structurally incapable of
/// carrying the secret or metadata keys.
#[derive(Clone, Copy, Debug)]
pub struct PublicBundle<'a> {
    pub enc_key: &'a [u8],
    pub eval_key: &'a [u8],
    pub info: &'a PublicInfo,
}

// ---------------------------------------------------------------------------
// KeyStore
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct KeyStore {
    dir: PathBuf,
    enc_key_bytes: Vec<u8>,
    eval_key_bytes: Vec<u8>,
    info: PublicInfo,
    encryption_key: EncryptionKey,
    secret: SecretHandle,
    metadata: MetadataKeyHandle,
}

impl KeyStore {
    /// Load the five artifacts from `dir`, or generate a fresh set if
    /// the directory is empty. A directory holding some but not all
    /// artifacts is corrupt and refuses to serve.
    pub fn load_or_init(
        dir: &Path,
        dim: u32,
        index_name: Option<String>,
    ) -> Result<Self, KeyStoreError> {
        fs::create_dir_all(dir)
            .map_err(|e| KeyStoreError::GenerationFailed(format!("create dir: {}", e)))?;
        let present = layout::ALL_FILES
            .iter()
            .filter(|name| dir.join(name).exists())
            .count();
        match present {
            0 => Self::generate_into(dir, dim, index_name),
            5 => {
                let store = Self::load(dir)?;
                if store.info.dim != dim {
                    tracing::warn!(
                        configured = dim,
                        stored = store.info.dim,
                        "configured dimension ignored; key material pins the dimension"
                    );
                }
                Ok(store)
            }
            n => Err(KeyStoreError::Corrupt(format!(
                "{} holds {} of {} artifacts; restore or wipe the directory",
                dir.display(),
                n,
                layout::ALL_FILES.len()
            ))),
        }
    }

    fn generate_into(
        dir: &Path,
        dim: u32,
        index_name: Option<String>,
    ) -> Result<Self, KeyStoreError> {
        let keys = vault_fhe::generate(dim)
            .map_err(|e| KeyStoreError::GenerationFailed(e.to_string()))?;
        let metadata_key = MetadataKey::generate()
            .map_err(|e| KeyStoreError::GenerationFailed(e.to_string()))?;
        let info = PublicInfo { index_name, dim };

        let enc_key_bytes = keys.encryption.to_bytes();
        let eval_key_bytes = keys.evaluation.to_bytes();
        let secret_bytes = Zeroizing::new(keys.secret.to_bytes());
        let metadata_bytes = Zeroizing::new(metadata_key.to_bytes().to_vec());

        let info_json = serde_json::to_string_pretty(&info)
            .map_err(|e| KeyStoreError::GenerationFailed(format!("serialize info: {}", e)))?;

        // Stage everything before any final name appears.
        let staged = vec![
            layout::stage_file(
                &dir.join(layout::ENC_KEY_FILE),
                &layout::envelope_json(layout::FORMAT_ENC_KEY, &enc_key_bytes)?,
                false,
            )?,
            layout::stage_file(
                &dir.join(layout::EVAL_KEY_FILE),
                &layout::envelope_json(layout::FORMAT_EVAL_KEY, &eval_key_bytes)?,
                false,
            )?,
            layout::stage_file(
                &dir.join(layout::METADATA_KEY_FILE),
                &layout::envelope_json(layout::FORMAT_METADATA_KEY, &metadata_bytes)?,
                false,
            )?,
            layout::stage_file(&dir.join(layout::PUBLIC_INFO_FILE), &info_json, false)?,
            layout::stage_file(
                &dir.join(layout::SECRET_KEY_FILE),
                &layout::envelope_json(layout::FORMAT_SECRET_KEY, &secret_bytes)?,
                true,
            )?,
        ];
        for file in staged {
            file.commit()?;
        }

        tracing::info!(dir = %dir.display(), dim, "generated fresh key material");
        Ok(Self {
            dir: dir.to_path_buf(),
            enc_key_bytes,
            eval_key_bytes,
            info,
            encryption_key: keys.encryption,
            secret: SecretHandle { key: keys.secret },
            metadata: MetadataKeyHandle { key: metadata_key },
        })
    }

    fn load(dir: &Path) -> Result<Self, KeyStoreError> {
        let enc_key_bytes =
            layout::read_artifact(&dir.join(layout::ENC_KEY_FILE), layout::FORMAT_ENC_KEY)?;
        let encryption_key = EncryptionKey::from_bytes(&enc_key_bytes).map_err(|_| {
            KeyStoreError::Corrupt(format!("{}: invalid key material", layout::ENC_KEY_FILE))
        })?;

        let eval_key_bytes =
            layout::read_artifact(&dir.join(layout::EVAL_KEY_FILE), layout::FORMAT_EVAL_KEY)?;
        EvaluationKey::from_bytes(&eval_key_bytes).map_err(|_| {
            KeyStoreError::Corrupt(format!("{}: invalid key material", layout::EVAL_KEY_FILE))
        })?;

        let metadata_bytes = Zeroizing::new(layout::read_artifact(
            &dir.join(layout::METADATA_KEY_FILE),
            layout::FORMAT_METADATA_KEY,
        )?);
        let metadata_key = MetadataKey::from_bytes(&metadata_bytes).map_err(|_| {
            KeyStoreError::Corrupt(format!("{}: invalid key material", layout::METADATA_KEY_FILE))
        })?;

        let secret_bytes = Zeroizing::new(layout::read_artifact(
            &dir.join(layout::SECRET_KEY_FILE),
            layout::FORMAT_SECRET_KEY,
        )?);
        let secret_key = SecretKey::from_bytes(&secret_bytes).map_err(|_| {
            KeyStoreError::Corrupt(format!("{}: invalid key material", layout::SECRET_KEY_FILE))
        })?;

        let info_path = dir.join(layout::PUBLIC_INFO_FILE);
        let info_json = fs::read_to_string(&info_path)
            .map_err(|e| KeyStoreError::Corrupt(format!("read {}: {}", info_path.display(), e)))?;
        let info: PublicInfo = serde_json::from_str(&info_json)
            .map_err(|e| KeyStoreError::Corrupt(format!("parse {}: {}", info_path.display(), e)))?;

        if secret_key.dim() != encryption_key.dim() || info.dim != secret_key.dim() {
            return Err(KeyStoreError::Corrupt(
                "artifacts disagree on lattice dimension".to_string(),
            ));
        }

        tracing::info!(dir = %dir.display(), dim = info.dim, "loaded key material");
        Ok(Self {
            dir: dir.to_path_buf(),
            enc_key_bytes,
            eval_key_bytes,
            info,
            encryption_key,
            secret: SecretHandle { key: secret_key },
            metadata: MetadataKeyHandle { key: metadata_key },
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Dimension pinned by the loaded key material.
    pub fn dim(&self) -> u32 {
        self.info.dim
    }

    /// The four public artifacts. Never the secret.
    pub fn public_bundle(&self) -> PublicBundle<'_> {
        PublicBundle {
            enc_key: &self.enc_key_bytes,
            eval_key: &self.eval_key_bytes,
            info: &self.info,
        }
    }

    /// Parsed encryption key, used for the startup self-test.
    pub fn encryption_key(&self) -> &EncryptionKey {
        &self.encryption_key
    }

    pub fn secret_handle(&self) -> &SecretHandle {
        &self.secret
    }

    pub fn metadata_key_handle(&self) -> &MetadataKeyHandle {
        &self.metadata
    }
}
