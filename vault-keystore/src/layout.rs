//! On-disk artifact layout.
//!
//! A READY key directory contains exactly five files. Four are public
//! (world-readable); the secret key file is written mode 0600. Each
//! opaque artifact is a small JSON envelope `{format, version, data}`
//! with the serialized bytes base64-encoded; `PublicInfo.json` is
//! plain JSON.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::KeyStoreError;

pub const ENC_KEY_FILE: &str = "EncKey.json";
pub const EVAL_KEY_FILE: &str = "EvalKey.json";
pub const METADATA_KEY_FILE: &str = "MetadataKey.json";
pub const PUBLIC_INFO_FILE: &str = "PublicInfo.json";
pub const SECRET_KEY_FILE: &str = "SecKey.json";

pub const ALL_FILES: [&str; 5] = [
    ENC_KEY_FILE,
    EVAL_KEY_FILE,
    METADATA_KEY_FILE,
    PUBLIC_INFO_FILE,
    SECRET_KEY_FILE,
];

pub const FORMAT_ENC_KEY: &str = "vault-enc-key-v1";
pub const FORMAT_EVAL_KEY: &str = "vault-eval-key-v1";
pub const FORMAT_METADATA_KEY: &str = "vault-metadata-key-v1";
pub const FORMAT_SECRET_KEY: &str = "vault-secret-key-v1";

const ARTIFACT_VERSION: u32 = 1;

/// Public, non-cryptographic facts about the bundle.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PublicInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_name: Option<String>,
    pub dim: u32,
}

#[derive(Serialize, Deserialize)]
struct ArtifactEnvelope {
    format: String,
    version: u32,
    data: String,
}

/// Serialize an opaque artifact to its JSON envelope.
pub(crate) fn envelope_json(format: &str, bytes: &[u8]) -> Result<String, KeyStoreError> {
    let envelope = ArtifactEnvelope {
        format: format.to_string(),
        version: ARTIFACT_VERSION,
        data: BASE64.encode(bytes),
    };
    serde_json::to_string(&envelope)
        .map_err(|e| KeyStoreError::GenerationFailed(format!("serialize {}: {}", format, e)))
}

/// Read an opaque artifact, checking its declared format. Public
/// because upstream wrapper tooling reads `MetadataKey.json` and
/// `EncKey.json` straight from a mounted key directory.
pub fn read_artifact(path: &Path, format: &str) -> Result<Vec<u8>, KeyStoreError> {
    let corrupt = |msg: String| KeyStoreError::Corrupt(msg);
    let data = fs::read_to_string(path)
        .map_err(|e| corrupt(format!("read {}: {}", path.display(), e)))?;
    let envelope: ArtifactEnvelope = serde_json::from_str(&data)
        .map_err(|e| corrupt(format!("parse {}: {}", path.display(), e)))?;
    if envelope.format != format || envelope.version != ARTIFACT_VERSION {
        return Err(corrupt(format!(
            "{}: unexpected format {:?} v{}",
            path.display(),
            envelope.format,
            envelope.version
        )));
    }
    BASE64
        .decode(envelope.data.as_bytes())
        .map_err(|e| corrupt(format!("decode {}: {}", path.display(), e)))
}

/// A fully written temporary file awaiting its rename into place.
/// First-boot generation stages every artifact before committing any,
/// so none of the final names become visible until all bytes are on
/// disk.
pub(crate) struct StagedFile {
    tmp: std::path::PathBuf,
    path: std::path::PathBuf,
}

/// Write contents to a temporary sibling of `path`. The secret flag
/// restricts permissions before the rename so the final name is never
/// visible with a permissive mode.
pub(crate) fn stage_file(
    path: &Path,
    contents: &str,
    secret: bool,
) -> Result<StagedFile, KeyStoreError> {
    let failed =
        |op: &str, e: std::io::Error| KeyStoreError::GenerationFailed(format!("{}: {}", op, e));
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, contents).map_err(|e| failed("write", e))?;
    if secret {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&tmp, fs::Permissions::from_mode(0o600))
                .map_err(|e| failed("chmod", e))?;
        }
    }
    Ok(StagedFile { tmp, path: path.to_path_buf() })
}

impl StagedFile {
    pub fn commit(self) -> Result<(), KeyStoreError> {
        fs::rename(&self.tmp, &self.path)
            .map_err(|e| KeyStoreError::GenerationFailed(format!("rename: {}", e)))
    }
}
