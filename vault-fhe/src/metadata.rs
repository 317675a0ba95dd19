//! Metadata AEAD: AES-256-GCM.
//!
//! Wire layout: nonce[12] || aead_ct[16+]. Upstream components wrap
//! per-record metadata under the shared key; the vault unwraps it.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use getrandom::getrandom;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{DecodeError, UnwrapError, WrapError};

pub const METADATA_KEY_BYTES: usize = 32;
pub const METADATA_NONCE_BYTES: usize = 12;
pub const METADATA_TAG_BYTES: usize = 16;

/// Symmetric key for metadata wrapping. Not cloneable; byte access
/// exists only for at-rest persistence.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct MetadataKey([u8; METADATA_KEY_BYTES]);

impl core::fmt::Debug for MetadataKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "MetadataKey {{ .. }}")
    }
}

impl MetadataKey {
    pub fn generate() -> Result<Self, WrapError> {
        let mut key = [0u8; METADATA_KEY_BYTES];
        getrandom(&mut key).map_err(|_| WrapError)?;
        Ok(Self(key))
    }

    pub fn to_bytes(&self) -> [u8; METADATA_KEY_BYTES] {
        self.0
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let key: [u8; METADATA_KEY_BYTES] = bytes.try_into().map_err(|_| DecodeError)?;
        Ok(Self(key))
    }
}

/// Wrap a UTF-8 string under the metadata key.
pub fn wrap(key: &MetadataKey, plaintext: &str) -> Result<Vec<u8>, WrapError> {
    let mut nonce = [0u8; METADATA_NONCE_BYTES];
    getrandom(&mut nonce).map_err(|_| WrapError)?;
    let cipher = Aes256Gcm::new_from_slice(&key.0).map_err(|_| WrapError)?;
    let ct = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
        .map_err(|_| WrapError)?;
    let mut out = Vec::with_capacity(METADATA_NONCE_BYTES + ct.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ct);
    Ok(out)
}

/// Unwrap a metadata blob back to its UTF-8 string.
pub fn unwrap(key: &MetadataKey, blob: &[u8]) -> Result<String, UnwrapError> {
    if blob.len() < METADATA_NONCE_BYTES + METADATA_TAG_BYTES {
        return Err(UnwrapError::Malformed);
    }
    let (nonce, ct) = blob.split_at(METADATA_NONCE_BYTES);
    let cipher = Aes256Gcm::new_from_slice(&key.0).map_err(|_| UnwrapError::AuthFailed)?;
    let pt = cipher
        .decrypt(Nonce::from_slice(nonce), ct)
        .map_err(|_| UnwrapError::AuthFailed)?;
    String::from_utf8(pt).map_err(|_| UnwrapError::NotUtf8)
}
