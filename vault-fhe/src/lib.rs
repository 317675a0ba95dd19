//! # Vault FHE
//!
//! The cryptographic core behind the vault service: lattice-based
//! encryption of similarity scores and AEAD wrapping of per-record
//! metadata.
//!
//! ## Quick Start
//!
//! ```
//! use vault_fhe::{generate, encrypt_scores, DecryptContext};
//!
//! let keys = generate(64).unwrap();
//! let ct = encrypt_scores(&keys.encryption, &[(0, 0, 0.95), (0, 1, 0.10)]);
//!
//! let mut ctx = DecryptContext::new();
//! let scores = ctx.decrypt(&keys.secret, &ct).unwrap();
//! assert!((scores[0].2 - 0.95).abs() < 1e-3);
//! ```
//!
//! ## Properties
//!
//! - **Stable wire format**: versioned, self-describing, dimension
//!   embedded in every artifact
//! - **Uniform decode errors**: truncation, tampering and dimension
//!   mismatch are indistinguishable to a caller
//! - **Secret hygiene**: secret material zeroizes on drop; no serde
//!   impls on key types

#![deny(unsafe_code)]

mod error;
mod lwe;
mod metadata;

pub mod wire;

pub use error::{DecodeError, KeyGenError, UnwrapError, WrapError};
pub use lwe::{
    generate, encrypt_scores, DecryptContext, EncryptionKey, EvaluationKey, KeySet,
    ScoreCiphertext, SecretKey, ENC_SAMPLES, KS_BASE_LOG, KS_DIGITS, NOISE_BITS, SCALE_BITS,
};
pub use metadata::{
    unwrap as unwrap_metadata, wrap as wrap_metadata, MetadataKey, METADATA_KEY_BYTES,
    METADATA_NONCE_BYTES, METADATA_TAG_BYTES,
};

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
