//! # Vault Keystore
//!
//! Custody of the vault's key material: the five-artifact on-disk
//! directory, atomic first-boot generation, and the opaque in-memory
//! handles everything else works through.
//!
//! Directory layout on a READY system:
//!
//! ```text
//! vault_keys/
//!   EncKey.json       public encryption key
//!   EvalKey.json      evaluation key (large)
//!   MetadataKey.json  symmetric metadata key
//!   PublicInfo.json   {index_name?, dim}
//!   SecKey.json       secret key, mode 0600
//! ```
//!
//! Generation stages every artifact under a temporary name and renames
//! only once all five are written; an interrupted first boot leaves
//! either nothing or a partial set that the next start rejects as
//! corrupt.

pub mod error;
pub mod layout;
pub mod store;

pub use error::KeyStoreError;
pub use layout::PublicInfo;
pub use store::{KeyStore, MetadataKeyHandle, PublicBundle, SecretHandle};

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
