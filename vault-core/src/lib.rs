//! # Vault Core
//!
//! Business core of the vault service. Holds the wiring between the
//! key store, the FHE adapter and the authorizer, and implements the
//! three operations both transports expose:
//!
//! - `get_public_key`: serve the public bundle (never the secret)
//! - `decrypt_scores`: deserialize, decrypt, select and order top-k
//! - `decrypt_metadata`: unwrap an ordered batch, all-or-nothing
//!
//! Transports are thin adapters over [`VaultService`]; no business
//! logic lives in them. The service owns the resource policy: per-token
//! rate buckets, a bounded blocking executor for CPU-heavy decryption,
//! per-request deadlines, and the READY/STOPPING state machine.

pub mod adapter;
pub mod auth;
pub mod config;
pub mod error;
pub mod metrics;
pub mod ratelimit;
pub mod service;
pub mod topk;

pub use auth::Authorizer;
pub use config::{Config, ConfigError, ScoreShape};
pub use error::VaultError;
pub use metrics::{spawn_resource_sampler, Metrics};
pub use service::{PublicKeyBundle, ServiceState, Transport, VaultService};
pub use topk::ScoreEntry;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
