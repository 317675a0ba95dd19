//! The request error taxonomy.
//!
//! Six caller-visible kinds plus `Cancelled` (a terminal status, not a
//! wire error). Messages are fixed strings: no variant ever embeds
//! caller-supplied data, key bytes or ciphertext bytes. `Internal`
//! carries only a correlation id; the cause is logged server-side.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VaultError {
    /// Token missing, unknown or malformed. One category, no sub-codes.
    Unauthorized,
    /// Malformed ciphertext, failed metadata authentication, negative
    /// `top_k`, or an over-length metadata list.
    InvalidInput,
    /// Per-token bucket exhausted.
    RateLimited,
    /// Blocking-executor queue saturated. Back off and retry.
    Overloaded,
    /// Service is initializing or stopping. Back off and retry.
    NotReady,
    /// Deadline expired or the caller went away before a result could
    /// be sent.
    Cancelled,
    /// Unexpected failure. Details stay server-side under the
    /// correlation id.
    Internal { correlation_id: String },
}

impl VaultError {
    /// Build an `Internal` error, logging the cause under a fresh
    /// correlation id. The id is the only detail that crosses the wire.
    pub fn internal(context: &'static str, cause: impl fmt::Display) -> Self {
        let mut raw = [0u8; 8];
        let _ = getrandom::getrandom(&mut raw);
        let correlation_id = hex::encode(raw);
        tracing::error!(correlation_id = %correlation_id, error = %cause, "{}", context);
        Self::Internal { correlation_id }
    }

    /// Short status label for metrics and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::InvalidInput => "invalid_input",
            Self::RateLimited => "rate_limited",
            Self::Overloaded => "overloaded",
            Self::NotReady => "not_ready",
            Self::Cancelled => "cancelled",
            Self::Internal { .. } => "internal",
        }
    }
}

impl fmt::Display for VaultError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unauthorized => write!(f, "unauthorized"),
            Self::InvalidInput => write!(f, "invalid input"),
            Self::RateLimited => write!(f, "rate limited"),
            Self::Overloaded => write!(f, "overloaded, retry later"),
            Self::NotReady => write!(f, "service not ready, retry later"),
            Self::Cancelled => write!(f, "deadline exceeded"),
            Self::Internal { correlation_id } => {
                write!(f, "internal error (ref {})", correlation_id)
            }
        }
    }
}

impl std::error::Error for VaultError {}
