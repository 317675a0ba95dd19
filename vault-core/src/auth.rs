//! Bearer-token authorization.
//!
//! The allow-list is loaded once at startup and held in memory as
//! SHA-256 digests; raw tokens are never stored, logged or persisted
//! alongside key material. A presented token is hashed and compared
//! against every digest with a constant-time predicate and no early
//! exit, so rejection timing does not depend on which candidate (if
//! any) nearly matched, nor on how the token was wrong.

use sha2::{Digest, Sha256};
use subtle::{Choice, ConstantTimeEq};

use crate::config::ConfigError;
use crate::error::VaultError;

pub fn token_digest(token: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().into()
}

pub struct Authorizer {
    digests: Vec<[u8; 32]>,
}

impl Authorizer {
    pub fn new(tokens: &[String]) -> Result<Self, ConfigError> {
        if tokens.is_empty() {
            return Err(ConfigError("authorizer requires at least one token".into()));
        }
        Ok(Self {
            digests: tokens.iter().map(|t| token_digest(t)).collect(),
        })
    }

    /// Accept or reject a presented token. The single `Unauthorized`
    /// category never reveals whether the token was malformed, unknown
    /// or revoked.
    pub fn check(&self, token: &str) -> Result<(), VaultError> {
        let digest = token_digest(token);
        let mut ok = Choice::from(0u8);
        for stored in &self.digests {
            ok |= stored.as_slice().ct_eq(digest.as_slice());
        }
        if bool::from(ok) {
            Ok(())
        } else {
            Err(VaultError::Unauthorized)
        }
    }
}

impl std::fmt::Debug for Authorizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Authorizer {{ tokens: {} }}", self.digests.len())
    }
}
