//! Error types for the key store.

use std::fmt;

#[derive(Debug)]
pub enum KeyStoreError {
    /// Key directory is in a state that cannot be served: some but not
    /// all artifacts present, or an artifact failed to parse. Fatal at
    /// startup; operator recovery is to restore or wipe the directory.
    Corrupt(String),
    /// Fresh generation could not complete. Nothing was persisted;
    /// safe to retry at the next process start.
    GenerationFailed(String),
}

impl fmt::Display for KeyStoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Corrupt(msg) => write!(f, "key store corrupt: {}", msg),
            Self::GenerationFailed(msg) => write!(f, "key generation failed: {}", msg),
        }
    }
}

impl std::error::Error for KeyStoreError {}
