//! Unified error types.

use core::fmt;

/// Any malformed, truncated, tampered or dimension-inconsistent
/// artifact produces this one error. No variant reveals which check
/// rejected the bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeError;

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed ciphertext")
    }
}

impl std::error::Error for DecodeError {}

/// Key generation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyGenError {
    /// Requested dimension is zero or above the wire-format maximum.
    InvalidDimension,
}

impl fmt::Display for KeyGenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidDimension => write!(f, "invalid lattice dimension"),
        }
    }
}

impl std::error::Error for KeyGenError {}

/// Metadata wrap failure (nonce generation).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WrapError;

impl fmt::Display for WrapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "metadata wrap failed")
    }
}

impl std::error::Error for WrapError {}

/// Metadata unwrap failure. The caller-facing surface collapses all
/// three to one category; the distinction exists for internal
/// accounting only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnwrapError {
    /// Blob too short to contain a nonce and a tag.
    Malformed,
    /// AEAD tag verification failed.
    AuthFailed,
    /// Authenticated plaintext is not valid UTF-8.
    NotUtf8,
}

impl fmt::Display for UnwrapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed => write!(f, "malformed metadata blob"),
            Self::AuthFailed => write!(f, "metadata authentication failed"),
            Self::NotUtf8 => write!(f, "metadata plaintext is not utf-8"),
        }
    }
}

impl std::error::Error for UnwrapError {}
