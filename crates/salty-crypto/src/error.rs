//! Crypto error type.

use thiserror::Error;

/// Errors raised by key stores and box ciphers.
///
/// Encryption and decryption never return empty values on failure; every
/// failure surfaces as one of these variants.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("invalid length: expected {expected} bytes, got {got}")]
    InvalidLength { expected: usize, got: usize },
}

impl CryptoError {
    /// Create an invalid key error from any displayable type.
    pub fn invalid_key(msg: impl std::fmt::Display) -> Self {
        Self::InvalidKey(msg.to_string())
    }
}
