//! Error types shared by the wire primitives.

use thiserror::Error;

/// A received value failed validation.
///
/// Critical failures are protocol violations that must tear down the
/// connection (or, for an initiator, the offending responder). Non-critical
/// failures only cause the message to be dropped.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ValidationError {
    pub message: String,
    pub critical: bool,
}

impl ValidationError {
    pub fn critical(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            critical: true,
        }
    }

    pub fn non_critical(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            critical: false,
        }
    }
}

/// Framing or payload encoding failed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SerializationError {
    #[error("frame too short: {0} bytes, minimum {1}")]
    TooShort(usize, usize),

    #[error("could not encode message: {0}")]
    Encode(String),

    #[error("could not decode message: {0}")]
    Decode(String),

    #[error("message is not a map")]
    NotAMap,

    #[error("message has no string `type` field")]
    MissingType,
}

/// The combined sequence number space is exhausted.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("combined sequence number overflow")]
pub struct OverflowError;
