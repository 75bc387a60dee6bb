//! Signaling error type.

use salty_core::{CloseCode, OverflowError, SerializationError, ValidationError};
use salty_crypto::CryptoError;
use thiserror::Error;

/// Everything that can go wrong while signaling.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignalingError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("serialization failed: {0}")]
    Serialization(#[from] SerializationError),

    #[error("protocol error ({code}): {message}")]
    Protocol { code: CloseCode, message: String },

    #[error("crypto failure: {0}")]
    Crypto(CryptoError),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error(transparent)]
    Overflow(#[from] OverflowError),

    #[error("internal state error: {0}")]
    InternalState(String),

    #[error("no shared task found")]
    NoSharedTask,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<CryptoError> for SignalingError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::InvalidKey(msg) => Self::InvalidKey(msg),
            other => Self::Crypto(other),
        }
    }
}

impl SignalingError {
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::InternalState(msg.into())
    }

    pub fn protocol(code: CloseCode, msg: impl Into<String>) -> Self {
        Self::Protocol {
            code,
            message: msg.into(),
        }
    }

    /// Non-critical errors only drop the offending message.
    pub fn is_critical(&self) -> bool {
        match self {
            Self::Validation(err) => err.critical,
            _ => true,
        }
    }

    /// Close code used when this error resets the connection.
    pub fn close_code(&self) -> CloseCode {
        match self {
            Self::Validation(_)
            | Self::Serialization(_)
            | Self::Crypto(_)
            | Self::InvalidKey(_)
            | Self::Overflow(_) => CloseCode::ProtocolError,
            Self::Protocol { code, .. } => *code,
            Self::NoSharedTask => CloseCode::NoSharedTask,
            Self::InternalState(_) | Self::Config(_) => CloseCode::InternalError,
            Self::Transport(_) => CloseCode::GoingAway,
        }
    }
}
