//! WebSocket and protocol close codes.

use std::fmt;

use crate::error::ValidationError;

/// Close codes used on the WebSocket and in `close` / `drop-responder`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum CloseCode {
    /// Normal closing of the WebSocket.
    ClosingNormal = 1000,
    /// The endpoint is going away.
    GoingAway = 1001,
    /// No shared subprotocol could be found.
    NoSharedSubprotocol = 1002,
    /// No free responder byte.
    PathFull = 3000,
    /// Invalid message, invalid path length, ...
    ProtocolError = 3001,
    /// Syntax error, ...
    InternalError = 3002,
    /// Handover to the task's channel.
    Handover = 3003,
    /// Dropped by the initiator.
    DroppedByInitiator = 3004,
    /// Initiator could not decrypt a message.
    InitiatorCouldNotDecrypt = 3005,
    /// No shared task was found.
    NoSharedTask = 3006,
    /// Invalid key.
    InvalidKey = 3007,
    /// Timeout.
    Timeout = 3008,
}

impl CloseCode {
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Only these codes may be carried by `drop-responder`.
    pub fn is_valid_drop_reason(self) -> bool {
        matches!(
            self,
            Self::ProtocolError
                | Self::InternalError
                | Self::DroppedByInitiator
                | Self::InitiatorCouldNotDecrypt
        )
    }

    /// Parse the `reason` of a `drop-responder` message.
    pub fn drop_reason(code: u16) -> Result<Self, ValidationError> {
        Self::try_from(code)
            .ok()
            .filter(|c| c.is_valid_drop_reason())
            .ok_or_else(|| {
                ValidationError::critical(format!("invalid drop-responder reason: {}", code))
            })
    }

    pub fn explain(self) -> &'static str {
        match self {
            Self::ClosingNormal => "normal closing",
            Self::GoingAway => "the endpoint is going away",
            Self::NoSharedSubprotocol => "no shared subprotocol could be found",
            Self::PathFull => "no free responder byte",
            Self::ProtocolError => "protocol error",
            Self::InternalError => "internal error",
            Self::Handover => "handover of the signaling channel",
            Self::DroppedByInitiator => "dropped by initiator",
            Self::InitiatorCouldNotDecrypt => "initiator could not decrypt a message",
            Self::NoSharedTask => "no shared task was found",
            Self::InvalidKey => "invalid key",
            Self::Timeout => "timeout",
        }
    }
}

impl TryFrom<u16> for CloseCode {
    type Error = ValidationError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            1000 => Ok(Self::ClosingNormal),
            1001 => Ok(Self::GoingAway),
            1002 => Ok(Self::NoSharedSubprotocol),
            3000 => Ok(Self::PathFull),
            3001 => Ok(Self::ProtocolError),
            3002 => Ok(Self::InternalError),
            3003 => Ok(Self::Handover),
            3004 => Ok(Self::DroppedByInitiator),
            3005 => Ok(Self::InitiatorCouldNotDecrypt),
            3006 => Ok(Self::NoSharedTask),
            3007 => Ok(Self::InvalidKey),
            3008 => Ok(Self::Timeout),
            _ => Err(ValidationError::critical(format!(
                "unknown close code: {}",
                value
            ))),
        }
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        code.as_u16()
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.as_u16(), self.explain())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_contract() {
        for code in [1000u16, 1001, 1002, 3000, 3001, 3002, 3003, 3004, 3005, 3006, 3007, 3008] {
            assert_eq!(CloseCode::try_from(code).unwrap().as_u16(), code);
        }
        assert!(CloseCode::try_from(1003).is_err());
        assert!(CloseCode::try_from(3009).is_err());
    }

    #[test]
    fn test_drop_reasons() {
        assert_eq!(CloseCode::drop_reason(3004).unwrap(), CloseCode::DroppedByInitiator);
        assert_eq!(CloseCode::drop_reason(3005).unwrap(), CloseCode::InitiatorCouldNotDecrypt);
        assert!(CloseCode::drop_reason(3003).is_err());
        assert!(CloseCode::drop_reason(1000).is_err());
    }
}
