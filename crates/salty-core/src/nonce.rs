//! Signaling channel nonce.
//!
//! # Layout
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                            Cookie                             |
//! |                          (16 bytes)                           |
//! |                                                               |
//! |                                                               |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |    Source     |  Destination  |        Overflow Number        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Sequence Number                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Overflow and sequence are big-endian. The trailing 8 bytes
//! (source through sequence) form the [`MessageId`] the server echoes back
//! in `send-error`.

use std::fmt;

use crate::address::Address;
use crate::cookie::{Cookie, COOKIE_LENGTH};
use crate::csn::CombinedSequenceSnapshot;
use crate::error::{SerializationError, ValidationError};

/// Nonce length in bytes.
pub const NONCE_LENGTH: usize = 24;

/// Message id length in bytes.
pub const MESSAGE_ID_LENGTH: usize = 8;

/// Decoded signaling channel nonce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalingChannelNonce {
    pub cookie: Cookie,
    pub source: Address,
    pub destination: Address,
    pub csn: CombinedSequenceSnapshot,
}

impl SignalingChannelNonce {
    pub fn new(
        cookie: Cookie,
        source: Address,
        destination: Address,
        csn: CombinedSequenceSnapshot,
    ) -> Self {
        Self {
            cookie,
            source,
            destination,
            csn,
        }
    }

    /// Encode to the 24-byte wire form.
    pub fn encode(&self) -> [u8; NONCE_LENGTH] {
        let mut buf = [0u8; NONCE_LENGTH];
        buf[..COOKIE_LENGTH].copy_from_slice(self.cookie.as_bytes());
        buf[COOKIE_LENGTH..].copy_from_slice(&self.message_id().0);
        buf
    }

    /// Decode from the leading 24 bytes of `buf`.
    pub fn decode(buf: &[u8]) -> Result<Self, SerializationError> {
        if buf.len() < NONCE_LENGTH {
            return Err(SerializationError::TooShort(buf.len(), NONCE_LENGTH));
        }

        let mut cookie = [0u8; COOKIE_LENGTH];
        cookie.copy_from_slice(&buf[..COOKIE_LENGTH]);

        let mut id = [0u8; MESSAGE_ID_LENGTH];
        id.copy_from_slice(&buf[COOKIE_LENGTH..NONCE_LENGTH]);
        let id = MessageId(id);

        Ok(Self {
            cookie: Cookie::from_bytes(cookie),
            source: id.source(),
            destination: id.destination(),
            csn: id.csn(),
        })
    }

    pub fn message_id(&self) -> MessageId {
        let mut id = [0u8; MESSAGE_ID_LENGTH];
        id[0] = self.source;
        id[1] = self.destination;
        id[2..4].copy_from_slice(&self.csn.overflow.to_be_bytes());
        id[4..8].copy_from_slice(&self.csn.sequence.to_be_bytes());
        MessageId(id)
    }
}

/// Source, destination and CSN of a sent message.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageId([u8; MESSAGE_ID_LENGTH]);

impl MessageId {
    pub fn from_bytes(bytes: [u8; MESSAGE_ID_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Parse the `id` field of a `send-error` message.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ValidationError> {
        let bytes: [u8; MESSAGE_ID_LENGTH] = bytes.try_into().map_err(|_| {
            ValidationError::critical(format!(
                "message id must be {} bytes, got {}",
                MESSAGE_ID_LENGTH,
                bytes.len()
            ))
        })?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; MESSAGE_ID_LENGTH] {
        &self.0
    }

    pub fn source(&self) -> Address {
        self.0[0]
    }

    pub fn destination(&self) -> Address {
        self.0[1]
    }

    pub fn csn(&self) -> CombinedSequenceSnapshot {
        CombinedSequenceSnapshot::new(
            u16::from_be_bytes([self.0[2], self.0[3]]),
            u32::from_be_bytes([self.0[4], self.0[5], self.0[6], self.0[7]]),
        )
    }
}

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageId({})", hex::encode(self.0))
    }
}
