//! Core SaltyRTC wire types.
//!
//! This crate provides:
//! - The relay address space
//! - Cookies, combined sequence numbers and the 24-byte signaling nonce
//! - Close codes
//! - Signaling message payloads and their validation
//! - A bounded history of sent messages
//!
//! Nothing in here performs I/O or cryptography. Frames are
//! `nonce ‖ payload`, where the payload is a MessagePack map that is boxed
//! by the signaling engine for everything except the two hello messages.

#![forbid(unsafe_code)]

pub mod address;
pub mod close_code;
pub mod cookie;
pub mod csn;
pub mod error;
pub mod history;
pub mod message;
pub mod nonce;

pub use address::{
    is_responder, Address, FIRST_RESPONDER_ADDRESS, INITIATOR_ADDRESS, SERVER_ADDRESS,
};
pub use close_code::CloseCode;
pub use cookie::{Cookie, CookiePair, COOKIE_LENGTH};
pub use csn::{CombinedSequence, CombinedSequencePair, CombinedSequenceSnapshot};
pub use error::{OverflowError, SerializationError, ValidationError};
pub use history::{MessageHistory, DEFAULT_HISTORY_CAPACITY};
pub use message::{Message, RawKey, TaskMessage, KEY_LENGTH};
pub use nonce::{MessageId, SignalingChannelNonce, MESSAGE_ID_LENGTH, NONCE_LENGTH};

/// The only supported WebSocket subprotocol.
pub const SUBPROTOCOL: &str = "v1.saltyrtc.org";

/// Default ping interval requested in `client-auth`, in seconds. Zero
/// disables server pings.
pub const DEFAULT_PING_INTERVAL: u32 = 0;
