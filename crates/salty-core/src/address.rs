//! Relay address space.
//!
//! ```text
//! 0x00         server (or "not yet assigned")
//! 0x01         initiator
//! 0x02..=0xFF  responders
//! ```

/// One-byte relay address.
pub type Address = u8;

/// Address of the relay server. Also used before an address is assigned.
pub const SERVER_ADDRESS: Address = 0x00;

/// Address of the initiator.
pub const INITIATOR_ADDRESS: Address = 0x01;

/// Lowest responder address.
pub const FIRST_RESPONDER_ADDRESS: Address = 0x02;

/// Returns true if `address` lies in the responder range.
pub fn is_responder(address: Address) -> bool {
    address >= FIRST_RESPONDER_ADDRESS
}
