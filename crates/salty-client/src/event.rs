//! Outputs of the signaling state machine.

use rmpv::Value;
use salty_core::{Address, CloseCode};

use crate::error::SignalingError;
use crate::state::SignalingState;

/// Something the transport has to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transmit {
    /// Send a binary WebSocket frame.
    Frame(Vec<u8>),
    /// Close the WebSocket with this code.
    Close(CloseCode),
}

/// Something the application may want to know.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalingEvent {
    StateChanged(SignalingState),
    /// An `application` message from the peer.
    ApplicationMessage(Value),
    /// Data surfaced by the negotiated task.
    TaskData(Value),
    /// The server reported that a peer left.
    PeerDisconnected(Address),
    /// The server could not deliver a message to this peer.
    SignalingConnectionLost(Address),
    /// The peer sent `close`.
    PeerClosed(CloseCode),
    /// Both handover latches are set.
    Handover,
    /// The WebSocket closed with this code.
    Closed(u16),
    Error(SignalingError),
}
