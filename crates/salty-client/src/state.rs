//! Connection and handshake states.

use std::fmt;

/// Which side of the handshake we play.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingRole {
    Initiator,
    Responder,
}

impl fmt::Display for SignalingRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initiator => f.write_str("initiator"),
            Self::Responder => f.write_str("responder"),
        }
    }
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingState {
    New,
    WsConnecting,
    ServerHandshake,
    PeerHandshake,
    Task,
    Closing,
    Closed,
    Error,
}

impl SignalingState {
    fn rank(self) -> u8 {
        match self {
            Self::New => 0,
            Self::WsConnecting => 1,
            Self::ServerHandshake => 2,
            Self::PeerHandshake => 3,
            Self::Task => 4,
            Self::Closing => 5,
            Self::Closed => 6,
            Self::Error => 7,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closing | Self::Closed | Self::Error)
    }

    /// Forward progression only. A fresh connect may restart a terminal
    /// (or new) connection from `WsConnecting`.
    pub fn can_advance_to(self, next: Self) -> bool {
        match next {
            Self::WsConnecting => {
                matches!(self, Self::New | Self::Closed | Self::Error | Self::WsConnecting)
            }
            Self::Error => self != Self::Error,
            _ => next.rank() > self.rank() && self != Self::Error,
        }
    }
}

impl fmt::Display for SignalingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::New => "new",
            Self::WsConnecting => "ws-connecting",
            Self::ServerHandshake => "server-handshake",
            Self::PeerHandshake => "peer-handshake",
            Self::Task => "task",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Handshake with the relay server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerHandshakeState {
    New,
    HelloSent,
    AuthSent,
    Done,
}

/// The initiator's view of one responder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponderHandshakeState {
    New,
    TokenReceived,
    KeyReceived,
    KeySent,
    AuthReceived,
    AuthSent,
}

/// The responder's view of the initiator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitiatorHandshakeState {
    New,
    TokenSent,
    KeySent,
    KeyReceived,
    AuthSent,
    AuthReceived,
}

/// Two one-way latches. Once both are set, the task owns the transport.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandoverState {
    local: bool,
    peer: bool,
}

impl HandoverState {
    pub fn local(&self) -> bool {
        self.local
    }

    pub fn peer(&self) -> bool {
        self.peer
    }

    pub fn both(&self) -> bool {
        self.local && self.peer
    }

    /// Set the local latch. Returns true if this completed the handover.
    pub fn set_local(&mut self) -> bool {
        let was_done = self.both();
        self.local = true;
        !was_done && self.both()
    }

    /// Set the peer latch. Returns true if this completed the handover.
    pub fn set_peer(&mut self) -> bool {
        let was_done = self.both();
        self.peer = true;
        !was_done && self.both()
    }
}
