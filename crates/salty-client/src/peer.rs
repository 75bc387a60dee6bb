//! Per-peer signaling state.
//!
//! The server, the initiator (as seen by a responder) and every responder
//! (as seen by the initiator) share one record shape. What differs is the
//! handshake sub-state, kept in [`PeerRole`].

use salty_core::{
    Address, CombinedSequencePair, CookiePair, INITIATOR_ADDRESS, SERVER_ADDRESS,
};
use salty_crypto::{KeyStore, SharedKeyStore};

use crate::error::SignalingError;
use crate::state::{InitiatorHandshakeState, ResponderHandshakeState, ServerHandshakeState};

/// Role-specific part of a [`Peer`].
#[derive(Debug, Clone)]
pub enum PeerRole {
    Server(ServerHandshakeState),
    Initiator {
        state: InitiatorHandshakeState,
        connected: bool,
    },
    Responder {
        state: ResponderHandshakeState,
        /// Arrival order, lower is older.
        counter: u64,
        /// Our session key pair towards this responder.
        session_key: Option<KeyStore>,
    },
}

#[derive(Debug, Clone)]
pub struct Peer {
    address: Address,
    permanent_key: Option<SharedKeyStore>,
    session_key: Option<SharedKeyStore>,
    csn: CombinedSequencePair,
    cookies: CookiePair,
    role: PeerRole,
}

impl Peer {
    fn with_role(address: Address, role: PeerRole) -> Self {
        Self {
            address,
            permanent_key: None,
            session_key: None,
            csn: CombinedSequencePair::new(),
            cookies: CookiePair::new(),
            role,
        }
    }

    pub fn server() -> Self {
        Self::with_role(SERVER_ADDRESS, PeerRole::Server(ServerHandshakeState::New))
    }

    /// The initiator as seen by a responder. Its permanent key is always
    /// known up front.
    pub fn initiator(permanent_key: SharedKeyStore, connected: bool) -> Self {
        let mut peer = Self::with_role(
            INITIATOR_ADDRESS,
            PeerRole::Initiator {
                state: InitiatorHandshakeState::New,
                connected,
            },
        );
        peer.permanent_key = Some(permanent_key);
        peer
    }

    /// A responder as seen by the initiator.
    pub fn responder(address: Address, counter: u64) -> Self {
        Self::with_role(
            address,
            PeerRole::Responder {
                state: ResponderHandshakeState::New,
                counter,
                session_key: None,
            },
        )
    }

    /// A responder whose permanent key is configured in advance. The token
    /// step is skipped.
    pub fn trusted_responder(address: Address, counter: u64, permanent_key: SharedKeyStore) -> Self {
        let mut peer = Self::with_role(
            address,
            PeerRole::Responder {
                state: ResponderHandshakeState::TokenReceived,
                counter,
                session_key: None,
            },
        );
        peer.permanent_key = Some(permanent_key);
        peer
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn role(&self) -> &PeerRole {
        &self.role
    }

    pub fn csn(&mut self) -> &mut CombinedSequencePair {
        &mut self.csn
    }

    pub fn cookies(&self) -> &CookiePair {
        &self.cookies
    }

    pub fn cookies_mut(&mut self) -> &mut CookiePair {
        &mut self.cookies
    }

    pub fn has_permanent_key(&self) -> bool {
        self.permanent_key.is_some()
    }

    pub fn permanent_key(&self) -> Result<&SharedKeyStore, SignalingError> {
        self.permanent_key.as_ref().ok_or_else(|| {
            SignalingError::internal(format!(
                "permanent key of peer 0x{:02x} used before it was set",
                self.address
            ))
        })
    }

    pub fn set_permanent_key(&mut self, key: SharedKeyStore) {
        self.permanent_key = Some(key);
    }

    pub fn session_key(&self) -> Result<&SharedKeyStore, SignalingError> {
        self.session_key.as_ref().ok_or_else(|| {
            SignalingError::internal(format!(
                "session key of peer 0x{:02x} used before it was set",
                self.address
            ))
        })
    }

    pub fn set_session_key(&mut self, key: SharedKeyStore) {
        self.session_key = Some(key);
    }

    pub fn server_state(&self) -> Result<ServerHandshakeState, SignalingError> {
        match self.role {
            PeerRole::Server(state) => Ok(state),
            _ => Err(SignalingError::internal("peer is not the server")),
        }
    }

    pub fn set_server_state(&mut self, next: ServerHandshakeState) -> Result<(), SignalingError> {
        match &mut self.role {
            PeerRole::Server(state) => {
                *state = next;
                Ok(())
            }
            _ => Err(SignalingError::internal("peer is not the server")),
        }
    }

    pub fn initiator_state(&self) -> Result<InitiatorHandshakeState, SignalingError> {
        match self.role {
            PeerRole::Initiator { state, .. } => Ok(state),
            _ => Err(SignalingError::internal("peer is not the initiator")),
        }
    }

    pub fn set_initiator_state(
        &mut self,
        next: InitiatorHandshakeState,
    ) -> Result<(), SignalingError> {
        match &mut self.role {
            PeerRole::Initiator { state, .. } => {
                *state = next;
                Ok(())
            }
            _ => Err(SignalingError::internal("peer is not the initiator")),
        }
    }

    pub fn initiator_connected(&self) -> bool {
        matches!(self.role, PeerRole::Initiator { connected: true, .. })
    }

    pub fn set_initiator_connected(&mut self, value: bool) {
        if let PeerRole::Initiator { connected, .. } = &mut self.role {
            *connected = value;
        }
    }

    pub fn responder_state(&self) -> Result<ResponderHandshakeState, SignalingError> {
        match self.role {
            PeerRole::Responder { state, .. } => Ok(state),
            _ => Err(SignalingError::internal("peer is not a responder")),
        }
    }

    pub fn set_responder_state(
        &mut self,
        next: ResponderHandshakeState,
    ) -> Result<(), SignalingError> {
        match &mut self.role {
            PeerRole::Responder { state, .. } => {
                *state = next;
                Ok(())
            }
            _ => Err(SignalingError::internal("peer is not a responder")),
        }
    }

    /// Arrival counter of a responder.
    pub fn counter(&self) -> Option<u64> {
        match self.role {
            PeerRole::Responder { counter, .. } => Some(counter),
            _ => None,
        }
    }

    /// Our session key pair towards a responder.
    pub fn our_session_key(&self) -> Result<&KeyStore, SignalingError> {
        match &self.role {
            PeerRole::Responder {
                session_key: Some(key),
                ..
            } => Ok(key),
            _ => Err(SignalingError::internal(format!(
                "no session key pair for peer 0x{:02x}",
                self.address
            ))),
        }
    }

    pub fn set_our_session_key(&mut self, key: KeyStore) -> Result<(), SignalingError> {
        match &mut self.role {
            PeerRole::Responder { session_key, .. } => {
                *session_key = Some(key);
                Ok(())
            }
            _ => Err(SignalingError::internal("peer is not a responder")),
        }
    }
}
