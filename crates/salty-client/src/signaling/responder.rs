//! Responder side: the handshake with the initiator.

use salty_core::message::{Auth, Key, Token};
use salty_core::{CloseCode, Message, ValidationError, INITIATOR_ADDRESS};
use salty_crypto::{CryptoBox, KeyStore};
use tracing::{debug, info, warn};

use super::{check_your_cookie, unexpected, ResponderSide, Side, Signaling};
use crate::error::SignalingError;
use crate::event::SignalingEvent;
use crate::peer::Peer;
use crate::state::{InitiatorHandshakeState, SignalingState};

impl Signaling {
    fn responder_side(&self) -> Result<&ResponderSide, SignalingError> {
        match &self.side {
            Side::Responder(side) => Ok(side),
            Side::Initiator(_) => Err(SignalingError::internal("not a responder")),
        }
    }

    pub(super) fn responder_side_mut(&mut self) -> Result<&mut ResponderSide, SignalingError> {
        match &mut self.side {
            Side::Responder(side) => Ok(side),
            Side::Initiator(_) => Err(SignalingError::internal("not a responder")),
        }
    }

    pub(super) fn handle_new_initiator(&mut self) -> Result<(), SignalingError> {
        if self.state == SignalingState::Task {
            warn!("new initiator connected while in task state");
            self.reset_connection(CloseCode::ClosingNormal);
            return Ok(());
        }

        info!("new initiator connected, restarting peer handshake");
        self.reset_initiator(true)?;
        self.initiate_peer_handshake()
    }

    /// Forget all handshake progress with the initiator.
    pub(super) fn reset_initiator(&mut self, connected: bool) -> Result<(), SignalingError> {
        let side = self.responder_side_mut()?;
        side.initiator = Peer::initiator(side.initiator_permanent_key.clone(), connected);
        side.session_key = None;
        Ok(())
    }

    /// Send `token` (unless our key is trusted) and `key`.
    pub(super) fn initiate_peer_handshake(&mut self) -> Result<(), SignalingError> {
        if self.responder_side()?.auth_token.is_some() {
            let token = Message::Token(Token::new(self.permanent_key.public_key()));
            self.send(&token, INITIATOR_ADDRESS)?;
            self.responder_side_mut()?
                .initiator
                .set_initiator_state(InitiatorHandshakeState::TokenSent)?;
        } else {
            debug!("initiator trusts our key, skipping token");
        }

        let session_key = KeyStore::generate(self.permanent_key.provider().clone());
        let key = Message::Key(Key::new(session_key.public_key()));
        self.responder_side_mut()?.session_key = Some(session_key);
        self.send(&key, INITIATOR_ADDRESS)?;
        self.responder_side_mut()?
            .initiator
            .set_initiator_state(InitiatorHandshakeState::KeySent)?;
        Ok(())
    }

    pub(super) fn on_initiator_handshake_frame(&mut self, sealed: &CryptoBox) -> Result<(), SignalingError> {
        match self.responder_side()?.initiator.initiator_state()? {
            InitiatorHandshakeState::KeySent => self.handle_initiator_key(sealed),
            InitiatorHandshakeState::AuthSent => self.handle_initiator_auth(sealed),
            state => Err(ValidationError::critical(format!(
                "unexpected message from initiator in state {:?}",
                state
            ))
            .into()),
        }
    }

    fn handle_initiator_key(&mut self, sealed: &CryptoBox) -> Result<(), SignalingError> {
        let side = self.responder_side_mut()?;
        let plaintext = side.initiator.permanent_key()?.decrypt(sealed)?;
        let their_session_key = match Message::decode(&plaintext)? {
            Message::Key(key) => key.validate()?,
            other => return Err(unexpected("key", &other)),
        };

        let our_session_key = side
            .session_key
            .as_ref()
            .ok_or_else(|| SignalingError::internal("session key pair missing"))?;
        let shared = our_session_key.shared_key_store(&their_session_key)?;
        side.initiator.set_session_key(shared);
        side.initiator
            .set_initiator_state(InitiatorHandshakeState::KeyReceived)?;
        let their_cookie = *side
            .initiator
            .cookies()
            .theirs()
            .ok_or_else(|| SignalingError::internal("initiator cookie not known"))?;

        let offer = self
            .tasks
            .iter()
            .map(|task| (task.name().to_string(), task.data()))
            .collect();
        self.send(&Message::Auth(Auth::from_responder(&their_cookie, offer)), INITIATOR_ADDRESS)?;
        self.responder_side_mut()?
            .initiator
            .set_initiator_state(InitiatorHandshakeState::AuthSent)?;
        Ok(())
    }

    fn handle_initiator_auth(&mut self, sealed: &CryptoBox) -> Result<(), SignalingError> {
        let side = self.responder_side_mut()?;
        let plaintext = side.initiator.session_key()?.decrypt(sealed)?;
        let auth = match Message::decode(&plaintext)? {
            Message::Auth(auth) => auth.validate_from_initiator()?,
            Message::Close(close) => {
                let reason = close.validate()?;
                warn!("initiator closed during the handshake: {}", reason);
                self.events.push_back(SignalingEvent::PeerClosed(reason));
                return Err(match reason {
                    CloseCode::NoSharedTask => SignalingError::NoSharedTask,
                    other => SignalingError::protocol(
                        other,
                        "initiator closed the connection during the handshake",
                    ),
                });
            }
            other => return Err(unexpected("auth", &other)),
        };
        check_your_cookie(side.initiator.cookies().ours(), &auth.your_cookie)?;

        let index = self
            .tasks
            .iter()
            .position(|task| task.name() == auth.task)
            .ok_or_else(|| {
                ValidationError::critical(format!("initiator chose unknown task {}", auth.task))
            })?;
        self.tasks[index].init(auth.data.as_ref())?;

        self.responder_side_mut()?
            .initiator
            .set_initiator_state(InitiatorHandshakeState::AuthReceived)?;
        self.peer_handshake_done(index)
    }
}
