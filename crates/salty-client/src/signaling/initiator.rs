//! Initiator side: the responder pool and the per-responder handshake.
//!
//! Every responder handshakes independently. A failure with one responder
//! drops only that responder; the first responder to complete `auth` wins
//! and all others are dropped.

use salty_core::message::{Auth, Close, DropResponder, Key, NewResponder};
use salty_core::{is_responder, Address, CloseCode, Message, ValidationError, SERVER_ADDRESS};
use salty_crypto::{CryptoBox, KeyStore};
use tracing::{debug, info, warn};

use super::{check_your_cookie, unexpected, InitiatorSide, Side, Signaling};
use crate::error::SignalingError;
use crate::peer::Peer;
use crate::state::{ResponderHandshakeState, SignalingState};
use crate::task::select_task;

impl Signaling {
    fn initiator_side(&self) -> Result<&InitiatorSide, SignalingError> {
        match &self.side {
            Side::Initiator(side) => Ok(side),
            Side::Responder(_) => Err(SignalingError::internal("not an initiator")),
        }
    }

    fn initiator_side_mut(&mut self) -> Result<&mut InitiatorSide, SignalingError> {
        match &mut self.side {
            Side::Initiator(side) => Ok(side),
            Side::Responder(_) => Err(SignalingError::internal("not an initiator")),
        }
    }

    fn pool_responder(&self, id: Address) -> Result<&Peer, SignalingError> {
        self.initiator_side()?
            .pool
            .get(id)
            .ok_or_else(|| unknown_responder(id))
    }

    fn pool_responder_mut(&mut self, id: Address) -> Result<&mut Peer, SignalingError> {
        self.initiator_side_mut()?
            .pool
            .get_mut(id)
            .ok_or_else(|| unknown_responder(id))
    }

    pub(super) fn handle_new_responder(&mut self, msg: NewResponder) -> Result<(), SignalingError> {
        let id = msg.id;
        if !is_responder(id) {
            return Err(ValidationError::critical(format!(
                "new-responder with invalid address 0x{:02x}",
                id
            ))
            .into());
        }

        if self.state == SignalingState::Task {
            info!("dropping late responder 0x{:02x}", id);
            return self.send_drop_responder(id, CloseCode::DroppedByInitiator);
        }
        self.process_new_responder(id)
    }

    /// Track a responder announced by the server.
    pub(super) fn process_new_responder(&mut self, id: Address) -> Result<(), SignalingError> {
        let trusted = match self.initiator_side()?.responder_trusted_key {
            Some(key) => Some(self.permanent_key.shared_key_store(&key)?),
            None => None,
        };

        let evicted = self.initiator_side_mut()?.pool.add(id, trusted);
        debug!("new responder 0x{:02x}", id);

        if let Some(victim) = evicted {
            info!("responder pool full, dropping 0x{:02x}", victim);
            self.send_drop_responder(victim, CloseCode::DroppedByInitiator)?;
        }
        Ok(())
    }

    /// Remove a responder locally without telling the server.
    pub(super) fn forget_responder(&mut self, id: Address) -> Result<(), SignalingError> {
        if self.initiator_side_mut()?.pool.remove(id).is_some() {
            debug!("removed responder 0x{:02x}", id);
        }
        Ok(())
    }

    fn send_drop_responder(&mut self, id: Address, reason: CloseCode) -> Result<(), SignalingError> {
        let drop = Message::DropResponder(DropResponder::new(id, reason));
        self.send(&drop, SERVER_ADDRESS)
    }

    fn drop_responder(&mut self, id: Address, reason: CloseCode) -> Result<(), SignalingError> {
        self.forget_responder(id)?;
        info!("dropping responder 0x{:02x}: {}", id, reason);
        self.send_drop_responder(id, reason)
    }

    /// A frame from a responder during the peer handshake.
    pub(super) fn on_responder_handshake_frame(
        &mut self,
        nonce: &salty_core::SignalingChannelNonce,
        sealed: &CryptoBox,
    ) -> Result<(), SignalingError> {
        let id = nonce.source;
        match self.handle_responder_frame(nonce, sealed) {
            Ok(Some(task_index)) => self.promote_responder(id, task_index),
            Ok(None) => Ok(()),
            Err(SignalingError::NoSharedTask) => Err(SignalingError::NoSharedTask),
            Err(err) if !err.is_critical() => {
                warn!("ignoring message from responder 0x{:02x}: {}", id, err);
                Ok(())
            }
            Err(err @ SignalingError::Crypto(_)) => {
                warn!("responder 0x{:02x}: {}", id, err);
                self.drop_responder(id, CloseCode::InitiatorCouldNotDecrypt)
            }
            Err(err) => {
                warn!("responder 0x{:02x}: {}", id, err);
                self.drop_responder(id, CloseCode::ProtocolError)
            }
        }
    }

    /// Returns the chosen task once the responder is authenticated.
    fn handle_responder_frame(
        &mut self,
        nonce: &salty_core::SignalingChannelNonce,
        sealed: &CryptoBox,
    ) -> Result<Option<usize>, SignalingError> {
        self.validate_peer_nonce(nonce)?;

        let id = nonce.source;
        match self.pool_responder(id)?.responder_state()? {
            ResponderHandshakeState::New => self.handle_token(id, sealed).map(|_| None),
            ResponderHandshakeState::TokenReceived => {
                self.handle_responder_key(id, sealed).map(|_| None)
            }
            ResponderHandshakeState::KeySent => self.handle_responder_auth(id, sealed).map(Some),
            state => Err(ValidationError::critical(format!(
                "unexpected message from responder 0x{:02x} in state {:?}",
                id, state
            ))
            .into()),
        }
    }

    fn handle_token(&mut self, id: Address, sealed: &CryptoBox) -> Result<(), SignalingError> {
        let plaintext = self.initiator_side()?.auth_token.decrypt(sealed)?;
        let responder_key = match Message::decode(&plaintext)? {
            Message::Token(token) => token.validate()?,
            other => return Err(unexpected("token", &other)),
        };
        let permanent_key = self.permanent_key.shared_key_store(&responder_key)?;

        let responder = self.pool_responder_mut(id)?;
        responder.set_permanent_key(permanent_key);
        responder.set_responder_state(ResponderHandshakeState::TokenReceived)?;
        debug!("responder 0x{:02x} sent a valid token", id);
        Ok(())
    }

    fn handle_responder_key(&mut self, id: Address, sealed: &CryptoBox) -> Result<(), SignalingError> {
        let provider = self.permanent_key.provider().clone();

        let responder = self.pool_responder_mut(id)?;
        let plaintext = responder.permanent_key()?.decrypt(sealed)?;
        let their_session_key = match Message::decode(&plaintext)? {
            Message::Key(key) => key.validate()?,
            other => return Err(unexpected("key", &other)),
        };

        let session_key = KeyStore::generate(provider);
        let our_session_public = *session_key.public_key();
        responder.set_session_key(session_key.shared_key_store(&their_session_key)?);
        responder.set_our_session_key(session_key)?;
        responder.set_responder_state(ResponderHandshakeState::KeyReceived)?;

        self.send(&Message::Key(Key::new(&our_session_public)), id)?;
        self.pool_responder_mut(id)?
            .set_responder_state(ResponderHandshakeState::KeySent)?;
        Ok(())
    }

    fn handle_responder_auth(&mut self, id: Address, sealed: &CryptoBox) -> Result<usize, SignalingError> {
        let responder = self.pool_responder_mut(id)?;
        let plaintext = responder.session_key()?.decrypt(sealed)?;
        let auth = match Message::decode(&plaintext)? {
            Message::Auth(auth) => auth.validate_from_responder()?,
            other => return Err(unexpected("auth", &other)),
        };
        check_your_cookie(responder.cookies().ours(), &auth.your_cookie)?;
        responder.set_responder_state(ResponderHandshakeState::AuthReceived)?;
        let their_cookie = *responder
            .cookies()
            .theirs()
            .ok_or_else(|| SignalingError::internal("responder cookie not known"))?;

        let chosen = {
            let ours: Vec<&str> = self.tasks.iter().map(|task| task.name()).collect();
            select_task(&ours, &auth.tasks)
        };
        let index = match chosen {
            Some(index) => index,
            None => {
                warn!(
                    "no shared task with responder 0x{:02x}, offered {:?}",
                    id, auth.tasks
                );
                let close = Message::Close(Close::new(CloseCode::NoSharedTask));
                if let Err(err) = self.send(&close, id) {
                    warn!("could not send close to responder 0x{:02x}: {}", id, err);
                }
                return Err(SignalingError::NoSharedTask);
            }
        };

        let task = &mut self.tasks[index];
        let task_name = task.name().to_string();
        let peer_data = auth.data.get(&task_name).cloned().flatten();
        task.init(peer_data.as_ref())?;
        let task_data = task.data();

        let reply = Message::Auth(Auth::from_initiator(&their_cookie, task_name, task_data));
        self.send(&reply, id)?;
        self.pool_responder_mut(id)?
            .set_responder_state(ResponderHandshakeState::AuthSent)?;
        Ok(index)
    }

    /// Make `id` the authenticated responder and drop everyone else.
    fn promote_responder(&mut self, id: Address, task_index: usize) -> Result<(), SignalingError> {
        let side = self.initiator_side_mut()?;
        let responder = side
            .pool
            .remove(id)
            .ok_or_else(|| SignalingError::internal(format!("responder 0x{:02x} vanished", id)))?;
        side.responder = Some(responder);

        for other in side.pool.addresses() {
            self.drop_responder(other, CloseCode::DroppedByInitiator)?;
        }
        self.peer_handshake_done(task_index)
    }
}

fn unknown_responder(id: Address) -> SignalingError {
    ValidationError::non_critical(format!("unknown responder 0x{:02x}", id)).into()
}
