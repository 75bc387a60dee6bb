//! Sans-IO signaling state machine.
//!
//! [`Signaling`] consumes WebSocket events (`on_open`, `on_frame`,
//! `on_close`) and produces [`Transmit`]s for the transport and
//! [`SignalingEvent`]s for the application. It never blocks and never owns
//! a socket, so the same engine runs under the tokio driver in
//! [`crate::client`] and under an in-memory relay in tests.
//!
//! # Frame pipeline
//!
//! Every incoming frame is `nonce ‖ payload`:
//! 1. The nonce is parsed and its source and destination are checked
//!    against the connection and server handshake state.
//! 2. The sending peer's combined sequence number and cookie are checked.
//! 3. The payload is opened with the key that the current handshake step
//!    dictates and decoded.
//! 4. The message is dispatched on the connection state.
//!
//! Role-specific handling lives in `initiator.rs` and `responder.rs`.

mod initiator;
mod responder;

use std::collections::VecDeque;

use rmpv::Value;
use salty_core::message::{
    Application, ClientAuth, ClientHello, Close, Disconnected, SendError, ServerAuth, ServerHello,
};
use salty_core::{
    is_responder, Address, CloseCode, Cookie, Message, MessageHistory, SignalingChannelNonce,
    TaskMessage, ValidationError, INITIATOR_ADDRESS, NONCE_LENGTH, SERVER_ADDRESS, SUBPROTOCOL,
};
use salty_crypto::{AuthToken, CryptoBox, KeyStore, PublicKey, SharedKeyStore};
use tracing::{debug, error, info, warn};

use crate::config::{RoleConfig, SignalingConfig};
use crate::error::SignalingError;
use crate::event::{SignalingEvent, Transmit};
use crate::peer::Peer;
use crate::pool::ResponderPool;
use crate::state::{HandoverState, ServerHandshakeState, SignalingRole, SignalingState};
use crate::task::{Task, TaskAction, TaskContext};

/// What we remember about a sent message, for `send-error` reports.
#[derive(Debug, Clone)]
struct SentMessage {
    receiver: Address,
    message_type: String,
}

struct InitiatorSide {
    auth_token: AuthToken,
    responder_trusted_key: Option<PublicKey>,
    /// Responders still in their handshake.
    pool: ResponderPool,
    /// The authenticated responder.
    responder: Option<Peer>,
}

struct ResponderSide {
    auth_token: Option<AuthToken>,
    initiator_permanent_key: SharedKeyStore,
    initiator: Peer,
    /// Our session key pair towards the initiator.
    session_key: Option<KeyStore>,
}

enum Side {
    Initiator(InitiatorSide),
    Responder(ResponderSide),
}

/// How the payload of an outgoing message is protected.
enum Sealing {
    Plain,
    AuthToken,
    Shared(SharedKeyStore),
}

pub struct Signaling {
    state: SignalingState,
    permanent_key: KeyStore,
    server_key: Option<PublicKey>,
    ping_interval: u32,
    address: Address,
    server: Peer,
    side: Side,
    tasks: Vec<Box<dyn Task>>,
    /// Index into `tasks` once negotiated.
    task: Option<usize>,
    handover: HandoverState,
    history: MessageHistory<SentMessage>,
    transmits: VecDeque<Transmit>,
    events: VecDeque<SignalingEvent>,
}

impl Signaling {
    pub fn new(config: SignalingConfig) -> Result<Self, SignalingError> {
        let SignalingConfig {
            permanent_key,
            server_key,
            role,
            tasks,
            ping_interval,
            history_capacity,
        } = config;

        if tasks.is_empty() {
            return Err(SignalingError::Config("at least one task is required".into()));
        }

        let side = match role {
            RoleConfig::Initiator {
                auth_token,
                responder_trusted_key,
            } => Side::Initiator(InitiatorSide {
                auth_token,
                responder_trusted_key,
                pool: ResponderPool::new(),
                responder: None,
            }),
            RoleConfig::Responder {
                initiator_public_key,
                auth_token,
            } => {
                let initiator_permanent_key = permanent_key.shared_key_store(&initiator_public_key)?;
                Side::Responder(ResponderSide {
                    auth_token,
                    initiator: Peer::initiator(initiator_permanent_key.clone(), false),
                    initiator_permanent_key,
                    session_key: None,
                })
            }
        };

        Ok(Self {
            state: SignalingState::New,
            permanent_key,
            server_key,
            ping_interval,
            address: SERVER_ADDRESS,
            server: Peer::server(),
            side,
            tasks,
            task: None,
            handover: HandoverState::default(),
            history: MessageHistory::new(history_capacity),
            transmits: VecDeque::new(),
            events: VecDeque::new(),
        })
    }

    pub fn role(&self) -> SignalingRole {
        match self.side {
            Side::Initiator(_) => SignalingRole::Initiator,
            Side::Responder(_) => SignalingRole::Responder,
        }
    }

    pub fn state(&self) -> SignalingState {
        self.state
    }

    /// Our relay address. `0x00` until the server assigned one.
    pub fn address(&self) -> Address {
        self.address
    }

    pub fn handover(&self) -> HandoverState {
        self.handover
    }

    pub fn permanent_key(&self) -> &KeyStore {
        &self.permanent_key
    }

    pub fn auth_token(&self) -> Option<&AuthToken> {
        match &self.side {
            Side::Initiator(side) => Some(&side.auth_token),
            Side::Responder(side) => side.auth_token.as_ref(),
        }
    }

    /// Name of the negotiated task.
    pub fn task_name(&self) -> Option<&str> {
        self.task
            .and_then(|index| self.tasks.get(index))
            .map(|task| task.name())
    }

    /// Relay address of the authenticated peer.
    pub fn peer_address(&self) -> Option<Address> {
        match &self.side {
            Side::Initiator(side) => side.responder.as_ref().map(|peer| peer.address()),
            Side::Responder(_) => Some(INITIATOR_ADDRESS),
        }
    }

    /// Responders still in their handshake, oldest first.
    pub fn pending_responders(&self) -> Vec<Address> {
        match &self.side {
            Side::Initiator(side) => side.pool.addresses(),
            Side::Responder(_) => Vec::new(),
        }
    }

    pub fn poll_transmit(&mut self) -> Option<Transmit> {
        self.transmits.pop_front()
    }

    pub fn poll_event(&mut self) -> Option<SignalingEvent> {
        self.events.pop_front()
    }

    /// A WebSocket connect attempt is about to start.
    pub fn on_connecting(&mut self) {
        if self.state == SignalingState::WsConnecting {
            return;
        }
        if !self.state.can_advance_to(SignalingState::WsConnecting) {
            warn!("cannot start connecting in state {}", self.state);
            return;
        }
        self.clear_session();
        self.handover = HandoverState::default();
        self.set_state(SignalingState::WsConnecting);
    }

    /// The WebSocket is open and the subprotocol was accepted.
    pub fn on_open(&mut self) {
        if self.state != SignalingState::WsConnecting {
            warn!("websocket opened in state {}", self.state);
            return;
        }
        info!("connected to server, starting server handshake");
        self.set_state(SignalingState::ServerHandshake);
    }

    /// A binary frame arrived on the WebSocket.
    pub fn on_frame(&mut self, frame: &[u8]) {
        if let Err(err) = self.handle_frame(frame) {
            self.handle_error(err);
        }
    }

    /// A signaling frame arrived through the task's own channel.
    pub fn on_task_channel_frame(&mut self, frame: &[u8]) {
        if !self.handover.peer() {
            warn!("dropping task channel frame before peer handover");
            return;
        }
        if let Err(err) = self.handle_task_channel_frame(frame) {
            self.handle_error(err);
        }
    }

    /// The WebSocket closed.
    pub fn on_close(&mut self, code: u16) {
        if self.state == SignalingState::Task
            && self.handover.both()
            && code == CloseCode::Handover.as_u16()
        {
            info!("relay connection closed after handover");
            return;
        }
        if matches!(
            self.state,
            SignalingState::New | SignalingState::Closed | SignalingState::Error
        ) {
            return;
        }

        match CloseCode::try_from(code) {
            Ok(known) => info!("websocket closed: {} ({})", code, known.explain()),
            Err(_) => info!("websocket closed: {}", code),
        }

        self.close_task(CloseCode::try_from(code).unwrap_or(CloseCode::GoingAway));
        self.set_state(SignalingState::Closing);
        self.set_state(SignalingState::Closed);
        self.events.push_back(SignalingEvent::Closed(code));
        self.clear_session();
    }

    /// The transport failed. While still connecting this is terminal.
    pub fn on_transport_error(&mut self, message: &str) {
        error!("transport error: {}", message);
        self.events
            .push_back(SignalingEvent::Error(SignalingError::Transport(message.to_string())));
        if self.state == SignalingState::WsConnecting {
            self.set_state(SignalingState::Error);
        }
    }

    /// Close the connection. In task state the peer is told with
    /// `close(1001)` first.
    pub fn disconnect(&mut self) {
        match self.state {
            SignalingState::New
            | SignalingState::Closing
            | SignalingState::Closed
            | SignalingState::Error => return,
            SignalingState::WsConnecting => {
                self.set_state(SignalingState::Closing);
                self.set_state(SignalingState::Closed);
                self.events
                    .push_back(SignalingEvent::Closed(CloseCode::ClosingNormal.as_u16()));
                return;
            }
            SignalingState::Task => {
                if let Some(peer) = self.peer_address() {
                    let close = Message::Close(Close::new(CloseCode::GoingAway));
                    if let Err(err) = self.send(&close, peer) {
                        warn!("could not send close to peer: {}", err);
                    }
                }
                self.close_task(CloseCode::GoingAway);
            }
            SignalingState::ServerHandshake | SignalingState::PeerHandshake => {}
        }
        self.reset_connection(CloseCode::ClosingNormal);
    }

    /// Send an `application` message to the authenticated peer.
    pub fn send_application_message(&mut self, data: Value) -> Result<(), SignalingError> {
        let peer = self.require_task_peer()?;
        self.send(&Message::Application(Application { data }), peer)
    }

    /// Send a message of the negotiated task to the authenticated peer.
    pub fn send_task_message(&mut self, message: TaskMessage) -> Result<(), SignalingError> {
        let peer = self.require_task_peer()?;
        let task = self.active_task_mut()?;
        if !task
            .supported_message_types()
            .iter()
            .any(|kind| *kind == message.kind())
        {
            return Err(SignalingError::internal(format!(
                "task {} does not handle {} messages",
                task.name(),
                message.kind()
            )));
        }
        self.send(&Message::Task(message), peer)
    }

    fn require_task_peer(&self) -> Result<Address, SignalingError> {
        if self.state != SignalingState::Task {
            return Err(SignalingError::internal(format!(
                "cannot send to peer in state {}",
                self.state
            )));
        }
        self.peer_address()
            .ok_or_else(|| SignalingError::internal("no authenticated peer"))
    }

    fn set_state(&mut self, next: SignalingState) {
        if self.state == next {
            return;
        }
        if !self.state.can_advance_to(next) {
            warn!("ignoring state change {} -> {}", self.state, next);
            return;
        }
        debug!("signaling state {} -> {}", self.state, next);
        self.state = next;
        self.events.push_back(SignalingEvent::StateChanged(next));
    }

    fn handle_error(&mut self, err: SignalingError) {
        if !err.is_critical() {
            warn!("dropping message: {}", err);
            return;
        }
        error!("signaling failed: {}", err);
        let code = err.close_code();
        self.events.push_back(SignalingEvent::Error(err));
        self.reset_connection(code);
    }

    /// Close the WebSocket with `code` and forget the session.
    fn reset_connection(&mut self, code: CloseCode) {
        if matches!(
            self.state,
            SignalingState::New
                | SignalingState::Closing
                | SignalingState::Closed
                | SignalingState::Error
        ) {
            return;
        }
        info!("closing connection: {}", code);
        self.close_task(code);
        self.set_state(SignalingState::Closing);
        self.transmits.push_back(Transmit::Close(code));
        self.clear_session();
    }

    fn clear_session(&mut self) {
        self.address = SERVER_ADDRESS;
        self.server = Peer::server();
        self.history.clear();
        self.task = None;
        match &mut self.side {
            Side::Initiator(side) => {
                side.pool.clear();
                side.responder = None;
            }
            Side::Responder(side) => {
                side.initiator = Peer::initiator(side.initiator_permanent_key.clone(), false);
                side.session_key = None;
            }
        }
    }

    /// Tell the negotiated task the channel is gone. Runs at most once per
    /// session.
    fn close_task(&mut self, reason: CloseCode) {
        if let Some(task) = self.task.take().and_then(|index| self.tasks.get_mut(index)) {
            task.close(reason);
        }
    }

    fn active_task_mut(&mut self) -> Result<&mut dyn Task, SignalingError> {
        match self.task.and_then(|index| self.tasks.get_mut(index)) {
            Some(task) => Ok(task.as_mut()),
            None => Err(SignalingError::internal("no task negotiated")),
        }
    }

    fn peer_mut(&mut self, address: Address) -> Option<&mut Peer> {
        if address == SERVER_ADDRESS {
            return Some(&mut self.server);
        }
        match &mut self.side {
            Side::Initiator(side) => match side.responder.as_mut() {
                Some(peer) if peer.address() == address => Some(peer),
                _ => side.pool.get_mut(address),
            },
            Side::Responder(side) if address == INITIATOR_ADDRESS => Some(&mut side.initiator),
            Side::Responder(_) => None,
        }
    }

    fn handle_frame(&mut self, frame: &[u8]) -> Result<(), SignalingError> {
        let nonce = SignalingChannelNonce::decode(frame)?;
        let sealed = CryptoBox::from_bytes(frame)?;

        match self.state {
            SignalingState::ServerHandshake => {
                self.validate_source(&nonce)?;
                self.validate_destination(&nonce)?;
                self.validate_peer_nonce(&nonce)?;
                self.on_server_handshake_frame(&sealed)
            }
            SignalingState::PeerHandshake | SignalingState::Task => {
                self.validate_source(&nonce)?;
                self.validate_destination(&nonce)?;

                if nonce.source == SERVER_ADDRESS {
                    self.validate_peer_nonce(&nonce)?;
                    let message = self.open_from_server(&sealed)?;
                    return self.on_server_message(message);
                }

                if self.state == SignalingState::PeerHandshake {
                    return match self.role() {
                        SignalingRole::Initiator => {
                            self.on_responder_handshake_frame(&nonce, &sealed)
                        }
                        SignalingRole::Responder => {
                            self.validate_peer_nonce(&nonce)?;
                            self.on_initiator_handshake_frame(&sealed)
                        }
                    };
                }

                if self.handover.peer() {
                    return Err(ValidationError::non_critical(
                        "peer message on the relay after handover",
                    )
                    .into());
                }
                self.validate_peer_nonce(&nonce)?;
                self.on_peer_task_frame(nonce.source, &sealed)
            }
            other => {
                debug!("dropping frame in state {}", other);
                Ok(())
            }
        }
    }

    fn handle_task_channel_frame(&mut self, frame: &[u8]) -> Result<(), SignalingError> {
        let nonce = SignalingChannelNonce::decode(frame)?;
        let sealed = CryptoBox::from_bytes(frame)?;

        if self.state != SignalingState::Task {
            return Err(SignalingError::internal(format!(
                "task channel frame in state {}",
                self.state
            )));
        }
        if nonce.destination != self.address {
            return Err(ValidationError::critical(format!(
                "task channel frame for 0x{:02x}, we are 0x{:02x}",
                nonce.destination, self.address
            ))
            .into());
        }
        self.validate_peer_nonce(&nonce)?;
        self.on_peer_task_frame(nonce.source, &sealed)
    }

    fn validate_source(&self, nonce: &SignalingChannelNonce) -> Result<(), SignalingError> {
        let source = nonce.source;
        let valid = match self.state {
            SignalingState::ServerHandshake => source == SERVER_ADDRESS,
            _ => {
                source == SERVER_ADDRESS
                    || match self.role() {
                        SignalingRole::Initiator => is_responder(source),
                        SignalingRole::Responder => source == INITIATOR_ADDRESS,
                    }
            }
        };

        if valid {
            Ok(())
        } else {
            Err(ValidationError::non_critical(format!(
                "invalid source 0x{:02x} in state {}",
                source, self.state
            ))
            .into())
        }
    }

    fn validate_destination(&mut self, nonce: &SignalingChannelNonce) -> Result<(), SignalingError> {
        let destination = nonce.destination;

        if self.state == SignalingState::ServerHandshake {
            let server_state = self.server.server_state()?;
            if server_state == ServerHandshakeState::AuthSent {
                // server-auth carries our assigned address
                let valid = match self.role() {
                    SignalingRole::Initiator => destination == INITIATOR_ADDRESS,
                    SignalingRole::Responder => is_responder(destination),
                };
                if !valid {
                    return Err(ValidationError::critical(format!(
                        "invalid address 0x{:02x} assigned by server",
                        destination
                    ))
                    .into());
                }
                debug!("server assigned address 0x{:02x}", destination);
                self.address = destination;
                return Ok(());
            }
        }

        if destination != self.address {
            return Err(ValidationError::critical(format!(
                "invalid destination 0x{:02x}, we are 0x{:02x}",
                destination, self.address
            ))
            .into());
        }
        Ok(())
    }

    /// Combined sequence number first, then cookie.
    fn validate_peer_nonce(&mut self, nonce: &SignalingChannelNonce) -> Result<(), SignalingError> {
        let peer = self.peer_mut(nonce.source).ok_or_else(|| {
            ValidationError::non_critical(format!("no peer with address 0x{:02x}", nonce.source))
        })?;
        peer.csn().validate_incoming(nonce.csn)?;
        peer.cookies_mut().validate_incoming(&nonce.cookie)?;
        Ok(())
    }

    fn open_from_server(&self, sealed: &CryptoBox) -> Result<Message, SignalingError> {
        let plaintext = self.server.session_key()?.decrypt(sealed)?;
        Ok(Message::decode(&plaintext)?)
    }

    fn open_from_peer(&mut self, address: Address, sealed: &CryptoBox) -> Result<Message, SignalingError> {
        let peer = self
            .peer_mut(address)
            .ok_or_else(|| SignalingError::internal(format!("no peer 0x{:02x}", address)))?;
        let plaintext = peer.session_key()?.decrypt(sealed)?;
        Ok(Message::decode(&plaintext)?)
    }

    /// Encode, seal and frame `message` for `receiver`.
    fn build_packet(&mut self, message: &Message, receiver: Address) -> Result<Vec<u8>, SignalingError> {
        let our_address = self.address;
        let payload = message.encode()?;

        let peer = self.peer_mut(receiver).ok_or_else(|| {
            SignalingError::internal(format!("no peer with address 0x{:02x}", receiver))
        })?;
        let csn = peer.csn().ours().next()?;
        let nonce = SignalingChannelNonce::new(*peer.cookies().ours(), our_address, receiver, csn);
        let sealing = match message {
            Message::ClientHello(_) => Sealing::Plain,
            Message::Token(_) => Sealing::AuthToken,
            Message::Key(_) => Sealing::Shared(peer.permanent_key()?.clone()),
            _ => Sealing::Shared(peer.session_key()?.clone()),
        };

        let nonce_bytes = nonce.encode();
        let frame = match sealing {
            Sealing::Plain => {
                let mut frame = Vec::with_capacity(NONCE_LENGTH + payload.len());
                frame.extend_from_slice(&nonce_bytes);
                frame.extend_from_slice(&payload);
                frame
            }
            Sealing::AuthToken => {
                let token = self
                    .auth_token()
                    .ok_or_else(|| SignalingError::internal("no auth token configured"))?;
                token.encrypt(&payload, nonce_bytes)?.to_bytes()
            }
            Sealing::Shared(key) => key.encrypt(&payload, nonce_bytes)?.to_bytes(),
        };

        self.history.store(
            nonce.message_id(),
            SentMessage {
                receiver,
                message_type: message.message_type().to_string(),
            },
        );
        Ok(frame)
    }

    /// Queue `message` for `receiver`. After the local handover, peer
    /// messages go through the task instead of the relay.
    fn send(&mut self, message: &Message, receiver: Address) -> Result<(), SignalingError> {
        let frame = self.build_packet(message, receiver)?;
        debug!("sending {} to 0x{:02x}", message.message_type(), receiver);

        if receiver != SERVER_ADDRESS && self.handover.local() {
            return self.active_task_mut()?.send_signaling_message(frame);
        }
        self.transmits.push_back(Transmit::Frame(frame));
        Ok(())
    }

    fn on_server_handshake_frame(&mut self, sealed: &CryptoBox) -> Result<(), SignalingError> {
        match self.server.server_state()? {
            ServerHandshakeState::New => {
                // server-hello is the only plaintext message we accept
                match Message::decode(sealed.data())? {
                    Message::ServerHello(hello) => self.handle_server_hello(hello),
                    other => Err(unexpected("server-hello", &other)),
                }
            }
            ServerHandshakeState::AuthSent => match self.open_from_server(sealed)? {
                Message::ServerAuth(auth) => self.handle_server_auth(sealed.nonce(), auth),
                other => Err(unexpected("server-auth", &other)),
            },
            state => Err(SignalingError::internal(format!(
                "unexpected server message in handshake state {:?}",
                state
            ))),
        }
    }

    fn handle_server_hello(&mut self, hello: ServerHello) -> Result<(), SignalingError> {
        let server_session_key = hello.validate()?;
        debug!("received server-hello");
        let shared = self.permanent_key.shared_key_store(&server_session_key)?;
        self.server.set_session_key(shared);

        if self.role() == SignalingRole::Responder {
            let hello = Message::ClientHello(ClientHello::new(self.permanent_key.public_key()));
            self.send(&hello, SERVER_ADDRESS)?;
            self.server.set_server_state(ServerHandshakeState::HelloSent)?;
        }

        let their_cookie = *self
            .server
            .cookies()
            .theirs()
            .ok_or_else(|| SignalingError::internal("server cookie not known"))?;
        let client_auth = Message::ClientAuth(ClientAuth::new(
            &their_cookie,
            vec![SUBPROTOCOL.to_string()],
            self.ping_interval,
            self.server_key.as_ref(),
        ));
        self.send(&client_auth, SERVER_ADDRESS)?;
        self.server.set_server_state(ServerHandshakeState::AuthSent)?;
        Ok(())
    }

    fn handle_server_auth(
        &mut self,
        nonce: &[u8; NONCE_LENGTH],
        auth: ServerAuth,
    ) -> Result<(), SignalingError> {
        match self.role() {
            SignalingRole::Initiator => {
                let auth = auth.validate_for_initiator()?;
                check_your_cookie(self.server.cookies().ours(), &auth.your_cookie)?;
                self.verify_signed_keys(nonce, auth.signed_keys)?;
                self.server_handshake_done();

                for id in auth.responders {
                    self.process_new_responder(id)?;
                }
                Ok(())
            }
            SignalingRole::Responder => {
                let auth = auth.validate_for_responder()?;
                check_your_cookie(self.server.cookies().ours(), &auth.your_cookie)?;
                self.verify_signed_keys(nonce, auth.signed_keys)?;
                self.server_handshake_done();

                self.responder_side_mut()?
                    .initiator
                    .set_initiator_connected(auth.initiator_connected);
                if auth.initiator_connected {
                    self.initiate_peer_handshake()?;
                }
                Ok(())
            }
        }
    }

    fn server_handshake_done(&mut self) {
        if let Err(err) = self.server.set_server_state(ServerHandshakeState::Done) {
            warn!("{}", err);
        }
        info!(
            "server handshake done, we are 0x{:02x} ({})",
            self.address,
            self.role()
        );
        self.set_state(SignalingState::PeerHandshake);
    }

    /// Check `signed_keys` against the pinned server key. Without a pinned
    /// key the field is ignored.
    fn verify_signed_keys(
        &self,
        nonce: &[u8; NONCE_LENGTH],
        signed_keys: Option<Vec<u8>>,
    ) -> Result<(), SignalingError> {
        let server_key = match self.server_key {
            Some(key) => key,
            None => {
                if signed_keys.is_some() {
                    debug!("ignoring signed_keys, no server key pinned");
                }
                return Ok(());
            }
        };
        let signed_keys = signed_keys.ok_or_else(|| {
            ValidationError::critical("server-auth without signed_keys for a pinned server key")
        })?;

        let sealed = CryptoBox::new(*nonce, signed_keys);
        let plaintext = self
            .permanent_key
            .decrypt(&sealed, &server_key)
            .map_err(|e| SignalingError::InvalidKey(format!("could not open signed_keys: {}", e)))?;

        let mut expected = Vec::with_capacity(2 * salty_crypto::PUBLIC_KEY_LENGTH);
        expected.extend_from_slice(self.server.session_key()?.remote_public_key());
        expected.extend_from_slice(self.permanent_key.public_key());
        if plaintext != expected {
            return Err(ValidationError::critical(
                "signed_keys do not match the server session key and our permanent key",
            )
            .into());
        }
        debug!("server permanent key verified");
        Ok(())
    }

    fn on_server_message(&mut self, message: Message) -> Result<(), SignalingError> {
        debug!("received {} from server", message.message_type());
        match (self.role(), message) {
            (_, Message::SendError(msg)) => self.handle_send_error(msg),
            (_, Message::Disconnected(msg)) => self.handle_disconnected(msg),
            (SignalingRole::Initiator, Message::NewResponder(msg)) => self.handle_new_responder(msg),
            (SignalingRole::Responder, Message::NewInitiator) => self.handle_new_initiator(),
            (_, other) => Err(ValidationError::non_critical(format!(
                "unexpected {} message from server",
                other.message_type()
            ))
            .into()),
        }
    }

    fn handle_send_error(&mut self, msg: SendError) -> Result<(), SignalingError> {
        let id = msg.validate()?;
        if id.source() != self.address {
            return Err(ValidationError::critical(format!(
                "send-error for a message from 0x{:02x}, we are 0x{:02x}",
                id.source(),
                self.address
            ))
            .into());
        }

        let receiver = id.destination();
        let expected_class = match self.role() {
            SignalingRole::Initiator => is_responder(receiver),
            SignalingRole::Responder => receiver == INITIATOR_ADDRESS,
        };
        if !expected_class {
            return Err(ValidationError::critical(format!(
                "send-error for 0x{:02x}, which cannot be our peer",
                receiver
            ))
            .into());
        }

        match self.history.find(&id) {
            Some(sent) => warn!(
                "server could not deliver {} message to 0x{:02x}",
                sent.message_type, sent.receiver
            ),
            None => warn!(
                "server could not deliver message {:?} to 0x{:02x}",
                id, receiver
            ),
        }
        self.events
            .push_back(SignalingEvent::SignalingConnectionLost(receiver));

        if self.state == SignalingState::Task && self.peer_address() == Some(receiver) {
            self.reset_connection(CloseCode::ClosingNormal);
            return Ok(());
        }
        match self.role() {
            SignalingRole::Initiator => self.forget_responder(receiver),
            SignalingRole::Responder => self.reset_initiator(false),
        }
    }

    fn handle_disconnected(&mut self, msg: Disconnected) -> Result<(), SignalingError> {
        let id = msg.id;
        match self.role() {
            SignalingRole::Initiator => {
                if !is_responder(id) {
                    return Err(ValidationError::critical(format!(
                        "disconnected for invalid responder 0x{:02x}",
                        id
                    ))
                    .into());
                }
                self.forget_responder(id)?;
            }
            SignalingRole::Responder => {
                if id != INITIATOR_ADDRESS {
                    return Err(ValidationError::critical(format!(
                        "disconnected for 0x{:02x}, expected the initiator",
                        id
                    ))
                    .into());
                }
                if self.state == SignalingState::PeerHandshake {
                    self.reset_initiator(false)?;
                }
            }
        }

        info!("peer 0x{:02x} disconnected", id);
        self.events.push_back(SignalingEvent::PeerDisconnected(id));
        Ok(())
    }

    fn on_peer_task_frame(&mut self, source: Address, sealed: &CryptoBox) -> Result<(), SignalingError> {
        if self.peer_address() != Some(source) {
            return Err(ValidationError::non_critical(format!(
                "message from 0x{:02x}, which is not our peer",
                source
            ))
            .into());
        }

        let message = self.open_from_peer(source, sealed)?;
        debug!("received {} from peer", message.message_type());
        match message {
            Message::Close(close) => {
                let reason = close.validate()?;
                info!("peer closed the connection: {}", reason);
                self.close_task(reason);
                self.events.push_back(SignalingEvent::PeerClosed(reason));
                self.reset_connection(CloseCode::ClosingNormal);
                Ok(())
            }
            Message::Application(app) => {
                self.events
                    .push_back(SignalingEvent::ApplicationMessage(app.data));
                Ok(())
            }
            Message::Task(message) => self.dispatch_task_message(message),
            other => Err(ValidationError::non_critical(format!(
                "unexpected {} message in task state",
                other.message_type()
            ))
            .into()),
        }
    }

    fn dispatch_task_message(&mut self, message: TaskMessage) -> Result<(), SignalingError> {
        let state = self.state;
        let task = self.active_task_mut()?;
        if !task
            .supported_message_types()
            .iter()
            .any(|kind| *kind == message.kind())
        {
            return Err(ValidationError::non_critical(format!(
                "task {} does not handle {} messages",
                task.name(),
                message.kind()
            ))
            .into());
        }

        let mut ctx = TaskContext::new(state);
        task.on_task_message(message, &mut ctx);
        self.apply_task_actions(ctx)
    }

    /// The peer handshake finished and a task was chosen.
    fn peer_handshake_done(&mut self, task_index: usize) -> Result<(), SignalingError> {
        self.task = Some(task_index);
        self.set_state(SignalingState::Task);
        info!(
            "peer handshake done with 0x{:02x}, task {}",
            self.peer_address().unwrap_or(SERVER_ADDRESS),
            self.task_name().unwrap_or("?")
        );

        let mut ctx = TaskContext::new(self.state);
        self.active_task_mut()?.on_peer_handshake_done(&mut ctx);
        self.apply_task_actions(ctx)
    }

    fn apply_task_actions(&mut self, ctx: TaskContext) -> Result<(), SignalingError> {
        for action in ctx.into_actions() {
            match action {
                TaskAction::Send(message) => {
                    let peer = self.require_task_peer()?;
                    self.send(&Message::Task(message), peer)?;
                }
                TaskAction::Emit(value) => self.events.push_back(SignalingEvent::TaskData(value)),
                TaskAction::HandoverLocal => {
                    if self.handover.set_local() {
                        self.complete_handover();
                    }
                }
                TaskAction::HandoverPeer => {
                    if self.handover.set_peer() {
                        self.complete_handover();
                    }
                }
                TaskAction::Close(reason) => {
                    let peer = self.require_task_peer()?;
                    self.send(&Message::Close(Close::new(reason)), peer)?;
                    self.close_task(reason);
                    self.reset_connection(CloseCode::ClosingNormal);
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    fn complete_handover(&mut self) {
        info!("handover complete, closing the relay connection");
        self.events.push_back(SignalingEvent::Handover);
        self.transmits.push_back(Transmit::Close(CloseCode::Handover));
    }
}

fn check_your_cookie(ours: &Cookie, echoed: &Cookie) -> Result<(), SignalingError> {
    if ours != echoed {
        return Err(ValidationError::critical("your_cookie does not match our cookie").into());
    }
    Ok(())
}

fn unexpected(expected: &str, got: &Message) -> SignalingError {
    ValidationError::critical(format!(
        "expected {} message, got {}",
        expected,
        got.message_type()
    ))
    .into()
}
