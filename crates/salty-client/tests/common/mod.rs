//! In-memory relay and pump for driving `Signaling` engines against each
//! other without a socket.
#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};

use rmpv::Value;
use salty_client::{
    RoleConfig, Signaling, SignalingConfig, SignalingError, SignalingEvent, SignalingState, Task,
    TaskContext, Transmit,
};
use salty_core::message::{Disconnected, NewResponder, SendError, ServerAuth, ServerHello};
use salty_core::{
    Address, CloseCode, CombinedSequence, Cookie, Message, MessageId, SignalingChannelNonce,
    TaskMessage,
    ValidationError, DEFAULT_HISTORY_CAPACITY, FIRST_RESPONDER_ADDRESS, INITIATOR_ADDRESS,
    NONCE_LENGTH, SERVER_ADDRESS, SUBPROTOCOL,
};
use salty_crypto::{AuthToken, CryptoBox, CryptoProvider, KeyStore, NaclProvider, PublicKey};

pub type ClientId = usize;

pub fn provider() -> Arc<dyn CryptoProvider> {
    Arc::new(NaclProvider)
}

pub fn key_store() -> KeyStore {
    KeyStore::generate(provider())
}

pub fn auth_token() -> AuthToken {
    AuthToken::generate(&NaclProvider).unwrap()
}

pub fn signaling(
    permanent_key: KeyStore,
    role: RoleConfig,
    tasks: Vec<Box<dyn Task>>,
    server_key: Option<PublicKey>,
) -> Signaling {
    Signaling::new(SignalingConfig {
        permanent_key,
        server_key,
        role,
        tasks,
        ping_interval: 0,
        history_capacity: DEFAULT_HISTORY_CAPACITY,
    })
    .unwrap()
}

pub fn initiator(keys: &KeyStore, token: &AuthToken, tasks: Vec<Box<dyn Task>>) -> Signaling {
    signaling(
        keys.clone(),
        RoleConfig::Initiator {
            auth_token: token.clone(),
            responder_trusted_key: None,
        },
        tasks,
        None,
    )
}

pub fn responder(
    keys: &KeyStore,
    initiator_key: &PublicKey,
    token: &AuthToken,
    tasks: Vec<Box<dyn Task>>,
) -> Signaling {
    signaling(
        keys.clone(),
        RoleConfig::Responder {
            initiator_public_key: *initiator_key,
            auth_token: Some(token.clone()),
        },
        tasks,
        None,
    )
}

/// A task that only has a name. Records what the engine tells it.
#[derive(Default)]
pub struct NamedTask {
    name: String,
    pub log: Arc<Mutex<Vec<String>>>,
}

impl NamedTask {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            log: Arc::default(),
        }
    }
}

impl Task for NamedTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn supported_message_types(&self) -> &[&'static str] {
        &[]
    }

    fn data(&self) -> Option<Value> {
        Some(Value::from(self.name.as_str()))
    }

    fn init(&mut self, peer_data: Option<&Value>) -> Result<(), ValidationError> {
        let peer = peer_data.and_then(|v| v.as_str()).unwrap_or("-").to_string();
        self.log.lock().unwrap().push(format!("init {}", peer));
        Ok(())
    }

    fn on_peer_handshake_done(&mut self, _ctx: &mut TaskContext) {
        self.log.lock().unwrap().push("done".into());
    }

    fn on_task_message(&mut self, message: TaskMessage, _ctx: &mut TaskContext) {
        self.log.lock().unwrap().push(format!("message {}", message.kind()));
    }

    fn close(&mut self, reason: CloseCode) {
        self.log.lock().unwrap().push(format!("close {}", reason.as_u16()));
    }
}

/// A task that takes over the transport right after the handshake and
/// collects the signaling frames it is asked to carry.
pub struct HandoverTask {
    pub outbox: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl HandoverTask {
    pub fn new() -> Self {
        Self {
            outbox: Arc::default(),
        }
    }
}

impl Task for HandoverTask {
    fn name(&self) -> &str {
        "v0.handover.test"
    }

    fn supported_message_types(&self) -> &[&'static str] {
        &[]
    }

    fn data(&self) -> Option<Value> {
        None
    }

    fn init(&mut self, _peer_data: Option<&Value>) -> Result<(), ValidationError> {
        Ok(())
    }

    fn on_peer_handshake_done(&mut self, ctx: &mut TaskContext) {
        ctx.handover_local();
        ctx.handover_peer();
    }

    fn on_task_message(&mut self, _message: TaskMessage, _ctx: &mut TaskContext) {}

    fn send_signaling_message(&mut self, frame: Vec<u8>) -> Result<(), SignalingError> {
        self.outbox.lock().unwrap().push(frame);
        Ok(())
    }

    fn close(&mut self, _reason: CloseCode) {}
}

pub enum Delivery {
    Frame(ClientId, Vec<u8>),
    Close(ClientId, u16),
}

struct Connection {
    session: KeyStore,
    cookie: Cookie,
    csn: CombinedSequence,
    client_key: Option<PublicKey>,
    /// Assigned once `client-auth` was accepted.
    address: Option<Address>,
}

/// Just enough of a SaltyRTC server for one path.
pub struct MockRelay {
    path_key: PublicKey,
    permanent_key: Option<KeyStore>,
    connections: BTreeMap<ClientId, Connection>,
    outbox: VecDeque<Delivery>,
    delivered: BTreeMap<ClientId, Vec<Vec<u8>>>,
}

impl MockRelay {
    pub fn new(path_key: PublicKey) -> Self {
        Self {
            path_key,
            permanent_key: None,
            connections: BTreeMap::new(),
            outbox: VecDeque::new(),
            delivered: BTreeMap::new(),
        }
    }

    /// Sign `server-auth` with this permanent key.
    pub fn with_permanent_key(mut self, key: KeyStore) -> Self {
        self.permanent_key = Some(key);
        self
    }

    /// Every frame the relay delivered to `id`, in order.
    pub fn delivered(&self, id: ClientId) -> &[Vec<u8>] {
        self.delivered.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn accept(&mut self, id: ClientId) {
        let session = key_store();
        let hello = Message::ServerHello(ServerHello::new(session.public_key()));
        self.connections.insert(
            id,
            Connection {
                session,
                cookie: Cookie::random(),
                csn: CombinedSequence::random(),
                client_key: None,
                address: None,
            },
        );

        let nonce = self.next_nonce(id);
        let mut frame = nonce.encode().to_vec();
        frame.extend_from_slice(&hello.encode().unwrap());
        self.outbox.push_back(Delivery::Frame(id, frame));
    }

    /// Kill a connection without telling anyone, like a dead TCP link.
    pub fn vanish(&mut self, id: ClientId) {
        self.disconnect(id, 1006, false);
    }

    /// Report `message` as undeliverable to `id`.
    pub fn send_error(&mut self, id: ClientId, message: MessageId) {
        self.send(id, &Message::SendError(SendError::new(&message)));
    }

    pub fn handle(&mut self, id: ClientId, transmit: Transmit) {
        match transmit {
            Transmit::Close(code) => self.disconnect(id, code.as_u16(), true),
            Transmit::Frame(frame) => self.handle_frame(id, frame),
        }
    }

    fn next_nonce(&mut self, id: ClientId) -> SignalingChannelNonce {
        let conn = self.connections.get_mut(&id).unwrap();
        SignalingChannelNonce::new(
            conn.cookie,
            SERVER_ADDRESS,
            conn.address.unwrap_or(SERVER_ADDRESS),
            conn.csn.next().unwrap(),
        )
    }

    fn send(&mut self, id: ClientId, message: &Message) {
        let nonce = self.next_nonce(id);
        let frame = self.seal(id, nonce, message);
        self.outbox.push_back(Delivery::Frame(id, frame));
    }

    fn seal(&self, id: ClientId, nonce: SignalingChannelNonce, message: &Message) -> Vec<u8> {
        let conn = &self.connections[&id];
        let client_key = conn.client_key.unwrap();
        conn.session
            .encrypt(&message.encode().unwrap(), nonce.encode(), &client_key)
            .unwrap()
            .to_bytes()
    }

    fn client_at(&self, address: Address) -> Option<ClientId> {
        self.connections
            .iter()
            .find(|(_, conn)| conn.address == Some(address))
            .map(|(id, _)| *id)
    }

    fn responders(&self) -> Vec<(ClientId, Address)> {
        self.connections
            .iter()
            .filter_map(|(id, conn)| match conn.address {
                Some(address) if address >= FIRST_RESPONDER_ADDRESS => Some((*id, address)),
                _ => None,
            })
            .collect()
    }

    fn disconnect(&mut self, id: ClientId, code: u16, notify: bool) {
        let conn = match self.connections.remove(&id) {
            Some(conn) => conn,
            None => return,
        };
        self.outbox.push_back(Delivery::Close(id, code));
        if !notify {
            return;
        }

        match conn.address {
            Some(INITIATOR_ADDRESS) => {
                for (responder, _) in self.responders() {
                    let msg = Message::Disconnected(Disconnected {
                        id: INITIATOR_ADDRESS,
                    });
                    self.send(responder, &msg);
                }
            }
            Some(address) => {
                if let Some(initiator) = self.client_at(INITIATOR_ADDRESS) {
                    self.send(initiator, &Message::Disconnected(Disconnected { id: address }));
                }
            }
            None => {}
        }
    }

    fn handle_frame(&mut self, id: ClientId, frame: Vec<u8>) {
        let nonce = SignalingChannelNonce::decode(&frame).unwrap();
        let authenticated = match self.connections.get(&id) {
            Some(conn) => conn.address.is_some(),
            None => return,
        };

        if !authenticated {
            self.handle_handshake(id, &nonce, &frame);
        } else if nonce.destination == SERVER_ADDRESS {
            self.handle_server_message(id, &frame);
        } else {
            match self.client_at(nonce.destination) {
                Some(target) => {
                    self.delivered.entry(target).or_default().push(frame.clone());
                    self.outbox.push_back(Delivery::Frame(target, frame));
                }
                None => {
                    let msg = Message::SendError(SendError::new(&nonce.message_id()));
                    self.send(id, &msg);
                }
            }
        }
    }

    fn handle_handshake(&mut self, id: ClientId, nonce: &SignalingChannelNonce, frame: &[u8]) {
        let path_key = self.path_key;
        let conn = self.connections.get_mut(&id).unwrap();

        if conn.client_key.is_none() {
            if let Ok(Message::ClientHello(hello)) = Message::decode(&frame[NONCE_LENGTH..]) {
                conn.client_key = Some(hello.validate().unwrap());
                return;
            }
            conn.client_key = Some(path_key);
        }

        let client_key = conn.client_key.unwrap();
        let sealed = CryptoBox::from_bytes(frame).unwrap();
        let plaintext = conn.session.decrypt(&sealed, &client_key).unwrap();
        let auth = match Message::decode(&plaintext).unwrap() {
            Message::ClientAuth(auth) => auth,
            other => panic!("expected client-auth, got {}", other.message_type()),
        };
        assert_eq!(auth.your_cookie, conn.cookie.as_bytes().to_vec());
        assert_eq!(auth.subprotocols, vec![SUBPROTOCOL.to_string()]);

        let is_initiator = client_key == path_key;
        let address = if is_initiator {
            INITIATOR_ADDRESS
        } else {
            let taken: Vec<Address> = self.responders().into_iter().map(|(_, a)| a).collect();
            (FIRST_RESPONDER_ADDRESS..=Address::MAX)
                .find(|a| !taken.contains(a))
                .unwrap()
        };
        let initiator_connected = self.client_at(INITIATOR_ADDRESS).is_some();
        let responders = self.responders();

        let conn = self.connections.get_mut(&id).unwrap();
        conn.address = Some(address);
        let session_public = *conn.session.public_key();

        let nonce_out = self.next_nonce(id);
        let signed_keys = self.permanent_key.as_ref().map(|key| {
            let mut keys = session_public.to_vec();
            keys.extend_from_slice(&client_key);
            key.encrypt(&keys, nonce_out.encode(), &client_key)
                .unwrap()
                .into_data()
        });
        let server_auth = Message::ServerAuth(ServerAuth {
            your_cookie: nonce.cookie.as_bytes().to_vec(),
            signed_keys,
            responders: is_initiator.then(|| responders.iter().map(|(_, a)| *a).collect()),
            initiator_connected: (!is_initiator).then_some(initiator_connected),
        });
        let frame = self.seal(id, nonce_out, &server_auth);
        self.outbox.push_back(Delivery::Frame(id, frame));

        if is_initiator {
            for (responder, _) in responders {
                self.send(responder, &Message::NewInitiator);
            }
        } else if let Some(initiator) = self.client_at(INITIATOR_ADDRESS) {
            self.send(initiator, &Message::NewResponder(NewResponder { id: address }));
        }
    }

    fn handle_server_message(&mut self, id: ClientId, frame: &[u8]) {
        let conn = &self.connections[&id];
        let sealed = CryptoBox::from_bytes(frame).unwrap();
        let plaintext = conn
            .session
            .decrypt(&sealed, &conn.client_key.unwrap())
            .unwrap();
        if let Message::DropResponder(drop) = Message::decode(&plaintext).unwrap() {
            let (address, reason) = drop.validate().unwrap();
            if let Some(target) = self.client_at(address) {
                self.disconnect(target, reason.as_u16(), false);
            }
        }
    }
}

/// Engines wired to one [`MockRelay`].
pub struct Harness {
    pub relay: MockRelay,
    clients: Vec<Signaling>,
    events: Vec<Vec<SignalingEvent>>,
}

impl Harness {
    pub fn new(relay: MockRelay) -> Self {
        Self {
            relay,
            clients: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn add(&mut self, signaling: Signaling) -> ClientId {
        self.clients.push(signaling);
        self.events.push(Vec::new());
        self.clients.len() - 1
    }

    /// Open the WebSocket of `id` and run until nothing moves.
    pub fn connect(&mut self, id: ClientId) {
        let client = &mut self.clients[id];
        client.on_connecting();
        client.on_open();
        self.relay.accept(id);
        self.pump();
    }

    pub fn client(&self, id: ClientId) -> &Signaling {
        &self.clients[id]
    }

    pub fn client_mut(&mut self, id: ClientId) -> &mut Signaling {
        &mut self.clients[id]
    }

    pub fn state(&self, id: ClientId) -> SignalingState {
        self.clients[id].state()
    }

    /// Events seen so far by `id`.
    pub fn events(&self, id: ClientId) -> &[SignalingEvent] {
        &self.events[id]
    }

    pub fn take_events(&mut self, id: ClientId) -> Vec<SignalingEvent> {
        std::mem::take(&mut self.events[id])
    }

    pub fn errors(&self, id: ClientId) -> Vec<&SignalingError> {
        self.events[id]
            .iter()
            .filter_map(|event| match event {
                SignalingEvent::Error(err) => Some(err),
                _ => None,
            })
            .collect()
    }

    /// Move transmits and deliveries until everything settled.
    pub fn pump(&mut self) {
        for _ in 0..10_000 {
            let mut progressed = false;

            for id in 0..self.clients.len() {
                while let Some(transmit) = self.clients[id].poll_transmit() {
                    progressed = true;
                    self.relay.handle(id, transmit);
                }
                while let Some(event) = self.clients[id].poll_event() {
                    self.events[id].push(event);
                }
            }

            while let Some(delivery) = self.relay.outbox.pop_front() {
                progressed = true;
                match delivery {
                    Delivery::Frame(id, frame) => self.clients[id].on_frame(&frame),
                    Delivery::Close(id, code) => self.clients[id].on_close(code),
                }
            }

            if !progressed {
                return;
            }
        }
        panic!("relay did not settle");
    }
}
