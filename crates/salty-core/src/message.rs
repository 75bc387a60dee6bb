//! Signaling message payloads.
//!
//! Every payload is a MessagePack map with a string `type` field. Known
//! types decode into the [`Message`] enum; anything else is kept as an
//! opaque [`TaskMessage`] for the negotiated task to interpret.
//!
//! Decoding is structural only. Field contents (key lengths, cookie sizes,
//! close codes, role-specific field sets) are checked by the `validate*`
//! functions of each payload, which return typed values.

use std::collections::BTreeMap;

use rmpv::Value;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::address::{is_responder, Address};
use crate::close_code::CloseCode;
use crate::cookie::Cookie;
use crate::error::{SerializationError, ValidationError};
use crate::nonce::MessageId;

/// Public key length in bytes.
pub const KEY_LENGTH: usize = 32;

/// Raw public key bytes.
pub type RawKey = [u8; KEY_LENGTH];

fn key_from_slice(field: &str, bytes: &[u8]) -> Result<RawKey, ValidationError> {
    bytes.try_into().map_err(|_| {
        ValidationError::critical(format!(
            "{} must be {} bytes, got {}",
            field,
            KEY_LENGTH,
            bytes.len()
        ))
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerHello {
    #[serde(with = "serde_bytes")]
    pub key: Vec<u8>,
}

impl ServerHello {
    pub fn new(key: &RawKey) -> Self {
        Self { key: key.to_vec() }
    }

    /// The server's public session key.
    pub fn validate(&self) -> Result<RawKey, ValidationError> {
        key_from_slice("server-hello key", &self.key)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientHello {
    #[serde(with = "serde_bytes")]
    pub key: Vec<u8>,
}

impl ClientHello {
    pub fn new(key: &RawKey) -> Self {
        Self { key: key.to_vec() }
    }

    /// The responder's public permanent key.
    pub fn validate(&self) -> Result<RawKey, ValidationError> {
        key_from_slice("client-hello key", &self.key)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientAuth {
    #[serde(with = "serde_bytes")]
    pub your_cookie: Vec<u8>,
    pub subprotocols: Vec<String>,
    pub ping_interval: u32,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "serde_bytes")]
    pub your_key: Option<Vec<u8>>,
}

impl ClientAuth {
    pub fn new(
        your_cookie: &Cookie,
        subprotocols: Vec<String>,
        ping_interval: u32,
        your_key: Option<&RawKey>,
    ) -> Self {
        Self {
            your_cookie: your_cookie.as_bytes().to_vec(),
            subprotocols,
            ping_interval,
            your_key: your_key.map(|k| k.to_vec()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerAuth {
    #[serde(with = "serde_bytes")]
    pub your_cookie: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "serde_bytes")]
    pub signed_keys: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responders: Option<Vec<Address>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initiator_connected: Option<bool>,
}

/// `server-auth` as received by an initiator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAuthForInitiator {
    pub your_cookie: Cookie,
    pub signed_keys: Option<Vec<u8>>,
    pub responders: Vec<Address>,
}

/// `server-auth` as received by a responder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAuthForResponder {
    pub your_cookie: Cookie,
    pub signed_keys: Option<Vec<u8>>,
    pub initiator_connected: bool,
}

impl ServerAuth {
    pub fn validate_for_initiator(&self) -> Result<ServerAuthForInitiator, ValidationError> {
        let your_cookie = Cookie::from_slice(&self.your_cookie)?;
        let responders = self
            .responders
            .clone()
            .ok_or_else(|| ValidationError::critical("server-auth is missing `responders`"))?;
        if let Some(bad) = responders.iter().find(|id| !is_responder(**id)) {
            return Err(ValidationError::critical(format!(
                "server-auth lists invalid responder id 0x{:02x}",
                bad
            )));
        }
        Ok(ServerAuthForInitiator {
            your_cookie,
            signed_keys: self.signed_keys.clone(),
            responders,
        })
    }

    pub fn validate_for_responder(&self) -> Result<ServerAuthForResponder, ValidationError> {
        let your_cookie = Cookie::from_slice(&self.your_cookie)?;
        let initiator_connected = self.initiator_connected.ok_or_else(|| {
            ValidationError::critical("server-auth is missing `initiator_connected`")
        })?;
        Ok(ServerAuthForResponder {
            your_cookie,
            signed_keys: self.signed_keys.clone(),
            initiator_connected,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewResponder {
    pub id: Address,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropResponder {
    pub id: Address,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<u16>,
}

impl DropResponder {
    pub fn new(id: Address, reason: CloseCode) -> Self {
        Self {
            id,
            reason: Some(reason.as_u16()),
        }
    }

    /// Responder id and reason. A missing reason means `DROPPED_BY_INITIATOR`.
    pub fn validate(&self) -> Result<(Address, CloseCode), ValidationError> {
        if !is_responder(self.id) {
            return Err(ValidationError::critical(format!(
                "drop-responder id 0x{:02x} is not a responder",
                self.id
            )));
        }
        let reason = match self.reason {
            Some(code) => CloseCode::drop_reason(code)?,
            None => CloseCode::DroppedByInitiator,
        };
        Ok((self.id, reason))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendError {
    #[serde(with = "serde_bytes")]
    pub id: Vec<u8>,
}

impl SendError {
    pub fn new(id: &MessageId) -> Self {
        Self {
            id: id.as_bytes().to_vec(),
        }
    }

    pub fn validate(&self) -> Result<MessageId, ValidationError> {
        MessageId::from_slice(&self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disconnected {
    pub id: Address,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    #[serde(with = "serde_bytes")]
    pub key: Vec<u8>,
}

impl Token {
    pub fn new(key: &RawKey) -> Self {
        Self { key: key.to_vec() }
    }

    /// The responder's public permanent key.
    pub fn validate(&self) -> Result<RawKey, ValidationError> {
        key_from_slice("token key", &self.key)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Key {
    #[serde(with = "serde_bytes")]
    pub key: Vec<u8>,
}

impl Key {
    pub fn new(key: &RawKey) -> Self {
        Self { key: key.to_vec() }
    }

    /// The sender's public session key.
    pub fn validate(&self) -> Result<RawKey, ValidationError> {
        key_from_slice("key key", &self.key)
    }
}

/// Peer `auth`, in both directions.
///
/// A responder offers `tasks` with data for each; the initiator answers with
/// the single chosen `task` and its data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Auth {
    #[serde(with = "serde_bytes")]
    pub your_cookie: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tasks: Option<Vec<String>>,
    #[serde(default)]
    pub data: BTreeMap<String, Value>,
}

/// `auth` sent by a responder.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponderAuth {
    pub your_cookie: Cookie,
    pub tasks: Vec<String>,
    pub data: BTreeMap<String, Option<Value>>,
}

/// `auth` sent by the initiator.
#[derive(Debug, Clone, PartialEq)]
pub struct InitiatorAuth {
    pub your_cookie: Cookie,
    pub task: String,
    pub data: Option<Value>,
}

fn optional_data(value: Value) -> Option<Value> {
    match value {
        Value::Nil => None,
        other => Some(other),
    }
}

impl Auth {
    pub fn from_responder(your_cookie: &Cookie, tasks: Vec<(String, Option<Value>)>) -> Self {
        let names = tasks.iter().map(|(name, _)| name.clone()).collect();
        let data = tasks
            .into_iter()
            .map(|(name, data)| (name, data.unwrap_or(Value::Nil)))
            .collect();
        Self {
            your_cookie: your_cookie.as_bytes().to_vec(),
            task: None,
            tasks: Some(names),
            data,
        }
    }

    pub fn from_initiator(your_cookie: &Cookie, task: String, data: Option<Value>) -> Self {
        let mut map = BTreeMap::new();
        map.insert(task.clone(), data.unwrap_or(Value::Nil));
        Self {
            your_cookie: your_cookie.as_bytes().to_vec(),
            task: Some(task),
            tasks: None,
            data: map,
        }
    }

    /// Validate an `auth` received by the initiator.
    pub fn validate_from_responder(&self) -> Result<ResponderAuth, ValidationError> {
        let your_cookie = Cookie::from_slice(&self.your_cookie)?;
        if self.task.is_some() {
            return Err(ValidationError::critical("responder auth must not contain `task`"));
        }
        let tasks = self
            .tasks
            .clone()
            .ok_or_else(|| ValidationError::critical("responder auth is missing `tasks`"))?;
        if tasks.is_empty() {
            return Err(ValidationError::critical("responder auth offers no tasks"));
        }

        let mut data = BTreeMap::new();
        for name in &tasks {
            let value = self.data.get(name).ok_or_else(|| {
                ValidationError::critical(format!("responder auth has no data for task {}", name))
            })?;
            data.insert(name.clone(), optional_data(value.clone()));
        }

        Ok(ResponderAuth {
            your_cookie,
            tasks,
            data,
        })
    }

    /// Validate an `auth` received by a responder.
    pub fn validate_from_initiator(&self) -> Result<InitiatorAuth, ValidationError> {
        let your_cookie = Cookie::from_slice(&self.your_cookie)?;
        if self.tasks.is_some() {
            return Err(ValidationError::critical("initiator auth must not contain `tasks`"));
        }
        let task = self
            .task
            .clone()
            .ok_or_else(|| ValidationError::critical("initiator auth is missing `task`"))?;
        let data = self.data.get(&task).cloned().ok_or_else(|| {
            ValidationError::critical(format!("initiator auth has no data for task {}", task))
        })?;

        Ok(InitiatorAuth {
            your_cookie,
            task,
            data: optional_data(data),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Close {
    pub reason: u16,
}

impl Close {
    pub fn new(reason: CloseCode) -> Self {
        Self {
            reason: reason.as_u16(),
        }
    }

    pub fn validate(&self) -> Result<CloseCode, ValidationError> {
        CloseCode::try_from(self.reason)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    pub data: Value,
}

/// A message of a type the signaling layer does not know.
///
/// `value` is the whole payload map, `type` field included.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskMessage {
    kind: String,
    value: Value,
}

impl TaskMessage {
    /// Build a task message from its type and the remaining fields.
    pub fn new(kind: impl Into<String>, fields: Vec<(String, Value)>) -> Self {
        let kind = kind.into();
        let mut entries = Vec::with_capacity(fields.len() + 1);
        entries.push((Value::from("type"), Value::from(kind.as_str())));
        entries.extend(
            fields
                .into_iter()
                .filter(|(name, _)| name != "type")
                .map(|(name, value)| (Value::from(name), value)),
        );
        Self {
            kind,
            value: Value::Map(entries),
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Look up a field of the payload map.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.value.as_map().and_then(|entries| {
            entries
                .iter()
                .find(|(k, _)| k.as_str() == Some(field))
                .map(|(_, v)| v)
        })
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    fn encode(&self) -> Result<Vec<u8>, SerializationError> {
        let mut buf = Vec::new();
        rmpv::encode::write_value(&mut buf, &self.value)
            .map_err(|e| SerializationError::Encode(e.to_string()))?;
        Ok(buf)
    }
}

/// A decoded signaling payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Message {
    ServerHello(ServerHello),
    ClientHello(ClientHello),
    ClientAuth(ClientAuth),
    ServerAuth(ServerAuth),
    NewInitiator,
    NewResponder(NewResponder),
    DropResponder(DropResponder),
    SendError(SendError),
    Disconnected(Disconnected),
    Token(Token),
    Key(Key),
    Auth(Auth),
    Close(Close),
    Application(Application),
    #[serde(skip_serializing)]
    Task(TaskMessage),
}

fn typed<T: DeserializeOwned>(value: Value) -> Result<T, SerializationError> {
    rmpv::ext::from_value(value).map_err(|e| SerializationError::Decode(e.to_string()))
}

impl Message {
    /// The `type` field.
    pub fn message_type(&self) -> &str {
        match self {
            Self::ServerHello(_) => "server-hello",
            Self::ClientHello(_) => "client-hello",
            Self::ClientAuth(_) => "client-auth",
            Self::ServerAuth(_) => "server-auth",
            Self::NewInitiator => "new-initiator",
            Self::NewResponder(_) => "new-responder",
            Self::DropResponder(_) => "drop-responder",
            Self::SendError(_) => "send-error",
            Self::Disconnected(_) => "disconnected",
            Self::Token(_) => "token",
            Self::Key(_) => "key",
            Self::Auth(_) => "auth",
            Self::Close(_) => "close",
            Self::Application(_) => "application",
            Self::Task(task) => task.kind(),
        }
    }

    /// Serialize to a MessagePack map.
    pub fn encode(&self) -> Result<Vec<u8>, SerializationError> {
        match self {
            Self::Task(task) => task.encode(),
            other => rmp_serde::to_vec_named(other)
                .map_err(|e| SerializationError::Encode(e.to_string())),
        }
    }

    /// Parse a MessagePack payload.
    pub fn decode(bytes: &[u8]) -> Result<Self, SerializationError> {
        let value = rmpv::decode::read_value(&mut &bytes[..])
            .map_err(|e| SerializationError::Decode(e.to_string()))?;

        let kind = match &value {
            Value::Map(entries) => entries
                .iter()
                .find(|(k, _)| k.as_str() == Some("type"))
                .and_then(|(_, v)| v.as_str())
                .ok_or(SerializationError::MissingType)?
                .to_owned(),
            _ => return Err(SerializationError::NotAMap),
        };

        Ok(match kind.as_str() {
            "server-hello" => Self::ServerHello(typed(value)?),
            "client-hello" => Self::ClientHello(typed(value)?),
            "client-auth" => Self::ClientAuth(typed(value)?),
            "server-auth" => Self::ServerAuth(typed(value)?),
            "new-initiator" => Self::NewInitiator,
            "new-responder" => Self::NewResponder(typed(value)?),
            "drop-responder" => Self::DropResponder(typed(value)?),
            "send-error" => Self::SendError(typed(value)?),
            "disconnected" => Self::Disconnected(typed(value)?),
            "token" => Self::Token(typed(value)?),
            "key" => Self::Key(typed(value)?),
            "auth" => Self::Auth(typed(value)?),
            "close" => Self::Close(typed(value)?),
            "application" => Self::Application(typed(value)?),
            _ => Self::Task(TaskMessage { kind, value }),
        })
    }
}
