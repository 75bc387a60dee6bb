//! Client configuration.
//!
//! [`ClientBuilder`] collects everything a connection needs and validates
//! it once. The result is a [`ClientConfig`] for the WebSocket driver, which
//! wraps the [`SignalingConfig`] for the protocol engine.

use std::time::Duration;

use salty_core::{DEFAULT_HISTORY_CAPACITY, DEFAULT_PING_INTERVAL};
use salty_crypto::{AuthToken, KeyStore, PublicKey};
use url::Url;

use crate::error::SignalingError;
use crate::state::SignalingRole;
use crate::task::Task;

/// Default timeout for a single WebSocket connect attempt.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default number of WebSocket connect attempts.
pub const DEFAULT_CONNECT_ATTEMPTS: u32 = 1;

/// Role-specific key material.
pub enum RoleConfig {
    Initiator {
        auth_token: AuthToken,
        /// Responder permanent key known in advance. Skips the token.
        responder_trusted_key: Option<PublicKey>,
    },
    Responder {
        initiator_public_key: PublicKey,
        /// Absent when the initiator's key is trusted and no token is sent.
        auth_token: Option<AuthToken>,
    },
}

impl RoleConfig {
    pub fn role(&self) -> SignalingRole {
        match self {
            Self::Initiator { .. } => SignalingRole::Initiator,
            Self::Responder { .. } => SignalingRole::Responder,
        }
    }
}

/// Everything the signaling engine needs.
pub struct SignalingConfig {
    pub permanent_key: KeyStore,
    /// Pinned server permanent key.
    pub server_key: Option<PublicKey>,
    pub role: RoleConfig,
    /// Supported tasks, most preferred first.
    pub tasks: Vec<Box<dyn Task>>,
    pub ping_interval: u32,
    pub history_capacity: usize,
}

impl SignalingConfig {
    /// The public permanent key of the initiator, which names the path.
    pub fn initiator_public_key(&self) -> PublicKey {
        match &self.role {
            RoleConfig::Initiator { .. } => *self.permanent_key.public_key(),
            RoleConfig::Responder {
                initiator_public_key,
                ..
            } => *initiator_public_key,
        }
    }

    /// The auth token to hand to the responder out-of-band.
    pub fn auth_token(&self) -> Option<&AuthToken> {
        match &self.role {
            RoleConfig::Initiator { auth_token, .. } => Some(auth_token),
            RoleConfig::Responder { auth_token, .. } => auth_token.as_ref(),
        }
    }
}

/// Signaling plus transport settings.
pub struct ClientConfig {
    /// Full WebSocket URL, path included.
    pub url: Url,
    pub connect_timeout: Duration,
    pub connect_attempts: u32,
    /// Wait `attempt` seconds between failed connect attempts.
    pub linear_backoff: bool,
    pub signaling: SignalingConfig,
}

/// Typed builder for [`ClientConfig`].
pub struct ClientBuilder {
    server_url: Option<String>,
    key_store: Option<KeyStore>,
    server_key: Option<PublicKey>,
    tasks: Vec<Box<dyn Task>>,
    ping_interval: u32,
    connect_timeout: Duration,
    connect_attempts: u32,
    linear_backoff: bool,
    history_capacity: usize,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self {
            server_url: None,
            key_store: None,
            server_key: None,
            tasks: Vec::new(),
            ping_interval: DEFAULT_PING_INTERVAL,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            connect_attempts: DEFAULT_CONNECT_ATTEMPTS,
            linear_backoff: false,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
        }
    }
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect to `wss://host:port`.
    pub fn connect_to(mut self, host: &str, port: u16) -> Self {
        self.server_url = Some(format!("wss://{}:{}", host, port));
        self
    }

    /// Connect to an explicit `ws://` or `wss://` base URL. Any path is
    /// replaced by the initiator's public key.
    pub fn with_server_url(mut self, url: impl Into<String>) -> Self {
        self.server_url = Some(url.into());
        self
    }

    pub fn with_key_store(mut self, key_store: KeyStore) -> Self {
        self.key_store = Some(key_store);
        self
    }

    /// Pin the server's permanent public key.
    pub fn with_server_key(mut self, key: PublicKey) -> Self {
        self.server_key = Some(key);
        self
    }

    pub fn with_task(mut self, task: Box<dyn Task>) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn with_tasks(mut self, tasks: Vec<Box<dyn Task>>) -> Self {
        self.tasks.extend(tasks);
        self
    }

    /// Seconds between server pings. Zero disables them.
    pub fn with_ping_interval(mut self, seconds: u32) -> Self {
        self.ping_interval = seconds;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_connect_attempts(mut self, attempts: u32, linear_backoff: bool) -> Self {
        self.connect_attempts = attempts;
        self.linear_backoff = linear_backoff;
        self
    }

    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    /// Build an initiator with a freshly generated auth token.
    pub fn as_initiator(self) -> Result<ClientConfig, SignalingError> {
        let key_store = self.require_key_store()?;
        let auth_token = AuthToken::generate(key_store.provider().as_ref())?;
        self.finish(RoleConfig::Initiator {
            auth_token,
            responder_trusted_key: None,
        })
    }

    /// Build an initiator that already knows the responder's permanent key.
    pub fn as_initiator_with_trusted_key(
        self,
        responder_key: PublicKey,
    ) -> Result<ClientConfig, SignalingError> {
        let key_store = self.require_key_store()?;
        let auth_token = AuthToken::generate(key_store.provider().as_ref())?;
        self.finish(RoleConfig::Initiator {
            auth_token,
            responder_trusted_key: Some(responder_key),
        })
    }

    /// Build a responder that authenticates with a one-time token.
    pub fn as_responder(
        self,
        initiator_key: PublicKey,
        auth_token: AuthToken,
    ) -> Result<ClientConfig, SignalingError> {
        self.finish(RoleConfig::Responder {
            initiator_public_key: initiator_key,
            auth_token: Some(auth_token),
        })
    }

    /// Build a responder whose key the initiator already trusts.
    pub fn as_responder_with_trusted_key(
        self,
        initiator_key: PublicKey,
    ) -> Result<ClientConfig, SignalingError> {
        self.finish(RoleConfig::Responder {
            initiator_public_key: initiator_key,
            auth_token: None,
        })
    }

    fn require_key_store(&self) -> Result<&KeyStore, SignalingError> {
        self.key_store
            .as_ref()
            .ok_or_else(|| SignalingError::Config("a permanent key store is required".into()))
    }

    fn finish(self, role: RoleConfig) -> Result<ClientConfig, SignalingError> {
        let permanent_key = self.require_key_store()?.clone();

        let peer_key = match &role {
            RoleConfig::Initiator {
                responder_trusted_key,
                ..
            } => responder_trusted_key.as_ref(),
            RoleConfig::Responder {
                initiator_public_key,
                ..
            } => Some(initiator_public_key),
        };
        if peer_key == Some(permanent_key.public_key()) {
            return Err(SignalingError::Config(
                "peer key must differ from our own permanent key".into(),
            ));
        }

        if self.tasks.is_empty() {
            return Err(SignalingError::Config("at least one task is required".into()));
        }
        if self.connect_attempts == 0 {
            return Err(SignalingError::Config(
                "connect attempts must be at least 1".into(),
            ));
        }

        let server_url = self
            .server_url
            .ok_or_else(|| SignalingError::Config("server url is required".into()))?;
        let mut url = Url::parse(&server_url)
            .map_err(|e| SignalingError::Config(format!("invalid server url: {}", e)))?;
        if url.scheme() != "ws" && url.scheme() != "wss" {
            return Err(SignalingError::Config(format!(
                "unsupported url scheme: {}",
                url.scheme()
            )));
        }

        let signaling = SignalingConfig {
            permanent_key,
            server_key: self.server_key,
            role,
            tasks: self.tasks,
            ping_interval: self.ping_interval,
            history_capacity: self.history_capacity,
        };
        url.set_path(&hex::encode(signaling.initiator_public_key()));

        Ok(ClientConfig {
            url,
            connect_timeout: self.connect_timeout,
            connect_attempts: self.connect_attempts,
            linear_backoff: self.linear_backoff,
            signaling,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::RelayedDataTask;
    use salty_crypto::NaclProvider;
    use std::sync::Arc;

    fn key_store() -> KeyStore {
        KeyStore::generate(Arc::new(NaclProvider))
    }

    fn builder() -> ClientBuilder {
        ClientBuilder::new()
            .with_server_url("ws://localhost:8765")
            .with_key_store(key_store())
            .with_task(Box::new(RelayedDataTask::new()))
    }

    #[test]
    fn test_initiator_path_is_own_key() {
        let keys = key_store();
        let config = builder().with_key_store(keys.clone()).as_initiator().unwrap();

        assert_eq!(config.url.path(), format!("/{}", keys.public_key_hex()));
        assert_eq!(config.signaling.role.role(), SignalingRole::Initiator);
        assert!(config.signaling.auth_token().is_some());
    }

    #[test]
    fn test_responder_path_is_initiator_key() {
        let initiator = key_store();
        let token = AuthToken::generate(&NaclProvider).unwrap();
        let config = builder()
            .connect_to("relay.example.org", 443)
            .as_responder(*initiator.public_key(), token)
            .unwrap();

        assert_eq!(config.url.scheme(), "wss");
        assert_eq!(config.url.host_str(), Some("relay.example.org"));
        assert_eq!(config.url.path(), format!("/{}", initiator.public_key_hex()));
    }

    #[test]
    fn test_missing_pieces_are_config_errors() {
        let no_key = ClientBuilder::new()
            .with_server_url("ws://localhost:1")
            .with_task(Box::new(RelayedDataTask::new()))
            .as_initiator();
        assert!(matches!(no_key, Err(SignalingError::Config(_))));

        let no_task = ClientBuilder::new()
            .with_server_url("ws://localhost:1")
            .with_key_store(key_store())
            .as_initiator();
        assert!(matches!(no_task, Err(SignalingError::Config(_))));

        let no_url = ClientBuilder::new()
            .with_key_store(key_store())
            .with_task(Box::new(RelayedDataTask::new()))
            .as_initiator();
        assert!(matches!(no_url, Err(SignalingError::Config(_))));

        let bad_scheme = builder().with_server_url("http://localhost:1").as_initiator();
        assert!(matches!(bad_scheme, Err(SignalingError::Config(_))));

        let no_attempts = builder().with_connect_attempts(0, false).as_initiator();
        assert!(matches!(no_attempts, Err(SignalingError::Config(_))));
    }

    #[test]
    fn test_own_key_as_peer_key_rejected() {
        let keys = key_store();
        let result = builder()
            .with_key_store(keys.clone())
            .as_responder_with_trusted_key(*keys.public_key());
        assert!(matches!(result, Err(SignalingError::Config(_))));
    }
}
