//! Local key pairs and precomputed shared keys.
//!
//! A [`KeyStore`] owns one key pair. It can box data for an arbitrary remote
//! public key in one shot, or derive a [`SharedKeyStore`] that keeps the
//! shared secret for one fixed remote key so it is not recomputed for
//! every message.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use salty_crypto::{KeyStore, NaclProvider};
//!
//! let provider = Arc::new(NaclProvider);
//! let alice = KeyStore::generate(provider.clone());
//! let bob = KeyStore::generate(provider);
//!
//! let nonce = [0u8; 24];
//! let sealed = alice.encrypt(b"hi bob", nonce, bob.public_key()).unwrap();
//!
//! let shared = bob.shared_key_store(alice.public_key()).unwrap();
//! assert_eq!(shared.decrypt(&sealed).unwrap(), b"hi bob");
//! ```

use std::fmt;
use std::sync::Arc;

use crate::boxed::CryptoBox;
use crate::error::CryptoError;
use crate::provider::{BoxCipher, CryptoProvider, PublicKey, SecretKey, NONCE_LENGTH};

/// Local key pair bound to a crypto provider.
#[derive(Clone)]
pub struct KeyStore {
    provider: Arc<dyn CryptoProvider>,
    public_key: PublicKey,
    secret_key: SecretKey,
}

impl KeyStore {
    /// Generate a new random key pair.
    pub fn generate(provider: Arc<dyn CryptoProvider>) -> Self {
        let (public_key, secret_key) = provider.generate_keypair();
        Self {
            provider,
            public_key,
            secret_key,
        }
    }

    /// Restore a key pair from its secret key.
    pub fn from_secret_key(provider: Arc<dyn CryptoProvider>, secret_key: SecretKey) -> Self {
        let public_key = provider.derive_public_key(&secret_key);
        Self {
            provider,
            public_key,
            secret_key,
        }
    }

    /// Restore a key pair from a hex encoded secret key.
    pub fn from_secret_hex(provider: Arc<dyn CryptoProvider>, s: &str) -> Result<Self, CryptoError> {
        let bytes = zeroize::Zeroizing::new(hex::decode(s).map_err(CryptoError::invalid_key)?);
        let secret_key = SecretKey::from_slice(&bytes)?;
        Ok(Self::from_secret_key(provider, secret_key))
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// Public key as 64 lowercase hex characters.
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key)
    }

    pub fn secret_key(&self) -> &SecretKey {
        &self.secret_key
    }

    /// Secret key as 64 lowercase hex characters.
    ///
    /// # Security
    /// Handle with care! This recreates the identity.
    pub fn secret_key_hex(&self) -> String {
        hex::encode(self.secret_key.as_bytes())
    }

    pub fn provider(&self) -> &Arc<dyn CryptoProvider> {
        &self.provider
    }

    /// One-shot box for `their_public_key`.
    pub fn encrypt(
        &self,
        data: &[u8],
        nonce: [u8; NONCE_LENGTH],
        their_public_key: &PublicKey,
    ) -> Result<CryptoBox, CryptoError> {
        let cipher = self.cipher_for(their_public_key)?;
        let ciphertext = cipher.seal(data, &nonce)?;
        Ok(CryptoBox::new(nonce, ciphertext))
    }

    /// One-shot open of a box from `their_public_key`.
    pub fn decrypt(
        &self,
        sealed: &CryptoBox,
        their_public_key: &PublicKey,
    ) -> Result<Vec<u8>, CryptoError> {
        let cipher = self.cipher_for(their_public_key)?;
        cipher.open(sealed.data(), sealed.nonce())
    }

    /// Precompute the shared key for `their_public_key`.
    pub fn shared_key_store(&self, their_public_key: &PublicKey) -> Result<SharedKeyStore, CryptoError> {
        let cipher = self.cipher_for(their_public_key)?;
        Ok(SharedKeyStore {
            remote_public_key: *their_public_key,
            cipher: Arc::from(cipher),
        })
    }

    fn cipher_for(&self, their_public_key: &PublicKey) -> Result<Box<dyn BoxCipher>, CryptoError> {
        if their_public_key == &self.public_key {
            return Err(CryptoError::invalid_key(
                "remote public key equals our own public key",
            ));
        }
        self.provider
            .public_key_cipher(their_public_key, &self.secret_key)
    }
}

impl fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyStore({})", self.public_key_hex())
    }
}

/// Precomputed shared secret for one remote public key.
#[derive(Clone)]
pub struct SharedKeyStore {
    remote_public_key: PublicKey,
    cipher: Arc<dyn BoxCipher>,
}

impl SharedKeyStore {
    pub fn remote_public_key(&self) -> &PublicKey {
        &self.remote_public_key
    }

    pub fn encrypt(&self, data: &[u8], nonce: [u8; NONCE_LENGTH]) -> Result<CryptoBox, CryptoError> {
        let ciphertext = self.cipher.seal(data, &nonce)?;
        Ok(CryptoBox::new(nonce, ciphertext))
    }

    pub fn decrypt(&self, sealed: &CryptoBox) -> Result<Vec<u8>, CryptoError> {
        self.cipher.open(sealed.data(), sealed.nonce())
    }
}

impl fmt::Debug for SharedKeyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedKeyStore({})", hex::encode(self.remote_public_key))
    }
}
