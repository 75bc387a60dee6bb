//! One-time auth token.
//!
//! The token is a 32-byte symmetric key shared out-of-band between the
//! initiator and one responder. It only protects the responder's very first
//! message, before any permanent or session key is known to the initiator.

use std::fmt;
use std::sync::Arc;

use zeroize::Zeroizing;

use crate::boxed::CryptoBox;
use crate::error::CryptoError;
use crate::provider::{BoxCipher, CryptoProvider, NONCE_LENGTH, SYMMETRIC_KEY_LENGTH};

/// One-time symmetric secret for the `token` message.
#[derive(Clone)]
pub struct AuthToken {
    key: Zeroizing<[u8; SYMMETRIC_KEY_LENGTH]>,
    cipher: Arc<dyn BoxCipher>,
}

impl AuthToken {
    /// Generate a new random token.
    pub fn generate(provider: &dyn CryptoProvider) -> Result<Self, CryptoError> {
        let mut key = Zeroizing::new([0u8; SYMMETRIC_KEY_LENGTH]);
        provider.random_bytes(key.as_mut());
        Self::with_key(provider, key)
    }

    /// Use a token that was provisioned out-of-band.
    pub fn from_bytes(provider: &dyn CryptoProvider, bytes: &[u8]) -> Result<Self, CryptoError> {
        let key: [u8; SYMMETRIC_KEY_LENGTH] =
            bytes.try_into().map_err(|_| CryptoError::InvalidLength {
                expected: SYMMETRIC_KEY_LENGTH,
                got: bytes.len(),
            })?;
        Self::with_key(provider, Zeroizing::new(key))
    }

    /// Parse a token from 64 hex characters.
    pub fn from_hex(provider: &dyn CryptoProvider, s: &str) -> Result<Self, CryptoError> {
        let bytes = Zeroizing::new(hex::decode(s).map_err(CryptoError::invalid_key)?);
        Self::from_bytes(provider, &bytes)
    }

    fn with_key(
        provider: &dyn CryptoProvider,
        key: Zeroizing<[u8; SYMMETRIC_KEY_LENGTH]>,
    ) -> Result<Self, CryptoError> {
        let cipher = provider.secret_key_cipher(&key)?;
        Ok(Self {
            key,
            cipher: Arc::from(cipher),
        })
    }

    pub fn as_bytes(&self) -> &[u8; SYMMETRIC_KEY_LENGTH] {
        &self.key
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.key.as_ref())
    }

    pub fn encrypt(&self, data: &[u8], nonce: [u8; NONCE_LENGTH]) -> Result<CryptoBox, CryptoError> {
        let ciphertext = self.cipher.seal(data, &nonce)?;
        Ok(CryptoBox::new(nonce, ciphertext))
    }

    pub fn decrypt(&self, sealed: &CryptoBox) -> Result<Vec<u8>, CryptoError> {
        self.cipher.open(sealed.data(), sealed.nonce())
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthToken(..)")
    }
}
