//! Crypto provider seam.
//!
//! Every key store and auth token is constructed with an injected
//! [`CryptoProvider`]. The provider hands out keyed [`BoxCipher`]s: a
//! public-key cipher holds the precomputed shared secret for one
//! (their public key, our secret key) pair, a secret-key cipher holds a
//! symmetric key.
//!
//! [`NaclProvider`] is byte-compatible with NaCl:
//! - public-key boxes: `crypto_box` (X25519, XSalsa20, Poly1305)
//! - secret-key boxes: `crypto_secretbox` (XSalsa20, Poly1305)

use crypto_box::aead::generic_array::GenericArray;
use crypto_box::aead::Aead;
use crypto_box::SalsaBox;
use crypto_secretbox::aead::KeyInit;
use crypto_secretbox::XSalsa20Poly1305;
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;

/// Public key length in bytes.
pub const PUBLIC_KEY_LENGTH: usize = 32;

/// Secret (private) key length in bytes.
pub const SECRET_KEY_LENGTH: usize = 32;

/// Symmetric key length in bytes.
pub const SYMMETRIC_KEY_LENGTH: usize = 32;

/// Nonce length in bytes.
pub const NONCE_LENGTH: usize = 24;

/// Authentication overhead added by every box.
pub const BOX_OVERHEAD: usize = 16;

/// Raw public key bytes.
pub type PublicKey = [u8; PUBLIC_KEY_LENGTH];

/// Secret key bytes, wiped on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretKey([u8; SECRET_KEY_LENGTH]);

impl SecretKey {
    /// Wrap raw secret key bytes.
    pub fn from_bytes(bytes: [u8; SECRET_KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Parse a secret key from a byte slice.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let bytes: [u8; SECRET_KEY_LENGTH] =
            bytes.try_into().map_err(|_| CryptoError::InvalidLength {
                expected: SECRET_KEY_LENGTH,
                got: bytes.len(),
            })?;
        Ok(Self(bytes))
    }

    /// Get the raw bytes.
    ///
    /// # Security
    /// Handle with care! These bytes recreate the key pair.
    pub fn as_bytes(&self) -> &[u8; SECRET_KEY_LENGTH] {
        &self.0
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretKey(..)")
    }
}

/// Parse a public key from a byte slice.
pub fn public_key_from_slice(bytes: &[u8]) -> Result<PublicKey, CryptoError> {
    bytes.try_into().map_err(|_| CryptoError::InvalidLength {
        expected: PUBLIC_KEY_LENGTH,
        got: bytes.len(),
    })
}

/// Parse a public key from 64 hex characters.
pub fn public_key_from_hex(s: &str) -> Result<PublicKey, CryptoError> {
    let bytes = hex::decode(s).map_err(CryptoError::invalid_key)?;
    public_key_from_slice(&bytes)
}

/// A cipher bound to one fixed key.
pub trait BoxCipher: Send + Sync {
    /// Encrypt and authenticate `data` under `nonce`.
    fn seal(&self, data: &[u8], nonce: &[u8; NONCE_LENGTH]) -> Result<Vec<u8>, CryptoError>;

    /// Authenticate and decrypt `data` under `nonce`.
    fn open(&self, data: &[u8], nonce: &[u8; NONCE_LENGTH]) -> Result<Vec<u8>, CryptoError>;
}

/// Source of key material and keyed ciphers.
pub trait CryptoProvider: Send + Sync {
    /// Generate a fresh key pair.
    fn generate_keypair(&self) -> (PublicKey, SecretKey);

    /// Derive the public key belonging to a secret key.
    fn derive_public_key(&self, secret_key: &SecretKey) -> PublicKey;

    /// Fill `buf` with cryptographically secure random bytes.
    fn random_bytes(&self, buf: &mut [u8]);

    /// Precompute the shared secret for a (their public, our secret) pair.
    fn public_key_cipher(
        &self,
        their_public_key: &PublicKey,
        our_secret_key: &SecretKey,
    ) -> Result<Box<dyn BoxCipher>, CryptoError>;

    /// Build a cipher for a symmetric key.
    fn secret_key_cipher(
        &self,
        key: &[u8; SYMMETRIC_KEY_LENGTH],
    ) -> Result<Box<dyn BoxCipher>, CryptoError>;
}

/// NaCl-compatible provider backed by the RustCrypto box implementations.
#[derive(Debug, Default, Clone, Copy)]
pub struct NaclProvider;

impl CryptoProvider for NaclProvider {
    fn generate_keypair(&self) -> (PublicKey, SecretKey) {
        let secret = crypto_box::SecretKey::generate(&mut OsRng);
        let public = *secret.public_key().as_bytes();
        (public, SecretKey::from_bytes(secret.to_bytes()))
    }

    fn derive_public_key(&self, secret_key: &SecretKey) -> PublicKey {
        let secret = crypto_box::SecretKey::from(*secret_key.as_bytes());
        *secret.public_key().as_bytes()
    }

    fn random_bytes(&self, buf: &mut [u8]) {
        OsRng.fill_bytes(buf);
    }

    fn public_key_cipher(
        &self,
        their_public_key: &PublicKey,
        our_secret_key: &SecretKey,
    ) -> Result<Box<dyn BoxCipher>, CryptoError> {
        let public = crypto_box::PublicKey::from(*their_public_key);
        let secret = crypto_box::SecretKey::from(*our_secret_key.as_bytes());
        Ok(Box::new(PublicKeyCipher {
            inner: SalsaBox::new(&public, &secret),
        }))
    }

    fn secret_key_cipher(
        &self,
        key: &[u8; SYMMETRIC_KEY_LENGTH],
    ) -> Result<Box<dyn BoxCipher>, CryptoError> {
        let inner = XSalsa20Poly1305::new_from_slice(key).map_err(|_| CryptoError::InvalidLength {
            expected: SYMMETRIC_KEY_LENGTH,
            got: key.len(),
        })?;
        Ok(Box::new(SecretKeyCipher { inner }))
    }
}

struct PublicKeyCipher {
    inner: SalsaBox,
}

impl BoxCipher for PublicKeyCipher {
    fn seal(&self, data: &[u8], nonce: &[u8; NONCE_LENGTH]) -> Result<Vec<u8>, CryptoError> {
        self.inner
            .encrypt(GenericArray::from_slice(nonce), data)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))
    }

    fn open(&self, data: &[u8], nonce: &[u8; NONCE_LENGTH]) -> Result<Vec<u8>, CryptoError> {
        self.inner
            .decrypt(GenericArray::from_slice(nonce), data)
            .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
    }
}

struct SecretKeyCipher {
    inner: XSalsa20Poly1305,
}

impl BoxCipher for SecretKeyCipher {
    fn seal(&self, data: &[u8], nonce: &[u8; NONCE_LENGTH]) -> Result<Vec<u8>, CryptoError> {
        crypto_secretbox::aead::Aead::encrypt(&self.inner, GenericArray::from_slice(nonce), data)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))
    }

    fn open(&self, data: &[u8], nonce: &[u8; NONCE_LENGTH]) -> Result<Vec<u8>, CryptoError> {
        crypto_secretbox::aead::Aead::decrypt(&self.inner, GenericArray::from_slice(nonce), data)
            .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
    }
}
