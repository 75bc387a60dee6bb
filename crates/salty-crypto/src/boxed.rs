//! Nonce + payload unit exchanged on the wire.

use crate::error::CryptoError;
use crate::provider::NONCE_LENGTH;

/// A nonce followed by authenticated ciphertext.
///
/// The plaintext bootstrap messages reuse the same shape with an
/// unencrypted payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CryptoBox {
    nonce: [u8; NONCE_LENGTH],
    data: Vec<u8>,
}

impl CryptoBox {
    pub fn new(nonce: [u8; NONCE_LENGTH], data: Vec<u8>) -> Self {
        Self { nonce, data }
    }

    /// Split a raw frame into nonce and payload.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() < NONCE_LENGTH {
            return Err(CryptoError::InvalidLength {
                expected: NONCE_LENGTH,
                got: bytes.len(),
            });
        }

        let mut nonce = [0u8; NONCE_LENGTH];
        nonce.copy_from_slice(&bytes[..NONCE_LENGTH]);

        Ok(Self {
            nonce,
            data: bytes[NONCE_LENGTH..].to_vec(),
        })
    }

    /// Concatenate nonce and payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(NONCE_LENGTH + self.data.len());
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.data);
        out
    }

    pub fn nonce(&self) -> &[u8; NONCE_LENGTH] {
        &self.nonce
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}
