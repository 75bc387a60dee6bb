//! Cryptographic primitives for Salty.
//!
//! This crate provides:
//! - NaCl-compatible public-key and secret-key boxes behind a provider seam
//! - Key stores for permanent and session key pairs
//! - Precomputed shared keys for a fixed remote peer
//! - One-time auth tokens
//!
//! # Design
//!
//! All cryptography goes through an injected [`CryptoProvider`]. The default
//! [`NaclProvider`] produces output that is byte-identical to NaCl
//! `crypto_box` / `crypto_secretbox`, so peers built on other NaCl
//! implementations interoperate.
//!
//! Nonces are always supplied by the caller. The signaling layer builds them
//! from cookie, source, destination and combined sequence number, which is
//! what makes replays detectable.

#![forbid(unsafe_code)]

pub mod auth_token;
pub mod boxed;
pub mod error;
pub mod keystore;
pub mod provider;

pub use auth_token::AuthToken;
pub use boxed::CryptoBox;
pub use error::CryptoError;
pub use keystore::{KeyStore, SharedKeyStore};
pub use provider::{
    public_key_from_hex, public_key_from_slice, BoxCipher, CryptoProvider, NaclProvider,
    PublicKey, SecretKey, BOX_OVERHEAD, NONCE_LENGTH, PUBLIC_KEY_LENGTH, SECRET_KEY_LENGTH,
    SYMMETRIC_KEY_LENGTH,
};
