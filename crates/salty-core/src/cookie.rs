//! Per-direction cookies.

use std::fmt;

use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::ValidationError;

/// Cookie length in bytes.
pub const COOKIE_LENGTH: usize = 16;

/// 16 random bytes identifying one direction of a peer relationship.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cookie([u8; COOKIE_LENGTH]);

impl Cookie {
    /// Generate a random cookie.
    pub fn random() -> Self {
        let mut bytes = [0u8; COOKIE_LENGTH];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; COOKIE_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Parse a cookie from a received byte field.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ValidationError> {
        let bytes: [u8; COOKIE_LENGTH] = bytes.try_into().map_err(|_| {
            ValidationError::critical(format!(
                "cookie must be {} bytes, got {}",
                COOKIE_LENGTH,
                bytes.len()
            ))
        })?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; COOKIE_LENGTH] {
        &self.0
    }
}

impl fmt::Debug for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cookie({})", hex::encode(self.0))
    }
}

/// Our cookie towards one peer plus the peer's cookie once seen.
///
/// Ours never equals theirs.
#[derive(Debug, Clone)]
pub struct CookiePair {
    ours: Cookie,
    theirs: Option<Cookie>,
}

impl CookiePair {
    pub fn new() -> Self {
        Self {
            ours: Cookie::random(),
            theirs: None,
        }
    }

    /// Build a pair for a peer whose cookie is already known.
    pub fn from_theirs(theirs: Cookie) -> Self {
        let mut ours = Cookie::random();
        while ours == theirs {
            ours = Cookie::random();
        }
        Self {
            ours,
            theirs: Some(theirs),
        }
    }

    pub fn ours(&self) -> &Cookie {
        &self.ours
    }

    pub fn theirs(&self) -> Option<&Cookie> {
        self.theirs.as_ref()
    }

    /// Store the peer's cookie.
    pub fn set_theirs(&mut self, cookie: Cookie) -> Result<(), ValidationError> {
        if cookie == self.ours {
            return Err(ValidationError::critical(
                "their cookie and our cookie are the same",
            ));
        }
        self.theirs = Some(cookie);
        Ok(())
    }

    /// Check the cookie of an incoming nonce.
    ///
    /// The first cookie is stored, every later one must repeat it.
    pub fn validate_incoming(&mut self, cookie: &Cookie) -> Result<(), ValidationError> {
        match self.theirs {
            None => self.set_theirs(*cookie),
            Some(ref theirs) if theirs == cookie => Ok(()),
            Some(_) => Err(ValidationError::critical("cookie changed")),
        }
    }
}

impl Default for CookiePair {
    fn default() -> Self {
        Self::new()
    }
}
