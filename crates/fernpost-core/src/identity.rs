//! Identity ids and edition addresses
//!
//! Every document is owned by exactly one identity. The identity id is the
//! 43 character URL-safe base64 encoding of a 256 bit public key hash; it is
//! what posts and replies use to refer to their sender and recipient.
//!
//! An [`Address`] locates one edition of a document in the network store.
//! The key part is opaque to this crate; only the edition number is
//! interpreted.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Length of an encoded identity id
pub const IDENTITY_ID_LENGTH: usize = 43;

/// Errors that can occur when parsing ids and addresses
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("Invalid identity id '{0}': expected {IDENTITY_ID_LENGTH} base64 characters")]
    InvalidId(String),

    #[error("Invalid address '{0}': expected <key>/<edition>")]
    InvalidAddress(String),
}

/// The id of the identity owning a document
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityId(String);

impl IdentityId {
    /// Parse a well-formed identity id
    ///
    /// Returns `None` unless the input is exactly [`IDENTITY_ID_LENGTH`]
    /// characters of the URL-safe base64 alphabet (`A-Z a-z 0-9 - ~ _`).
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        let well_formed = s.len() == IDENTITY_ID_LENGTH
            && s
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'~' | b'_'));
        well_formed.then(|| Self(s.to_string()))
    }

    /// Wrap an id without validation
    ///
    /// Used for ids that come from trusted local configuration.
    pub fn new_unchecked(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Stable placeholder id for an address key
    ///
    /// Used when a payload is handled without knowing its owner. The hex
    /// digest is a subset of the id alphabet, so the result always parses.
    pub fn derive(key: &str) -> Self {
        let digest = hex::encode(Sha256::digest(key.as_bytes()));
        Self(digest[..IDENTITY_ID_LENGTH].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for IdentityId {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| IdentityError::InvalidId(s.to_string()))
    }
}

/// Locator of one edition of a document
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    /// Opaque, edition-independent part of the address
    pub key: String,
    /// Edition number
    pub edition: u64,
}

impl Address {
    pub fn new(key: impl Into<String>, edition: u64) -> Self {
        Self {
            key: key.into(),
            edition,
        }
    }

    /// The same key at a different edition
    pub fn with_edition(&self, edition: u64) -> Self {
        Self {
            key: self.key.clone(),
            edition,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.key, self.edition)
    }
}

impl FromStr for Address {
    type Err = IdentityError;

    /// Parse `<key>/<edition>`; the key itself may contain slashes
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || IdentityError::InvalidAddress(s.to_string());
        let (key, edition) = s.rsplit_once('/').ok_or_else(invalid)?;
        if key.is_empty() {
            return Err(invalid());
        }
        let edition = edition.parse().map_err(|_| invalid())?;
        Ok(Self::new(key, edition))
    }
}
