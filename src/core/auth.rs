//! Tracker authentication keys.
//!
//! Two kinds of keys authenticate announce traffic:
//!
//! - The per-user [`Passkey`]: a 32-hex-character secret placed in the URL
//!   path (`/{passkey}/announce`). Passkeys are created by the external admin
//!   surface; the tracker only looks them up.
//! - The per-peer [`AnnounceKey`]: an opaque token issued by the tracker on a
//!   peer's first announce and required on subsequent announces for the same
//!   `(info_hash, ip, port)` tuple, so another client cannot impersonate the
//!   peer and poison its stats.
use std::str::FromStr;

use derive_more::Display;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::shared::bit_torrent::{ANNOUNCE_KEY_LENGTH, PASSKEY_LENGTH};

/// A per-user secret of exactly 32 hex characters (lowercase or uppercase).
#[derive(Serialize, Deserialize, Debug, Eq, PartialEq, Clone, Display, Hash)]
pub struct Passkey(String);

impl Passkey {
    #[must_use]
    pub fn value(&self) -> &str {
        &self.0
    }
}

/// Error returned when a passkey cannot be parsed from a string.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParsePasskeyError {
    #[error("passkey must be exactly {PASSKEY_LENGTH} characters, got {got}")]
    InvalidLength { got: usize },
    #[error("passkey must be hexadecimal")]
    NotHexadecimal,
}

impl FromStr for Passkey {
    type Err = ParsePasskeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != PASSKEY_LENGTH {
            return Err(ParsePasskeyError::InvalidLength { got: s.len() });
        }

        if !s.bytes().all(|byte| byte.is_ascii_hexdigit()) {
            return Err(ParsePasskeyError::NotHexadecimal);
        }

        Ok(Self(s.to_ascii_lowercase()))
    }
}

/// A per-peer anti-spoof token: 8 random bytes, hex encoded to 16 characters.
///
/// The tracker sends it to the peer as `tracker id` and the peer echoes it in
/// the `key` query parameter.
#[derive(Serialize, Deserialize, Debug, Eq, PartialEq, Clone, Display, Hash)]
pub struct AnnounceKey(String);

impl AnnounceKey {
    /// Generates a fresh random key.
    #[must_use]
    pub fn generate() -> Self {
        let bytes: [u8; 8] = rand::thread_rng().gen();
        let mut chars = [0u8; ANNOUNCE_KEY_LENGTH];
        binascii::bin2hex(&bytes, &mut chars).expect("failed to hexlify");
        Self(String::from_utf8(chars.to_vec()).expect("hex is ASCII"))
    }

    #[must_use]
    pub fn value(&self) -> &str {
        &self.0
    }
}

/// Error returned when an announce key cannot be parsed from a string.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseAnnounceKeyError {
    #[error("announce key must be exactly {ANNOUNCE_KEY_LENGTH} characters, got {got}")]
    InvalidLength { got: usize },
    #[error("announce key must be hexadecimal")]
    NotHexadecimal,
}

impl FromStr for AnnounceKey {
    type Err = ParseAnnounceKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != ANNOUNCE_KEY_LENGTH {
            return Err(ParseAnnounceKeyError::InvalidLength { got: s.len() });
        }

        if !s.bytes().all(|byte| byte.is_ascii_hexdigit()) {
            return Err(ParseAnnounceKeyError::NotHexadecimal);
        }

        Ok(Self(s.to_ascii_lowercase()))
    }
}
