//! Errors the core tracker services can return.
//!
//! Every rejection a client can cause maps to exactly one variant, and every
//! variant knows its wire message. Request handlers translate the variant into
//! the transport's error form: a bencoded `failure reason` for HTTP, an error
//! frame for UDP.
use std::time::Duration;

use thiserror::Error;

use crate::core::swarm;

#[derive(Debug, Error)]
pub enum Error {
    // Authentication
    #[error("Passkey required")]
    PasskeyRequired,
    #[error("Invalid passkey")]
    InvalidPasskey,

    // Authorization
    #[error("Your IP is banned: {reason}")]
    Banned { reason: String },
    #[error("Client not whitelisted")]
    ClientNotWhitelisted,
    #[error("Torrent not registered")]
    TorrentNotRegistered,
    #[error("Leeching disabled - please contact staff")]
    LeechingDisabled,
    #[error("Ratio too low - seed more before downloading")]
    RatioTooLow,
    #[error("Announce key required")]
    AnnounceKeyRequired,
    #[error("Invalid announce key")]
    InvalidAnnounceKey,

    // Capacity
    #[error("Rate limit exceeded, retry in {} seconds", retry_after.as_secs())]
    RateLimited { retry_after: Duration },

    // Policy (admin paths)
    #[error("User not found")]
    UserNotFound,
    #[error("Insufficient bonus points")]
    InsufficientPoints,
    #[error("Duplicate record: {message}")]
    Duplicate { message: String },
    #[error("Invalid IP or CIDR: {message}")]
    InvalidCidr { message: String },

    // Transient
    #[error("Tracker temporarily unavailable")]
    Transient { detail: String },
}

impl Error {
    /// The string placed in the bencoded `failure reason` or the UDP error
    /// frame.
    #[must_use]
    pub fn failure_reason(&self) -> String {
        self.to_string()
    }
}

impl From<swarm::Error> for Error {
    fn from(err: swarm::Error) -> Self {
        match err {
            swarm::Error::KeyRequired => Error::AnnounceKeyRequired,
            swarm::Error::InvalidKey => Error::InvalidAnnounceKey,
            swarm::Error::TorrentNotRegistered => Error::TorrentNotRegistered,
            swarm::Error::PeerStore { source } => Error::Transient {
                detail: source.to_string(),
            },
            swarm::Error::Database { source } => Error::Transient {
                detail: source.to_string(),
            },
            swarm::Error::WorkerUnavailable => Error::Transient {
                detail: "swarm worker unavailable".to_string(),
            },
        }
    }
}

impl From<crate::core::databases::error::Error> for Error {
    fn from(err: crate::core::databases::error::Error) -> Self {
        Error::Transient { detail: err.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::Error;
    use crate::core::swarm;

    #[test]
    fn rejections_should_carry_their_wire_message() {
        assert_eq!(Error::InvalidPasskey.failure_reason(), "Invalid passkey");
        assert!(Error::RatioTooLow.failure_reason().starts_with("Ratio too low"));
        assert!(Error::LeechingDisabled.failure_reason().starts_with("Leeching disabled"));
    }

    #[test]
    fn swarm_key_errors_should_map_to_announce_key_rejections() {
        assert!(matches!(Error::from(swarm::Error::KeyRequired), Error::AnnounceKeyRequired));
        assert!(matches!(Error::from(swarm::Error::InvalidKey), Error::InvalidAnnounceKey));
    }

    #[test]
    fn the_rate_limit_message_should_name_the_retry_delay() {
        let error = Error::RateLimited {
            retry_after: std::time::Duration::from_secs(42),
        };
        assert_eq!(error.failure_reason(), "Rate limit exceeded, retry in 42 seconds");
    }
}
