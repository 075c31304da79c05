//! Peer structs used by the swarm engine.
//!
//! A peer is a client in a swarm. Within a swarm the peer identity is the
//! `(ip, port)` pair: a client that restarts on a new port becomes a new peer.
//!
//! A sample peer:
//!
//! ```rust,no_run
//! use std::net::{IpAddr, Ipv4Addr, SocketAddr};
//! use std::time::Duration;
//! use margay::core::auth::AnnounceKey;
//! use margay::core::peer::{self, Connectability};
//!
//! peer::Peer {
//!     user_id: Some(1),
//!     peer_id: peer::Id(*b"-qB00000000000000000"),
//!     peer_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::new(126, 0, 0, 1)), 8080),
//!     updated: Duration::from_secs(1_669_397_478),
//!     uploaded: 0,
//!     downloaded: 0,
//!     left: 0,
//!     announce_key: AnnounceKey::generate(),
//!     connectability: Connectability::Unknown,
//! };
//! ```
use std::net::{IpAddr, SocketAddr};

use serde::Serialize;

use crate::core::auth::AnnounceKey;
use crate::core::UserId;
use crate::shared::clock::DurationSinceUnixEpoch;

/// Peer ID. A 20-byte array chosen by the client.
///
/// The first bytes conventionally identify the client implementation, for
/// example `-qB4520-` for qBittorrent 4.5.2.
#[derive(PartialEq, Eq, Hash, Clone, Copy, Debug, PartialOrd, Ord)]
pub struct Id(pub [u8; 20]);

const PEER_ID_BYTES_LEN: usize = 20;

impl Id {
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 20] {
        self.0
    }

    /// The whitelist prefix: the leading bytes of the peer id that identify
    /// the client software.
    #[must_use]
    pub fn prefix(&self, len: usize) -> &[u8] {
        &self.0[..len.min(PEER_ID_BYTES_LEN)]
    }
}

impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        // Peer ids are binary; show printable ASCII and escape the rest.
        for byte in &self.0 {
            if byte.is_ascii_graphic() {
                write!(f, "{}", *byte as char)?;
            } else {
                write!(f, "%{byte:02x}")?;
            }
        }
        Ok(())
    }
}

impl From<[u8; 20]> for Id {
    fn from(bytes: [u8; 20]) -> Self {
        Id(bytes)
    }
}

/// Errors that can occur when converting from a `Vec<u8>` to a peer [`Id`].
#[derive(Debug, thiserror::Error)]
pub enum IdConversionError {
    #[error("not enough bytes for peer id: got {got} bytes, expected {PEER_ID_BYTES_LEN}")]
    NotEnoughBytes { got: usize },
    #[error("too many bytes for peer id: got {got} bytes, expected {PEER_ID_BYTES_LEN}")]
    TooManyBytes { got: usize },
}

impl TryFrom<Vec<u8>> for Id {
    type Error = IdConversionError;

    fn try_from(bytes: Vec<u8>) -> Result<Self, Self::Error> {
        if bytes.len() < PEER_ID_BYTES_LEN {
            return Err(IdConversionError::NotEnoughBytes { got: bytes.len() });
        }
        if bytes.len() > PEER_ID_BYTES_LEN {
            return Err(IdConversionError::TooManyBytes { got: bytes.len() });
        }

        let mut ret = Id([0u8; PEER_ID_BYTES_LEN]);
        ret.0.clone_from_slice(&bytes);
        Ok(ret)
    }
}

impl Serialize for Id {
    fn serialize<S: serde::Serializer>(&self, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&self.to_string())
    }
}

/// Announce events. Described on the
/// [BEP 3. The `BitTorrent` Protocol Specification](https://www.bittorrent.org/beps/bep_0003.html)
#[derive(Hash, Clone, Copy, Debug, Serialize, PartialEq, Eq)]
pub enum AnnounceEvent {
    /// The peer has started downloading the torrent.
    Started,
    /// The peer has ceased downloading the torrent.
    Stopped,
    /// The peer has completed downloading the torrent.
    Completed,
    /// This is one of the announcements done at regular intervals.
    None,
}

impl AnnounceEvent {
    /// Event mapping used by the UDP tracker protocol
    /// ([BEP 15](https://www.bittorrent.org/beps/bep_0015.html)).
    #[inline]
    #[must_use]
    pub fn from_i32(i: i32) -> Self {
        match i {
            1 => Self::Completed,
            2 => Self::Started,
            3 => Self::Stopped,
            _ => Self::None,
        }
    }

    #[inline]
    #[must_use]
    pub fn to_i32(&self) -> i32 {
        match self {
            AnnounceEvent::None => 0,
            AnnounceEvent::Completed => 1,
            AnnounceEvent::Started => 2,
            AnnounceEvent::Stopped => 3,
        }
    }
}

/// Whether a peer accepted an inbound TCP connection from the reachability
/// verifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Connectability {
    /// The last probe connected.
    Connectable,
    /// The last probe failed or timed out.
    Unreachable,
    /// Never probed, probe pending, or verification disabled.
    Unknown,
}

impl Connectability {
    /// Ordering weight for peer selection. Lower sorts first.
    #[must_use]
    pub fn score(&self) -> u8 {
        match self {
            Connectability::Connectable => 0,
            Connectability::Unknown => 1,
            Connectability::Unreachable => 2,
        }
    }
}

/// A peer in a swarm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Peer {
    /// The authenticated owner of this peer. UDP peers are anonymous.
    pub user_id: Option<UserId>,
    /// ID chosen by the downloader peer.
    pub peer_id: Id,
    /// The IP and port this peer is listening on. The swarm identity.
    pub peer_addr: SocketAddr,
    /// The last time the tracker received an announce request from this peer.
    pub updated: DurationSinceUnixEpoch,
    /// Total bytes uploaded, as last reported by the peer.
    pub uploaded: u64,
    /// Total bytes downloaded, as last reported by the peer.
    pub downloaded: u64,
    /// The number of bytes this peer still has to download.
    pub left: u64,
    /// Server-issued anti-spoof key the peer must echo on its next announce.
    pub announce_key: AnnounceKey,
    /// Result of the last reachability probe for this peer's address.
    pub connectability: Connectability,
}

impl Peer {
    /// A seeder is a peer with a complete copy: it reports `left == 0`.
    #[must_use]
    pub fn is_seeder(&self) -> bool {
        self.left == 0
    }

    #[must_use]
    pub fn ip(&self) -> IpAddr {
        self.peer_addr.ip()
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.peer_addr.port()
    }
}

#[cfg(test)]
mod tests {

    mod peer_id {
        use crate::core::peer::Id;

        #[test]
        fn it_should_expose_its_client_prefix() {
            let id = Id(*b"-qB00000000000000000");
            assert_eq!(id.prefix(3), b"-qB");
            assert_eq!(id.prefix(8), b"-qB00000");
        }

        #[test]
        fn it_should_be_converted_from_a_20_byte_vector() {
            let id: Id = b"-qB00000000000000000".to_vec().try_into().unwrap();
            assert_eq!(id.0, *b"-qB00000000000000000");

            assert!(Id::try_from(vec![0u8; 19]).is_err());
            assert!(Id::try_from(vec![0u8; 21]).is_err());
        }

        #[test]
        fn it_should_be_displayed_with_binary_bytes_escaped() {
            let mut bytes = *b"-qB00000000000000000";
            bytes[19] = 0xff;
            assert_eq!(Id(bytes).to_string(), "-qB0000000000000000%ff");
        }
    }

    mod announce_event {
        use crate::core::peer::AnnounceEvent;

        #[test]
        fn it_should_round_trip_the_udp_wire_mapping() {
            for event in [
                AnnounceEvent::None,
                AnnounceEvent::Completed,
                AnnounceEvent::Started,
                AnnounceEvent::Stopped,
            ] {
                assert_eq!(AnnounceEvent::from_i32(event.to_i32()), event);
            }

            // unknown values fall back to a regular announce
            assert_eq!(AnnounceEvent::from_i32(42), AnnounceEvent::None);
        }
    }

    mod peer {
        use std::net::{IpAddr, Ipv4Addr, SocketAddr};
        use std::time::Duration;

        use crate::core::auth::AnnounceKey;
        use crate::core::peer::{Connectability, Id, Peer};

        fn sample_peer(left: u64) -> Peer {
            Peer {
                user_id: Some(1),
                peer_id: Id(*b"-qB00000000000000000"),
                peer_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::new(126, 0, 0, 1)), 8080),
                updated: Duration::from_secs(0),
                uploaded: 0,
                downloaded: 0,
                left,
                announce_key: AnnounceKey::generate(),
                connectability: Connectability::Unknown,
            }
        }

        #[test]
        fn it_should_be_a_seeder_iff_it_has_nothing_left_to_download() {
            assert!(sample_peer(0).is_seeder());
            assert!(!sample_peer(1).is_seeder());
        }

        #[test]
        fn connectability_should_order_connectable_before_unknown_before_unreachable() {
            assert!(Connectability::Connectable.score() < Connectability::Unknown.score());
            assert!(Connectability::Unknown.score() < Connectability::Unreachable.score());
        }
    }
}
