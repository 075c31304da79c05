//! The external (Redis) peer storage backend.
//!
//! Layout per torrent:
//!
//! - `margay:peers:<info_hash>`: a hash mapping `ip:port` to the serialized
//!   peer.
//! - `margay:peers_ts:<info_hash>`: a sorted set mapping `ip:port` to the
//!   peer's last announce timestamp, used for expiry sweeps.
//!
//! Writes touch both keys in one atomic `MULTI`/`EXEC` pipeline so the hash
//! and the index never diverge. Every call is bounded by a timeout; a slow or
//! unreachable Redis surfaces as a transient error to the announce path
//! instead of hanging it.
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};

use super::{Error, PeerKey, PeerStorage};
use crate::core::auth::AnnounceKey;
use crate::core::peer::{Connectability, Id, Peer};
use crate::core::UserId;
use crate::shared::bit_torrent::info_hash::InfoHash;
use crate::shared::clock::DurationSinceUnixEpoch;

/// Upper bound for a single Redis round trip.
const CALL_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Redis {
    connection: ConnectionManager,
}

impl Redis {
    /// It connects to the Redis server behind the URL.
    ///
    /// # Errors
    ///
    /// Will return an [`enum@Error`] if the URL is malformed or the initial
    /// connection fails.
    pub async fn new(url: &str) -> Result<Self, Error> {
        let client = redis::Client::open(url)?;
        let connection = with_timeout(ConnectionManager::new(client)).await??;

        Ok(Self { connection })
    }

    fn peers_key(info_hash: &InfoHash) -> String {
        format!("margay:peers:{info_hash}")
    }

    fn index_key(info_hash: &InfoHash) -> String {
        format!("margay:peers_ts:{info_hash}")
    }
}

async fn with_timeout<T>(future: impl Future<Output = T>) -> Result<T, Error> {
    tokio::time::timeout(CALL_TIMEOUT, future).await.map_err(|_| Error::Timeout)
}

/// Wire form of a peer in the hash. A separate struct so the in-memory peer
/// can evolve without silently breaking stored data.
#[derive(Serialize, Deserialize)]
struct StoredPeer {
    user_id: Option<UserId>,
    peer_id: [u8; 20],
    updated: u64,
    uploaded: u64,
    downloaded: u64,
    left: u64,
    announce_key: String,
    connectable: Option<bool>,
}

impl StoredPeer {
    fn from_peer(peer: &Peer) -> Self {
        Self {
            user_id: peer.user_id,
            peer_id: peer.peer_id.to_bytes(),
            updated: peer.updated.as_secs(),
            uploaded: peer.uploaded,
            downloaded: peer.downloaded,
            left: peer.left,
            announce_key: peer.announce_key.value().to_string(),
            connectable: match peer.connectability {
                Connectability::Connectable => Some(true),
                Connectability::Unreachable => Some(false),
                Connectability::Unknown => None,
            },
        }
    }

    fn into_peer(self, peer_addr: SocketAddr) -> Result<Peer, Error> {
        Ok(Peer {
            user_id: self.user_id,
            peer_id: Id(self.peer_id),
            peer_addr,
            updated: Duration::from_secs(self.updated),
            uploaded: self.uploaded,
            downloaded: self.downloaded,
            left: self.left,
            announce_key: AnnounceKey::from_str(&self.announce_key).map_err(|err| Error::Corrupt {
                reason: err.to_string(),
            })?,
            connectability: match self.connectable {
                Some(true) => Connectability::Connectable,
                Some(false) => Connectability::Unreachable,
                None => Connectability::Unknown,
            },
        })
    }
}

fn member(key: &PeerKey) -> String {
    key.to_string()
}

fn parse_member(member: &str) -> Result<PeerKey, Error> {
    member.parse::<SocketAddr>().map_err(|err| Error::Corrupt {
        reason: format!("bad peer member {member}: {err}"),
    })
}

fn encode(peer: &Peer) -> Result<String, Error> {
    serde_json::to_string(&StoredPeer::from_peer(peer)).map_err(|err| Error::Corrupt {
        reason: err.to_string(),
    })
}

fn decode(member: &str, raw: &str) -> Result<Peer, Error> {
    let stored: StoredPeer = serde_json::from_str(raw).map_err(|err| Error::Corrupt {
        reason: err.to_string(),
    })?;

    stored.into_peer(parse_member(member)?)
}

#[async_trait]
impl PeerStorage for Redis {
    async fn get_peer(&self, info_hash: &InfoHash, key: &PeerKey) -> Result<Option<Peer>, Error> {
        let mut connection = self.connection.clone();
        let member = member(key);

        let raw: Option<String> = with_timeout(connection.hget(Self::peers_key(info_hash), &member)).await??;

        raw.map(|raw| decode(&member, &raw)).transpose()
    }

    async fn put_peer(&self, info_hash: &InfoHash, key: PeerKey, peer: Peer) -> Result<(), Error> {
        let mut connection = self.connection.clone();
        let member = member(&key);
        let encoded = encode(&peer)?;

        let mut pipe = redis::pipe();
        pipe.atomic()
            .hset(Self::peers_key(info_hash), &member, encoded)
            .ignore()
            .zadd(Self::index_key(info_hash), &member, peer.updated.as_secs())
            .ignore();

        with_timeout(pipe.query_async::<()>(&mut connection)).await??;

        Ok(())
    }

    async fn delete_peer(&self, info_hash: &InfoHash, key: &PeerKey) -> Result<(), Error> {
        let mut connection = self.connection.clone();
        let member = member(key);

        let mut pipe = redis::pipe();
        pipe.atomic()
            .hdel(Self::peers_key(info_hash), &member)
            .ignore()
            .zrem(Self::index_key(info_hash), &member)
            .ignore();

        with_timeout(pipe.query_async::<()>(&mut connection)).await??;

        Ok(())
    }

    async fn get_all_peers(&self, info_hash: &InfoHash) -> Result<HashMap<PeerKey, Peer>, Error> {
        let mut connection = self.connection.clone();

        let raw: HashMap<String, String> = with_timeout(connection.hgetall(Self::peers_key(info_hash))).await??;

        let mut peers = HashMap::with_capacity(raw.len());
        for (member, encoded) in &raw {
            let peer = decode(member, encoded)?;
            peers.insert(peer.peer_addr, peer);
        }

        Ok(peers)
    }

    async fn count_peers(&self, info_hash: &InfoHash) -> Result<usize, Error> {
        let mut connection = self.connection.clone();

        let count: usize = with_timeout(connection.hlen(Self::peers_key(info_hash))).await??;

        Ok(count)
    }

    async fn cleanup_expired(&self, info_hash: &InfoHash, cutoff: DurationSinceUnixEpoch) -> Result<usize, Error> {
        let mut connection = self.connection.clone();

        // Everything strictly below the cutoff has expired.
        let max_score = format!("({}", cutoff.as_secs());
        let expired: Vec<String> =
            with_timeout(connection.zrangebyscore(Self::index_key(info_hash), "-inf", max_score.as_str())).await??;

        if expired.is_empty() {
            return Ok(0);
        }

        let mut pipe = redis::pipe();
        pipe.atomic()
            .hdel(Self::peers_key(info_hash), &expired)
            .ignore()
            .zrem(Self::index_key(info_hash), &expired)
            .ignore();

        with_timeout(pipe.query_async::<()>(&mut connection)).await??;

        Ok(expired.len())
    }

    async fn get_counts(&self, info_hash: &InfoHash) -> Result<(u32, u32), Error> {
        let peers = self.get_all_peers(info_hash).await?;

        let mut seeders: u32 = 0;
        let mut leechers: u32 = 0;

        for peer in peers.values() {
            if peer.is_seeder() {
                seeders += 1;
            } else {
                leechers += 1;
            }
        }

        Ok((seeders, leechers))
    }

    async fn clear(&self, info_hash: &InfoHash) -> Result<(), Error> {
        let mut connection = self.connection.clone();

        let _: () = with_timeout(connection.del(&[Self::peers_key(info_hash), Self::index_key(info_hash)])).await??;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};
    use std::time::Duration;

    use super::{decode, encode, member, parse_member};
    use crate::core::auth::AnnounceKey;
    use crate::core::peer::{Connectability, Id, Peer};

    #[test]
    fn the_hash_member_should_round_trip_through_its_string_form() {
        let key = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(126, 0, 0, 1)), 8080);
        assert_eq!(parse_member(&member(&key)).unwrap(), key);

        let v6: SocketAddr = "[2001:db8::1]:6881".parse().unwrap();
        assert_eq!(parse_member(&member(&v6)).unwrap(), v6);
    }

    #[test]
    fn a_peer_should_round_trip_through_the_stored_form() {
        let peer = Peer {
            user_id: Some(7),
            peer_id: Id(*b"-qB00000000000000000"),
            peer_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::new(126, 0, 0, 1)), 8080),
            updated: Duration::from_secs(1_669_397_478),
            uploaded: 100,
            downloaded: 200,
            left: 0,
            announce_key: AnnounceKey::generate(),
            connectability: Connectability::Connectable,
        };

        let encoded = encode(&peer).unwrap();
        let decoded = decode(&member(&peer.peer_addr), &encoded).unwrap();

        assert_eq!(decoded, peer);
    }

    #[test]
    fn a_corrupt_stored_peer_should_be_reported_not_panicked_on() {
        assert!(decode("126.0.0.1:8080", "{not json").is_err());
        assert!(decode("not-an-addr", "{}").is_err());
    }
}
