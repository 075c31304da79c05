//! Swarm peer storage backends.
//!
//! The swarm worker does not hold its peers directly; it talks to a
//! [`PeerStorage`] scoped by `info_hash`. Two interchangeable backends exist:
//!
//! - [`memory::Memory`]: per-swarm in-process maps. The default, single-node
//!   backend.
//! - [`redis::Redis`]: a remote hash per torrent plus a sorted set of
//!   last-update timestamps, for multi-node deployments that share swarms.
//!
//! The backend is selected at startup; backends are never mixed within one
//! process.
//!
//! Within a swarm the peer identity is the `(ip, port)` socket address.
pub mod memory;
pub mod redis;

use std::collections::HashMap;
use std::net::SocketAddr;

use async_trait::async_trait;
use thiserror::Error;

use crate::core::peer::Peer;
use crate::shared::bit_torrent::info_hash::InfoHash;
use crate::shared::clock::DurationSinceUnixEpoch;

/// The unique peer identity inside one swarm.
pub type PeerKey = SocketAddr;

/// This error can be returned by the external backend. The in-memory backend
/// never fails.
#[derive(Error, Debug)]
pub enum Error {
    #[error("peer store call timed out")]
    Timeout,
    #[error("peer store error: {source}")]
    Backend {
        #[from]
        source: ::redis::RedisError,
    },
    #[error("stored peer could not be decoded: {reason}")]
    Corrupt { reason: String },
}

/// Storage contract the swarm worker relies on.
///
/// `put_peer` must update the peer data and the expiry index as one
/// observable step, and `cleanup_expired` must remove peers and their index
/// entries together, so `count_peers` equals `get_all_peers(h).len()` at any
/// instant.
#[async_trait]
pub trait PeerStorage: Sync + Send {
    /// It returns the stored peer for `(info_hash, key)`.
    async fn get_peer(&self, info_hash: &InfoHash, key: &PeerKey) -> Result<Option<Peer>, Error>;

    /// It stores or overwrites a peer.
    async fn put_peer(&self, info_hash: &InfoHash, key: PeerKey, peer: Peer) -> Result<(), Error>;

    /// It removes a peer. Removing an absent peer is a no-op.
    async fn delete_peer(&self, info_hash: &InfoHash, key: &PeerKey) -> Result<(), Error>;

    /// It returns all peers of the swarm.
    async fn get_all_peers(&self, info_hash: &InfoHash) -> Result<HashMap<PeerKey, Peer>, Error>;

    /// It returns how many peers the swarm holds.
    async fn count_peers(&self, info_hash: &InfoHash) -> Result<usize, Error>;

    /// It removes every peer with `updated < cutoff` and returns how many
    /// were removed.
    async fn cleanup_expired(&self, info_hash: &InfoHash, cutoff: DurationSinceUnixEpoch) -> Result<usize, Error>;

    /// It returns `(seeders, leechers)`.
    async fn get_counts(&self, info_hash: &InfoHash) -> Result<(u32, u32), Error>;

    /// It removes the whole swarm.
    async fn clear(&self, info_hash: &InfoHash) -> Result<(), Error>;
}
