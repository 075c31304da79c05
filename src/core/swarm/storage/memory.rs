//! The in-process peer storage backend.
//!
//! One sharded map entry per swarm. Because every swarm worker serializes its
//! own announces, per-entry mutation needs no further coordination than the
//! shard lock `DashMap` already takes.
use std::collections::HashMap;

use async_trait::async_trait;
use dashmap::DashMap;

use super::{Error, PeerKey, PeerStorage};
use crate::core::peer::Peer;
use crate::shared::bit_torrent::info_hash::InfoHash;
use crate::shared::clock::DurationSinceUnixEpoch;

#[derive(Default)]
pub struct Memory {
    swarms: DashMap<InfoHash, HashMap<PeerKey, Peer>>,
}

impl Memory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PeerStorage for Memory {
    async fn get_peer(&self, info_hash: &InfoHash, key: &PeerKey) -> Result<Option<Peer>, Error> {
        Ok(self.swarms.get(info_hash).and_then(|swarm| swarm.get(key).cloned()))
    }

    async fn put_peer(&self, info_hash: &InfoHash, key: PeerKey, peer: Peer) -> Result<(), Error> {
        self.swarms.entry(*info_hash).or_default().insert(key, peer);
        Ok(())
    }

    async fn delete_peer(&self, info_hash: &InfoHash, key: &PeerKey) -> Result<(), Error> {
        if let Some(mut swarm) = self.swarms.get_mut(info_hash) {
            swarm.remove(key);
        }
        Ok(())
    }

    async fn get_all_peers(&self, info_hash: &InfoHash) -> Result<HashMap<PeerKey, Peer>, Error> {
        Ok(self.swarms.get(info_hash).map(|swarm| swarm.clone()).unwrap_or_default())
    }

    async fn count_peers(&self, info_hash: &InfoHash) -> Result<usize, Error> {
        Ok(self.swarms.get(info_hash).map_or(0, |swarm| swarm.len()))
    }

    async fn cleanup_expired(&self, info_hash: &InfoHash, cutoff: DurationSinceUnixEpoch) -> Result<usize, Error> {
        let Some(mut swarm) = self.swarms.get_mut(info_hash) else {
            return Ok(0);
        };

        let before = swarm.len();
        swarm.retain(|_, peer| peer.updated >= cutoff);

        Ok(before - swarm.len())
    }

    async fn get_counts(&self, info_hash: &InfoHash) -> Result<(u32, u32), Error> {
        let Some(swarm) = self.swarms.get(info_hash) else {
            return Ok((0, 0));
        };

        let mut seeders: u32 = 0;
        let mut leechers: u32 = 0;

        for peer in swarm.values() {
            if peer.is_seeder() {
                seeders += 1;
            } else {
                leechers += 1;
            }
        }

        Ok((seeders, leechers))
    }

    async fn clear(&self, info_hash: &InfoHash) -> Result<(), Error> {
        self.swarms.remove(info_hash);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};
    use std::time::Duration;

    use super::Memory;
    use crate::core::auth::AnnounceKey;
    use crate::core::peer::{Connectability, Id, Peer};
    use crate::core::swarm::storage::PeerStorage;
    use crate::shared::bit_torrent::info_hash::InfoHash;

    fn info_hash() -> InfoHash {
        "3b245504cf5f11bbdbe1201cea6a6bf45aee1bc0".parse().unwrap()
    }

    fn peer(port: u16, left: u64, updated_secs: u64) -> Peer {
        Peer {
            user_id: Some(1),
            peer_id: Id(*b"-qB00000000000000000"),
            peer_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), port),
            updated: Duration::from_secs(updated_secs),
            uploaded: 0,
            downloaded: 0,
            left,
            announce_key: AnnounceKey::generate(),
            connectability: Connectability::Unknown,
        }
    }

    #[tokio::test]
    async fn it_should_store_and_retrieve_a_peer_by_its_socket_address() {
        let storage = Memory::new();
        let inserted = peer(6881, 0, 100);

        storage.put_peer(&info_hash(), inserted.peer_addr, inserted.clone()).await.unwrap();

        let retrieved = storage.get_peer(&info_hash(), &inserted.peer_addr).await.unwrap();
        assert_eq!(retrieved, Some(inserted));
    }

    #[tokio::test]
    async fn an_overwrite_should_replace_the_stored_peer() {
        let storage = Memory::new();
        let first = peer(6881, 100, 100);
        let second = peer(6881, 0, 200);

        storage.put_peer(&info_hash(), first.peer_addr, first).await.unwrap();
        storage.put_peer(&info_hash(), second.peer_addr, second.clone()).await.unwrap();

        assert_eq!(storage.count_peers(&info_hash()).await.unwrap(), 1);
        assert_eq!(storage.get_peer(&info_hash(), &second.peer_addr).await.unwrap(), Some(second));
    }

    #[tokio::test]
    async fn counts_should_split_seeders_and_leechers() {
        let storage = Memory::new();

        for (port, left) in [(6881, 0), (6882, 0), (6883, 512)] {
            let peer = peer(port, left, 100);
            storage.put_peer(&info_hash(), peer.peer_addr, peer).await.unwrap();
        }

        assert_eq!(storage.get_counts(&info_hash()).await.unwrap(), (2, 1));
    }

    #[tokio::test]
    async fn cleanup_should_remove_only_peers_older_than_the_cutoff() {
        let storage = Memory::new();

        let stale = peer(6881, 0, 100);
        let fresh = peer(6882, 0, 900);
        storage.put_peer(&info_hash(), stale.peer_addr, stale).await.unwrap();
        storage.put_peer(&info_hash(), fresh.peer_addr, fresh.clone()).await.unwrap();

        let removed = storage.cleanup_expired(&info_hash(), Duration::from_secs(500)).await.unwrap();

        assert_eq!(removed, 1);
        let remaining = storage.get_all_peers(&info_hash()).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert!(remaining.contains_key(&fresh.peer_addr));
    }

    #[tokio::test]
    async fn clear_should_remove_the_whole_swarm() {
        let storage = Memory::new();
        let peer = peer(6881, 0, 100);

        storage.put_peer(&info_hash(), peer.peer_addr, peer).await.unwrap();
        storage.clear(&info_hash()).await.unwrap();

        assert_eq!(storage.count_peers(&info_hash()).await.unwrap(), 0);
    }
}
