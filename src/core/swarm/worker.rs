//! The swarm worker: the single-owner actor for one torrent.
//!
//! The worker owns the peer lifecycle of its swarm: announce processing with
//! anti-spoof keys and delta clamping, peer selection for responses, periodic
//! expiry of silent peers, and the periodic emission of its counters towards
//! the durable store (through the stats buffer).
//!
//! Three timers run alongside the message channel:
//!
//! - peer cleanup (default every 5 minutes): drop peers that have not
//!   announced within the timeout;
//! - stat sync (default every 30 seconds): emit `(seeders, leechers,
//!   completed_delta)` and refresh the torrent's charging settings;
//! - idle check (default hourly): an empty swarm syncs once more and stops.
use std::sync::Arc;

use dashmap::DashMap;
use rand::Rng;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::storage::PeerStorage;
use super::{AnnounceOutcome, Error, PeerData, SwarmCounts, SwarmHandle, SwarmPolicy};
use crate::core::auth::AnnounceKey;
use crate::core::databases::Database;
use crate::core::models::{Torrent, TorrentSettings};
use crate::core::peer::{AnnounceEvent, Peer};
use crate::core::stats::StatsBuffer;
use crate::core::verifier::Verifier;
use crate::core::TorrentId;
use crate::shared::bit_torrent::info_hash::InfoHash;
use crate::shared::clock::Time;
use crate::CurrentClock;

const CHANNEL_BUFFER_SIZE: usize = 512;

/// Messages a worker accepts.
pub enum Message {
    Announce {
        data: PeerData,
        num_want: usize,
        reply: oneshot::Sender<Result<AnnounceOutcome, Error>>,
    },
    Counts {
        reply: oneshot::Sender<SwarmCounts>,
    },
    Peers {
        reply: oneshot::Sender<(SwarmCounts, Vec<Peer>)>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// It spawns a worker task and returns its handle.
#[must_use]
#[allow(clippy::too_many_arguments)]
pub fn spawn(
    info_hash: InfoHash,
    torrent: &Torrent,
    storage: Arc<dyn PeerStorage>,
    database: Arc<dyn Database>,
    verifier: Arc<Verifier>,
    stats_buffer: Arc<StatsBuffer>,
    policy: SwarmPolicy,
    registry: Arc<DashMap<InfoHash, SwarmHandle>>,
) -> SwarmHandle {
    let (sender, receiver) = mpsc::channel(CHANNEL_BUFFER_SIZE);

    let worker = SwarmWorker {
        info_hash,
        torrent_id: torrent.id,
        settings: torrent.settings,
        completed: torrent.completed,
        completed_delta: 0,
        storage,
        database,
        verifier,
        stats_buffer,
        policy,
        registry,
    };

    tokio::spawn(worker.run(receiver));

    SwarmHandle {
        torrent_id: torrent.id,
        sender,
    }
}

struct SwarmWorker {
    info_hash: InfoHash,
    torrent_id: TorrentId,
    settings: TorrentSettings,
    /// Lifetime completion counter, mirrored from the torrent row.
    completed: u32,
    /// Completions not yet emitted to the stats buffer.
    completed_delta: u32,
    storage: Arc<dyn PeerStorage>,
    database: Arc<dyn Database>,
    verifier: Arc<Verifier>,
    stats_buffer: Arc<StatsBuffer>,
    policy: SwarmPolicy,
    registry: Arc<DashMap<InfoHash, SwarmHandle>>,
}

impl SwarmWorker {
    async fn run(mut self, mut receiver: mpsc::Receiver<Message>) {
        let mut cleanup = tokio::time::interval(self.policy.peer_cleanup_interval);
        let mut sync = tokio::time::interval(self.policy.torrent_sync_interval);
        let mut idle_check = tokio::time::interval(self.policy.idle_check_interval);

        // The first tick of a tokio interval fires immediately.
        cleanup.tick().await;
        sync.tick().await;
        idle_check.tick().await;

        loop {
            tokio::select! {
                message = receiver.recv() => match message {
                    Some(Message::Announce { data, num_want, reply }) => {
                        let _ = reply.send(self.handle_announce(data, num_want).await);
                    }
                    Some(Message::Counts { reply }) => {
                        let _ = reply.send(self.counts().await);
                    }
                    Some(Message::Peers { reply }) => {
                        let counts = self.counts().await;
                        let peers = self.all_peers().await;
                        let _ = reply.send((counts, peers));
                    }
                    Some(Message::Shutdown { reply }) => {
                        self.sync_stats().await;
                        let _ = reply.send(());
                        return;
                    }
                    None => break,
                },
                _ = cleanup.tick() => self.cleanup_peers().await,
                _ = sync.tick() => self.sync_stats().await,
                _ = idle_check.tick() => {
                    if self.is_idle().await {
                        debug!("swarm {} is idle, terminating", self.info_hash);
                        break;
                    }
                }
            }
        }

        self.sync_stats().await;
        self.registry.remove(&self.info_hash);
    }

    /// The announce algorithm. Atomic from the swarm's perspective: the actor
    /// processes one message at a time.
    async fn handle_announce(&mut self, data: PeerData, num_want: usize) -> Result<AnnounceOutcome, Error> {
        let now = CurrentClock::now();
        let key = data.addr();

        let old = self.storage.get_peer(&self.info_hash, &key).await?;

        // Anti-spoof: a known peer must echo the key it was issued.
        if let Some(old_peer) = &old {
            match &data.key {
                None => return Err(Error::KeyRequired),
                Some(echoed) if *echoed != old_peer.announce_key => return Err(Error::InvalidKey),
                Some(_) => {}
            }
        }

        // Clients occasionally reset their counters; a lower report yields a
        // zero delta, never a negative one.
        let delta_uploaded = data.uploaded.saturating_sub(old.as_ref().map_or(0, |peer| peer.uploaded));
        let delta_downloaded = data.downloaded.saturating_sub(old.as_ref().map_or(0, |peer| peer.downloaded));

        let previous_updated = old.as_ref().map(|peer| peer.updated);

        // A known peer keeps its issued key. A new peer that already carries
        // one adopts it (the UDP path derives a key from the BEP 15 `key`
        // field, which has no response field to return a server-issued one);
        // otherwise a fresh key is issued.
        let announce_key = old
            .as_ref()
            .map(|peer| peer.announce_key.clone())
            .or_else(|| data.key.clone())
            .unwrap_or_else(AnnounceKey::generate);

        if data.event == AnnounceEvent::Stopped {
            self.storage.delete_peer(&self.info_hash, &key).await?;
        } else {
            let peer = Peer {
                user_id: data.user_id,
                peer_id: data.peer_id,
                peer_addr: key,
                updated: now,
                uploaded: data.uploaded,
                downloaded: data.downloaded,
                left: data.left,
                announce_key: announce_key.clone(),
                connectability: self.verifier.check_connectable(key),
            };
            self.storage.put_peer(&self.info_hash, key, peer).await?;
        }

        if data.event == AnnounceEvent::Completed {
            self.completed += 1;
            self.completed_delta += 1;
        }

        let (seeders, leechers) = self.storage.get_counts(&self.info_hash).await?;

        let peers = self.select_peers(&data, num_want).await?;

        Ok(AnnounceOutcome {
            torrent_id: self.torrent_id,
            seeders,
            leechers,
            peers,
            delta_uploaded,
            delta_downloaded,
            announce_key,
            previous_updated,
            settings: self.settings,
        })
    }

    /// Peer selection: requester excluded, ordered by
    /// `(connectable_score, seeder_score, random)` ascending, capped at
    /// `min(num_want, MAX_PEERS_RETURNED)`.
    async fn select_peers(&self, requester: &PeerData, num_want: usize) -> Result<Vec<Peer>, Error> {
        let mut all = self.storage.get_all_peers(&self.info_hash).await?;
        all.remove(&requester.addr());

        let requester_is_leecher = !requester.is_seeder();
        let mut rng = rand::thread_rng();

        let mut candidates: Vec<(u8, u8, u32, Peer)> = all
            .into_values()
            .map(|peer| {
                let seeder_score = if requester_is_leecher && peer.is_seeder() {
                    0
                } else {
                    u8::from(self.policy.prefer_seeders)
                };
                (peer.connectability.score(), seeder_score, rng.gen::<u32>(), peer)
            })
            .collect();

        candidates.sort_by_key(|(connectable, seeder, random, _)| (*connectable, *seeder, *random));

        let limit = num_want.min(super::MAX_PEERS_RETURNED);

        Ok(candidates.into_iter().take(limit).map(|(_, _, _, peer)| peer).collect())
    }

    async fn counts(&self) -> SwarmCounts {
        match self.storage.get_counts(&self.info_hash).await {
            Ok((seeders, leechers)) => SwarmCounts {
                seeders,
                leechers,
                completed: self.completed,
            },
            Err(err) => {
                warn!("swarm {}: failed to count peers: {err}", self.info_hash);
                SwarmCounts {
                    seeders: 0,
                    leechers: 0,
                    completed: self.completed,
                }
            }
        }
    }

    async fn all_peers(&self) -> Vec<Peer> {
        match self.storage.get_all_peers(&self.info_hash).await {
            Ok(peers) => peers.into_values().collect(),
            Err(err) => {
                warn!("swarm {}: failed to list peers: {err}", self.info_hash);
                Vec::new()
            }
        }
    }

    /// A peer is active iff it announced within the timeout; everything older
    /// is dropped.
    async fn cleanup_peers(&self) {
        let cutoff = CurrentClock::now().saturating_sub(self.policy.max_peer_timeout);

        match self.storage.cleanup_expired(&self.info_hash, cutoff).await {
            Ok(0) => {}
            Ok(removed) => debug!("swarm {}: removed {removed} inactive peers", self.info_hash),
            Err(err) => warn!("swarm {}: peer cleanup failed: {err}", self.info_hash),
        }
    }

    /// It emits the swarm counters to the stats buffer and picks up any admin
    /// change to the torrent's charging settings.
    async fn sync_stats(&mut self) {
        match self.storage.get_counts(&self.info_hash).await {
            Ok((seeders, leechers)) => {
                self.stats_buffer
                    .record_torrent_sync(self.torrent_id, seeders, leechers, self.completed_delta);
                self.completed_delta = 0;
            }
            Err(err) => {
                warn!("swarm {}: stat sync failed: {err}", self.info_hash);
            }
        }

        match self.database.get_torrent_by_info_hash(&self.info_hash) {
            Ok(Some(torrent)) => self.settings = torrent.settings,
            Ok(None) => {}
            Err(err) => warn!("swarm {}: settings refresh failed: {err}", self.info_hash),
        }
    }

    async fn is_idle(&self) -> bool {
        matches!(self.storage.count_peers(&self.info_hash).await, Ok(0))
    }
}

#[cfg(test)]
mod tests {
    use std::net::IpAddr;
    use std::sync::Arc;

    use dashmap::DashMap;

    use crate::config;
    use crate::core::auth::AnnounceKey;
    use crate::core::databases::sqlite::Sqlite;
    use crate::core::databases::Database;
    use crate::core::peer::{AnnounceEvent, Id};
    use crate::core::stats::StatsBuffer;
    use crate::core::swarm::storage::memory::Memory;
    use crate::core::swarm::worker::spawn;
    use crate::core::swarm::{Error, PeerData, SwarmHandle, SwarmPolicy};
    use crate::core::verifier::Verifier;
    use crate::shared::bit_torrent::info_hash::InfoHash;

    fn info_hash() -> InfoHash {
        "3b245504cf5f11bbdbe1201cea6a6bf45aee1bc0".parse().unwrap()
    }

    fn peer_data(port: u16, left: u64, event: AnnounceEvent, key: Option<AnnounceKey>) -> PeerData {
        let mut peer_id = *b"-qB00000000000000000";
        peer_id[18] = u8::try_from(port >> 8).unwrap();
        peer_id[19] = u8::try_from(port & 0xff).unwrap();

        PeerData {
            user_id: Some(1),
            ip: IpAddr::V4([127, 0, 0, 1].into()),
            port,
            peer_id: Id(peer_id),
            uploaded: 0,
            downloaded: 0,
            left,
            event,
            key,
        }
    }

    struct Harness {
        handle: SwarmHandle,
    }

    impl Harness {
        fn new() -> Self {
            let database: Arc<dyn Database> = {
                let database = Sqlite::new_in_memory();
                database.create_database_tables().unwrap();
                Arc::new(database)
            };
            let torrent = database.get_or_insert_torrent(&info_hash()).unwrap();

            let handle = spawn(
                info_hash(),
                &torrent,
                Arc::new(Memory::new()),
                database,
                Verifier::disabled(),
                Arc::new(StatsBuffer::new()),
                SwarmPolicy::from(&config::Core::default()),
                Arc::new(DashMap::new()),
            );

            Self { handle }
        }

        async fn announce(&self, data: PeerData, num_want: usize) -> Result<crate::core::swarm::AnnounceOutcome, Error> {
            let (reply, response) = tokio::sync::oneshot::channel();
            self.handle
                .sender
                .send(super::Message::Announce { data, num_want, reply })
                .await
                .unwrap();
            response.await.unwrap()
        }
    }

    #[tokio::test]
    async fn a_first_announce_should_register_the_peer_and_issue_a_key() {
        let harness = Harness::new();

        let outcome = harness.announce(peer_data(6881, 100, AnnounceEvent::Started, None), 50).await.unwrap();

        assert_eq!((outcome.seeders, outcome.leechers), (0, 1));
        assert!(outcome.peers.is_empty());
        assert_eq!(outcome.previous_updated, None);
    }

    #[tokio::test]
    async fn a_returning_peer_without_its_key_should_be_rejected() {
        let harness = Harness::new();

        harness.announce(peer_data(6881, 100, AnnounceEvent::Started, None), 50).await.unwrap();

        let result = harness.announce(peer_data(6881, 100, AnnounceEvent::None, None), 50).await;
        assert!(matches!(result, Err(Error::KeyRequired)));
    }

    #[tokio::test]
    async fn a_returning_peer_with_the_wrong_key_should_be_rejected() {
        let harness = Harness::new();

        harness.announce(peer_data(6881, 100, AnnounceEvent::Started, None), 50).await.unwrap();

        let wrong = AnnounceKey::generate();
        let result = harness.announce(peer_data(6881, 100, AnnounceEvent::None, Some(wrong)), 50).await;
        assert!(matches!(result, Err(Error::InvalidKey)));
    }

    #[tokio::test]
    async fn a_returning_peer_with_its_key_should_be_accepted_and_keep_the_key() {
        let harness = Harness::new();

        let first = harness.announce(peer_data(6881, 100, AnnounceEvent::Started, None), 50).await.unwrap();
        let key = first.announce_key.clone();

        let second = harness
            .announce(peer_data(6881, 100, AnnounceEvent::None, Some(key.clone())), 50)
            .await
            .unwrap();

        assert_eq!(second.announce_key, key);
        assert_eq!((second.seeders, second.leechers), (0, 1));
        assert!(second.previous_updated.is_some());
    }

    #[tokio::test]
    async fn transfer_deltas_should_clamp_to_zero_on_client_resets() {
        let harness = Harness::new();

        let mut start = peer_data(6881, 100, AnnounceEvent::Started, None);
        start.uploaded = 1000;
        start.downloaded = 500;
        let first = harness.announce(start, 50).await.unwrap();
        assert_eq!((first.delta_uploaded, first.delta_downloaded), (1000, 500));

        // The client restarted and reports smaller totals.
        let mut reset = peer_data(6881, 100, AnnounceEvent::None, Some(first.announce_key.clone()));
        reset.uploaded = 300;
        reset.downloaded = 700;
        let second = harness.announce(reset, 50).await.unwrap();

        assert_eq!((second.delta_uploaded, second.delta_downloaded), (0, 200));
    }

    #[tokio::test]
    async fn a_stopped_event_should_remove_the_peer() {
        let harness = Harness::new();

        let first = harness.announce(peer_data(6881, 0, AnnounceEvent::Started, None), 50).await.unwrap();
        assert_eq!((first.seeders, first.leechers), (1, 0));

        let stop = harness
            .announce(peer_data(6881, 0, AnnounceEvent::Stopped, Some(first.announce_key.clone())), 50)
            .await
            .unwrap();

        assert_eq!((stop.seeders, stop.leechers), (0, 0));
    }

    #[tokio::test]
    async fn the_response_should_exclude_the_requester_and_cap_num_want() {
        let harness = Harness::new();

        for port in 0..60u16 {
            harness
                .announce(peer_data(7000 + port, 100, AnnounceEvent::Started, None), 50)
                .await
                .unwrap();
        }

        let outcome = harness.announce(peer_data(7000, 100, AnnounceEvent::None, None), 200).await;
        // The peer at 7000 is known: it must echo its key. Re-announce with it.
        assert!(outcome.is_err());

        let newcomer = harness.announce(peer_data(8000, 100, AnnounceEvent::Started, None), 200).await.unwrap();

        assert_eq!(newcomer.peers.len(), 50);
        assert!(newcomer.peers.iter().all(|peer| peer.port() != 8000));

        let few = harness
            .announce(peer_data(8000, 100, AnnounceEvent::None, Some(newcomer.announce_key.clone())), 5)
            .await
            .unwrap();
        assert_eq!(few.peers.len(), 5);
    }

    #[tokio::test]
    async fn leechers_should_receive_seeders_first() {
        let harness = Harness::new();

        for port in 0..5u16 {
            harness.announce(peer_data(9000 + port, 0, AnnounceEvent::Started, None), 50).await.unwrap();
        }
        for port in 0..5u16 {
            harness
                .announce(peer_data(9100 + port, 1000, AnnounceEvent::Started, None), 50)
                .await
                .unwrap();
        }

        let outcome = harness.announce(peer_data(9500, 1000, AnnounceEvent::Started, None), 5).await.unwrap();

        let seeders_returned = outcome.peers.iter().filter(|peer| peer.is_seeder()).count();
        assert!(seeders_returned >= 3, "expected mostly seeders, got {seeders_returned}/5");
    }

    #[tokio::test]
    async fn a_completed_event_should_increment_the_completed_counter() {
        let harness = Harness::new();

        let first = harness.announce(peer_data(6881, 100, AnnounceEvent::Started, None), 50).await.unwrap();
        harness
            .announce(peer_data(6881, 0, AnnounceEvent::Completed, Some(first.announce_key.clone())), 50)
            .await
            .unwrap();

        let (reply, response) = tokio::sync::oneshot::channel();
        harness.handle.sender.send(super::Message::Counts { reply }).await.unwrap();
        let counts = response.await.unwrap();

        assert_eq!(counts.completed, 1);
        assert_eq!(counts.seeders, 1);
    }
}
