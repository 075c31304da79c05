//! The swarm engine: one worker per active torrent plus the registry that
//! spawns and finds them.
//!
//! A swarm worker is a single-owner actor. Announces for the same `info_hash`
//! serialize on its message channel; announces for different torrents run in
//! parallel. The registry maps `info_hash` to the worker handle, spawning
//! workers on demand and respawning them transparently when an idle worker
//! shut itself down while a request raced in.
pub mod storage;
pub mod worker;

use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use self::storage::PeerStorage;
use self::worker::Message;
use crate::core::auth::AnnounceKey;
use crate::core::databases::Database;
use crate::core::models::TorrentSettings;
use crate::core::peer::{AnnounceEvent, Id, Peer};
use crate::core::stats::StatsBuffer;
use crate::core::verifier::Verifier;
use crate::core::{TorrentId, UserId};
use crate::shared::bit_torrent::info_hash::InfoHash;
use crate::shared::clock::DurationSinceUnixEpoch;

/// The hard cap on peers returned per announce, whatever `num_want` asks for.
pub const MAX_PEERS_RETURNED: usize = 50;

/// What an announcing peer reported, already authenticated and decoded.
#[derive(Debug, Clone)]
pub struct PeerData {
    /// The announcing user. UDP announces are anonymous.
    pub user_id: Option<UserId>,
    pub ip: std::net::IpAddr,
    pub port: u16,
    pub peer_id: Id,
    pub uploaded: u64,
    pub downloaded: u64,
    pub left: u64,
    pub event: AnnounceEvent,
    /// The anti-spoof key echoed by a returning peer.
    pub key: Option<AnnounceKey>,
}

impl PeerData {
    #[must_use]
    pub fn addr(&self) -> std::net::SocketAddr {
        std::net::SocketAddr::new(self.ip, self.port)
    }

    #[must_use]
    pub fn is_seeder(&self) -> bool {
        self.left == 0
    }
}

/// What the worker hands back for a processed announce.
#[derive(Debug, Clone)]
pub struct AnnounceOutcome {
    pub torrent_id: TorrentId,
    pub seeders: u32,
    pub leechers: u32,
    /// Selected peers, requester excluded.
    pub peers: Vec<Peer>,
    /// Raw transfer deltas, clamped non-negative, multipliers not applied.
    pub delta_uploaded: u64,
    pub delta_downloaded: u64,
    /// The key the peer must echo on its next announce.
    pub announce_key: AnnounceKey,
    /// When this peer announced previously, if it was known. Used for
    /// seedtime accounting.
    pub previous_updated: Option<DurationSinceUnixEpoch>,
    /// Snapshot of the torrent's charging settings.
    pub settings: TorrentSettings,
}

/// Swarm counters served to scrapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SwarmCounts {
    pub seeders: u32,
    pub leechers: u32,
    pub completed: u32,
}

/// Why the swarm layer rejected or failed an announce.
#[derive(Debug, Error)]
pub enum Error {
    /// A returning peer did not echo its announce key.
    #[error("announce key required")]
    KeyRequired,
    /// A returning peer echoed the wrong announce key.
    #[error("invalid announce key")]
    InvalidKey,
    /// Torrent-whitelist mode is on and the torrent is not registered.
    #[error("torrent not registered")]
    TorrentNotRegistered,
    /// The peer store failed or timed out.
    #[error("peer store failure: {source}")]
    PeerStore {
        #[from]
        source: storage::Error,
    },
    /// The durable store failed while registering the torrent.
    #[error("database failure: {source}")]
    Database {
        #[from]
        source: crate::core::databases::error::Error,
    },
    /// The worker died between lookup and dispatch more than once.
    #[error("swarm worker unavailable")]
    WorkerUnavailable,
}

/// A cheap handle to a running swarm worker.
#[derive(Clone)]
pub struct SwarmHandle {
    pub torrent_id: TorrentId,
    sender: mpsc::Sender<Message>,
}

/// Timings and policies every worker copies at spawn.
#[derive(Debug, Clone, Copy)]
pub struct SwarmPolicy {
    pub max_peer_timeout: std::time::Duration,
    pub peer_cleanup_interval: std::time::Duration,
    pub idle_check_interval: std::time::Duration,
    pub torrent_sync_interval: std::time::Duration,
    pub prefer_seeders: bool,
}

impl From<&crate::config::Core> for SwarmPolicy {
    fn from(config: &crate::config::Core) -> Self {
        Self {
            max_peer_timeout: std::time::Duration::from_secs(config.max_peer_timeout),
            peer_cleanup_interval: std::time::Duration::from_secs(config.peer_cleanup_interval),
            idle_check_interval: std::time::Duration::from_secs(config.idle_check_interval),
            torrent_sync_interval: std::time::Duration::from_secs(config.torrent_sync_interval),
            prefer_seeders: config.prefer_seeders,
        }
    }
}

/// The registry. See the [module documentation](crate::core::swarm).
pub struct SwarmRegistry {
    swarms: Arc<DashMap<InfoHash, SwarmHandle>>,
    storage: Arc<dyn PeerStorage>,
    database: Arc<dyn Database>,
    verifier: Arc<Verifier>,
    stats_buffer: Arc<StatsBuffer>,
    policy: SwarmPolicy,
    enforce_torrent_whitelist: bool,
}

impl SwarmRegistry {
    #[must_use]
    pub fn new(
        storage: Arc<dyn PeerStorage>,
        database: Arc<dyn Database>,
        verifier: Arc<Verifier>,
        stats_buffer: Arc<StatsBuffer>,
        policy: SwarmPolicy,
        enforce_torrent_whitelist: bool,
    ) -> Self {
        Self {
            swarms: Arc::new(DashMap::new()),
            storage,
            database,
            verifier,
            stats_buffer,
            policy,
            enforce_torrent_whitelist,
        }
    }

    /// It dispatches an announce to the torrent's worker, spawning one when
    /// needed.
    ///
    /// # Errors
    ///
    /// Will return an [`enum@Error`] for anti-spoof rejections, unregistered
    /// torrents in whitelist mode, and transient store failures.
    pub async fn announce(&self, info_hash: &InfoHash, data: PeerData, num_want: usize) -> Result<AnnounceOutcome, Error> {
        // One respawn covers the race with an idle worker shutting down.
        for _ in 0..2 {
            let handle = self.get_or_spawn(info_hash).await?;

            let (reply, response) = oneshot::channel();
            let message = Message::Announce {
                data: data.clone(),
                num_want,
                reply,
            };

            if handle.sender.send(message).await.is_err() {
                self.swarms.remove(info_hash);
                continue;
            }

            match response.await {
                Ok(result) => return result,
                Err(_) => {
                    self.swarms.remove(info_hash);
                }
            }
        }

        Err(Error::WorkerUnavailable)
    }

    /// It returns the swarm counters for a scrape. Torrents without a running
    /// worker are answered from the durable row; unknown torrents get zeroes.
    ///
    /// # Errors
    ///
    /// Will return an [`enum@Error`] if the durable store fails.
    pub async fn scrape(&self, info_hash: &InfoHash) -> Result<SwarmCounts, Error> {
        if let Some(handle) = self.swarms.get(info_hash).map(|entry| entry.value().clone()) {
            let (reply, response) = oneshot::channel();
            if handle.sender.send(Message::Counts { reply }).await.is_ok() {
                if let Ok(counts) = response.await {
                    return Ok(counts);
                }
            }
            // Worker went away mid-scrape: fall through to the durable row.
        }

        let counts = self
            .database
            .get_torrent_by_info_hash(info_hash)?
            .map(|torrent| SwarmCounts {
                seeders: torrent.seeders,
                leechers: torrent.leechers,
                completed: torrent.completed,
            })
            .unwrap_or_default();

        Ok(counts)
    }

    /// It returns the peers and counters of every running swarm. Used by the
    /// bonus calculator.
    pub async fn snapshot_active_swarms(&self) -> Vec<(InfoHash, SwarmCounts, Vec<Peer>)> {
        let handles: Vec<(InfoHash, SwarmHandle)> = self
            .swarms
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        let mut snapshots = Vec::with_capacity(handles.len());

        for (info_hash, handle) in handles {
            let (reply, response) = oneshot::channel();
            if handle.sender.send(Message::Peers { reply }).await.is_ok() {
                if let Ok((counts, peers)) = response.await {
                    snapshots.push((info_hash, counts, peers));
                }
            }
        }

        snapshots
    }

    /// It asks every worker to run a final sync and stop. Called on graceful
    /// shutdown.
    pub async fn shutdown(&self) {
        let handles: Vec<SwarmHandle> = self.swarms.iter().map(|entry| entry.value().clone()).collect();

        for handle in handles {
            let (reply, response) = oneshot::channel();
            if handle.sender.send(Message::Shutdown { reply }).await.is_ok() {
                let _ = response.await;
            }
        }

        self.swarms.clear();
    }

    #[must_use]
    pub fn active_swarm_count(&self) -> usize {
        self.swarms.len()
    }

    async fn get_or_spawn(&self, info_hash: &InfoHash) -> Result<SwarmHandle, Error> {
        if let Some(handle) = self.swarms.get(info_hash) {
            return Ok(handle.value().clone());
        }

        // In whitelist mode unknown torrents are rejected; otherwise they are
        // registered on first announce.
        let torrent = if self.enforce_torrent_whitelist {
            self.database
                .get_torrent_by_info_hash(info_hash)?
                .ok_or(Error::TorrentNotRegistered)?
        } else {
            self.database.get_or_insert_torrent(info_hash)?
        };

        // Two callers may race to spawn: the entry API keeps the winner and
        // the loser's worker exits on its idle check once its channel closes.
        let handle = self
            .swarms
            .entry(*info_hash)
            .or_insert_with(|| {
                debug!("spawning swarm worker for {info_hash}");
                worker::spawn(
                    *info_hash,
                    &torrent,
                    self.storage.clone(),
                    self.database.clone(),
                    self.verifier.clone(),
                    self.stats_buffer.clone(),
                    self.policy,
                    self.swarms.clone(),
                )
            })
            .value()
            .clone();

        Ok(handle)
    }
}
