//! The stats buffer: lock-free accumulation of per-user and per-torrent
//! deltas between collector flushes.
//!
//! Writers are announce handlers and swarm workers; they only touch sharded
//! map entries and atomic cells, so recording never suspends and never blocks
//! another writer. The drain is mutex-serialized: the collector removes each
//! entry and reads its counters, leaving a fresh cell for concurrent writers.
//!
//! Three kinds of records:
//!
//! - **User transfer deltas** (additive): already multiplied by the torrent's
//!   upload/download multipliers. Anonymous announces are dropped before they
//!   get here.
//! - **Torrent snapshots** (last write wins) plus an additive `completed`
//!   delta, set by the swarm workers' periodic sync.
//! - **Snatch records** (additive seedtime, max last-announce, first
//!   completion timestamp), feeding hit-and-run accounting.
//!
//! The buffer is volatile: a crash loses at most one flush interval of
//! deltas. The tracker prefers availability over exact durability here.
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;

use dashmap::DashMap;

use crate::core::{TorrentId, UserId};
use crate::shared::clock::DurationSinceUnixEpoch;

#[derive(Default)]
struct UserCell {
    uploaded: AtomicU64,
    downloaded: AtomicU64,
}

#[derive(Default)]
struct TorrentCell {
    seeders: AtomicU32,
    leechers: AtomicU32,
    completed_delta: AtomicU32,
}

#[derive(Default)]
struct SnatchCell {
    /// Seconds-since-epoch of the completion event, `0` when the pair did not
    /// complete within this window.
    completed_at: AtomicU64,
    seedtime: AtomicU64,
    last_announce_at: AtomicU64,
}

/// One drained user entry: `(user_id, uploaded, downloaded)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserDelta {
    pub user_id: UserId,
    pub uploaded: u64,
    pub downloaded: u64,
}

/// One drained torrent entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TorrentDelta {
    pub torrent_id: TorrentId,
    pub seeders: u32,
    pub leechers: u32,
    pub completed_delta: u32,
}

/// One drained snatch entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnatchDelta {
    pub user_id: UserId,
    pub torrent_id: TorrentId,
    /// Set when the user reported `completed` within this window.
    pub completed_at: Option<DurationSinceUnixEpoch>,
    pub seedtime: u64,
    pub last_announce_at: DurationSinceUnixEpoch,
}

/// Everything one drain produced.
#[derive(Debug, Default)]
pub struct Drained {
    pub users: Vec<UserDelta>,
    pub torrents: Vec<TorrentDelta>,
    pub snatches: Vec<SnatchDelta>,
}

impl Drained {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.users.is_empty() && self.torrents.is_empty() && self.snatches.is_empty()
    }
}

/// The buffer itself. See the [module documentation](crate::core::stats).
#[derive(Default)]
pub struct StatsBuffer {
    users: DashMap<UserId, UserCell>,
    torrents: DashMap<TorrentId, TorrentCell>,
    snatches: DashMap<(UserId, TorrentId), SnatchCell>,
    drain_guard: Mutex<()>,
}

impl StatsBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// It adds an already-multiplied transfer delta for a user.
    pub fn record_user_transfer(&self, user_id: UserId, uploaded: u64, downloaded: u64) {
        if uploaded == 0 && downloaded == 0 {
            return;
        }

        let cell = self.users.entry(user_id).or_default();
        cell.uploaded.fetch_add(uploaded, Ordering::Relaxed);
        cell.downloaded.fetch_add(downloaded, Ordering::Relaxed);
    }

    /// It overwrites a torrent's swarm snapshot and adds to its completed
    /// delta.
    pub fn record_torrent_sync(&self, torrent_id: TorrentId, seeders: u32, leechers: u32, completed_delta: u32) {
        let cell = self.torrents.entry(torrent_id).or_default();
        cell.seeders.store(seeders, Ordering::Relaxed);
        cell.leechers.store(leechers, Ordering::Relaxed);
        cell.completed_delta.fetch_add(completed_delta, Ordering::Relaxed);
    }

    /// It records a completion event for a `(user, torrent)` pair. The first
    /// completion in a window wins; the durable upsert keeps the original
    /// `completed_at` for pairs that completed in an earlier window.
    pub fn record_snatch_completed(&self, user_id: UserId, torrent_id: TorrentId, now: DurationSinceUnixEpoch) {
        let cell = self.snatches.entry((user_id, torrent_id)).or_default();
        let _ = cell
            .completed_at
            .compare_exchange(0, now.as_secs().max(1), Ordering::Relaxed, Ordering::Relaxed);
        cell.last_announce_at.fetch_max(now.as_secs(), Ordering::Relaxed);
    }

    /// It adds seeding time for a `(user, torrent)` pair. The caller has
    /// already clamped the per-announce delta.
    pub fn record_seedtime(&self, user_id: UserId, torrent_id: TorrentId, seedtime: u64, now: DurationSinceUnixEpoch) {
        let cell = self.snatches.entry((user_id, torrent_id)).or_default();
        cell.seedtime.fetch_add(seedtime, Ordering::Relaxed);
        cell.last_announce_at.fetch_max(now.as_secs(), Ordering::Relaxed);
    }

    /// It atomically drains the buffer: every removed entry's counters are
    /// handed to the caller exactly once; writers racing with the drain land
    /// in fresh cells that survive for the next drain.
    #[must_use]
    pub fn drain(&self) -> Drained {
        let _guard = self.drain_guard.lock().expect("drain guard poisoned");

        let mut drained = Drained::default();

        let user_ids: Vec<UserId> = self.users.iter().map(|entry| *entry.key()).collect();
        for user_id in user_ids {
            if let Some((_, cell)) = self.users.remove(&user_id) {
                drained.users.push(UserDelta {
                    user_id,
                    uploaded: cell.uploaded.load(Ordering::Relaxed),
                    downloaded: cell.downloaded.load(Ordering::Relaxed),
                });
            }
        }

        let torrent_ids: Vec<TorrentId> = self.torrents.iter().map(|entry| *entry.key()).collect();
        for torrent_id in torrent_ids {
            if let Some((_, cell)) = self.torrents.remove(&torrent_id) {
                drained.torrents.push(TorrentDelta {
                    torrent_id,
                    seeders: cell.seeders.load(Ordering::Relaxed),
                    leechers: cell.leechers.load(Ordering::Relaxed),
                    completed_delta: cell.completed_delta.load(Ordering::Relaxed),
                });
            }
        }

        let snatch_keys: Vec<(UserId, TorrentId)> = self.snatches.iter().map(|entry| *entry.key()).collect();
        for (user_id, torrent_id) in snatch_keys {
            if let Some((_, cell)) = self.snatches.remove(&(user_id, torrent_id)) {
                let completed_secs = cell.completed_at.load(Ordering::Relaxed);
                drained.snatches.push(SnatchDelta {
                    user_id,
                    torrent_id,
                    completed_at: (completed_secs > 0).then(|| DurationSinceUnixEpoch::from_secs(completed_secs)),
                    seedtime: cell.seedtime.load(Ordering::Relaxed),
                    last_announce_at: DurationSinceUnixEpoch::from_secs(cell.last_announce_at.load(Ordering::Relaxed)),
                });
            }
        }

        drained
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::StatsBuffer;

    #[test]
    fn user_transfer_deltas_should_accumulate_until_drained() {
        let buffer = StatsBuffer::new();

        buffer.record_user_transfer(1, 100, 10);
        buffer.record_user_transfer(1, 50, 5);
        buffer.record_user_transfer(2, 7, 0);

        let mut drained = buffer.drain();
        drained.users.sort_by_key(|delta| delta.user_id);

        assert_eq!(drained.users.len(), 2);
        assert_eq!((drained.users[0].uploaded, drained.users[0].downloaded), (150, 15));
        assert_eq!((drained.users[1].uploaded, drained.users[1].downloaded), (7, 0));

        assert!(buffer.drain().is_empty());
    }

    #[test]
    fn zero_deltas_should_not_create_entries() {
        let buffer = StatsBuffer::new();

        buffer.record_user_transfer(1, 0, 0);

        assert!(buffer.drain().is_empty());
    }

    #[test]
    fn torrent_snapshots_should_overwrite_but_completed_deltas_should_add() {
        let buffer = StatsBuffer::new();

        buffer.record_torrent_sync(9, 5, 3, 1);
        buffer.record_torrent_sync(9, 6, 2, 1);

        let drained = buffer.drain();

        assert_eq!(drained.torrents.len(), 1);
        let torrent = &drained.torrents[0];
        assert_eq!((torrent.seeders, torrent.leechers), (6, 2));
        assert_eq!(torrent.completed_delta, 2);
    }

    #[test]
    fn the_first_completion_in_a_window_should_win() {
        let buffer = StatsBuffer::new();

        buffer.record_snatch_completed(1, 9, Duration::from_secs(100));
        buffer.record_snatch_completed(1, 9, Duration::from_secs(200));

        let drained = buffer.drain();

        assert_eq!(drained.snatches.len(), 1);
        assert_eq!(drained.snatches[0].completed_at, Some(Duration::from_secs(100)));
        assert_eq!(drained.snatches[0].last_announce_at, Duration::from_secs(200));
    }

    #[test]
    fn seedtime_should_accumulate_and_track_the_latest_announce() {
        let buffer = StatsBuffer::new();

        buffer.record_seedtime(1, 9, 60, Duration::from_secs(100));
        buffer.record_seedtime(1, 9, 30, Duration::from_secs(160));

        let drained = buffer.drain();

        assert_eq!(drained.snatches.len(), 1);
        assert_eq!(drained.snatches[0].seedtime, 90);
        assert_eq!(drained.snatches[0].completed_at, None);
        assert_eq!(drained.snatches[0].last_announce_at, Duration::from_secs(160));
    }

    #[test]
    fn concurrent_writers_should_not_lose_increments() {
        let buffer = std::sync::Arc::new(StatsBuffer::new());
        let mut handles = Vec::new();

        for _ in 0..8 {
            let buffer = buffer.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..1000 {
                    buffer.record_user_transfer(1, 1, 1);
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        let drained = buffer.drain();
        assert_eq!(drained.users[0].uploaded, 8000);
        assert_eq!(drained.users[0].downloaded, 8000);
    }
}
