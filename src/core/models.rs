//! The persistent entities the tracker works with.
//!
//! All of them live in the durable store. Users, whitelist entries and bans
//! are mirrored into the gate cache at startup; torrents are materialized into
//! swarm workers on demand; snatches are written by the stats collector and
//! read by the hit-and-run detector.
use crate::core::auth::Passkey;
use crate::core::{TorrentId, UserId};
use crate::shared::bit_torrent::info_hash::InfoHash;
use crate::shared::clock::DurationSinceUnixEpoch;

/// A registered user. Created and deleted by the external admin surface; the
/// tracker only mutates the transfer counters, the HnR fields and the bonus
/// points.
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: UserId,
    pub passkey: Passkey,
    /// Cumulative credited upload in bytes.
    pub uploaded: u64,
    /// Cumulative credited download in bytes.
    pub downloaded: u64,
    pub hnr_warnings: u32,
    pub can_leech: bool,
    /// Per-user required share ratio. `0.0` means the global minimum applies.
    pub required_ratio: f64,
    pub bonus_points: f64,
}

impl User {
    /// The ratio check divides by the downloaded volume, so callers must
    /// handle `downloaded == 0` before calling this.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn ratio(&self) -> f64 {
        self.uploaded as f64 / self.downloaded as f64
    }
}

/// Per-torrent reward and charging settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TorrentSettings {
    pub freeleech: bool,
    /// When set, freeleech automatically ends at this instant.
    pub freeleech_until: Option<DurationSinceUnixEpoch>,
    pub upload_multiplier: f64,
    pub download_multiplier: f64,
}

impl Default for TorrentSettings {
    fn default() -> Self {
        Self {
            freeleech: false,
            freeleech_until: None,
            upload_multiplier: 1.0,
            download_multiplier: 1.0,
        }
    }
}

impl TorrentSettings {
    /// Freeleech is active while the flag is set and the optional deadline has
    /// not passed.
    #[must_use]
    pub fn freeleech_active(&self, now: DurationSinceUnixEpoch) -> bool {
        self.freeleech && self.freeleech_until.map_or(true, |until| now < until)
    }

    /// The download multiplier that applies right now. Freeleech forces it to
    /// zero.
    #[must_use]
    pub fn effective_download_multiplier(&self, now: DurationSinceUnixEpoch) -> f64 {
        if self.freeleech_active(now) {
            0.0
        } else {
            self.download_multiplier
        }
    }
}

/// A registered torrent with its cached swarm counters.
#[derive(Debug, Clone, PartialEq)]
pub struct Torrent {
    pub id: TorrentId,
    pub info_hash: InfoHash,
    pub seeders: u32,
    pub leechers: u32,
    /// The number of peers that have ever completed downloading this torrent.
    pub completed: u32,
    pub settings: TorrentSettings,
}

/// A completed download by a user, tracked for hit-and-run detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snatch {
    pub user_id: UserId,
    pub torrent_id: TorrentId,
    pub completed_at: DurationSinceUnixEpoch,
    /// Accumulated seconds the user has been seeding this torrent.
    pub seedtime: u64,
    pub last_announce_at: DurationSinceUnixEpoch,
    pub hnr: bool,
}

/// A whitelisted client implementation, identified by a 1 to 8 byte peer-id
/// prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WhitelistEntry {
    pub prefix: Vec<u8>,
    pub name: String,
}

/// An IP ban. `ip` holds either a single address (`10.0.0.1`) or a CIDR range
/// (`10.0.0.0/8`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ban {
    pub id: i64,
    pub ip: String,
    pub reason: String,
    /// `None` means the ban never expires.
    pub expires_at: Option<DurationSinceUnixEpoch>,
}
