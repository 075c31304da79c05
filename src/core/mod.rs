//! The core tracker module contains the generic private-tracker logic which
//! is independent of the delivery layer.
//!
//! It contains the tracker services and their dependencies. It's a domain
//! layer which does not specify how the end user connects to the tracker.
//! Typically this module is used by higher modules like:
//!
//! - An HTTP tracker
//! - A UDP tracker
//! - A tracker REST API (external to this crate)
//!
//! ```text
//! Delivery layer     Domain layer
//!
//!     HTTP tracker |
//!      UDP tracker |> Core tracker
//! Tracker REST API |
//! ```
//!
//! The [`Tracker`] struct owns the request-serving engine:
//!
//! - The **gate** ([`gate::GateCache`]): passkey lookup, client whitelist,
//!   ban list.
//! - The **rate limiter** ([`rate_limit::RateLimiter`]).
//! - The **swarm engine** ([`swarm::SwarmRegistry`] and its workers): peer
//!   lifecycle, anti-spoof keys, peer selection.
//! - The **stats pipeline** ([`stats::StatsBuffer`] plus the collector in
//!   [`Tracker::flush_stats`]): buffered transfer deltas with per-torrent
//!   multipliers and freeleech applied at recording time.
//! - The **background services**: hit-and-run detection ([`hnr`]), bonus
//!   points ([`bonus`]), peer reachability ([`verifier`]).
//!
//! Leech eligibility (the ratio policy) is evaluated on the announce path before
//! the swarm is touched: seeders always pass, leechers need `can_leech` plus
//! either a ratio above their requirement or a downloaded volume inside the
//! grace allowance.
pub mod auth;
pub mod bonus;
pub mod databases;
pub mod error;
pub mod gate;
pub mod hnr;
pub mod models;
pub mod peer;
pub mod rate_limit;
pub mod stats;
pub mod statistics;
pub mod swarm;
pub mod verifier;

use std::collections::HashMap;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;

use rand::Rng;
use tracing::{debug, warn};

pub use self::error::Error;

use self::auth::Passkey;
use self::databases::Database;
use self::gate::{GateCache, UserEntry};
use self::peer::{AnnounceEvent, Id, Peer};
use self::rate_limit::{Decision, RateLimiter, RequestClass};
use self::stats::StatsBuffer;
use self::swarm::storage::PeerStorage;
use self::swarm::{PeerData, SwarmCounts, SwarmPolicy, SwarmRegistry};
use self::verifier::Verifier;
use crate::config::Configuration;
use crate::shared::bit_torrent::info_hash::InfoHash;
use crate::shared::clock::Time;
use crate::CurrentClock;

/// Durable-store row id of a user.
pub type UserId = i64;
/// Durable-store row id of a torrent.
pub type TorrentId = i64;

/// A single announce can never add more than this many seconds of seedtime,
/// whatever interval the client actually used.
pub const MAX_SEEDTIME_PER_ANNOUNCE: u64 = 7200;

/// The data returned to an announcing peer.
#[derive(Debug, Clone)]
pub struct AnnounceData {
    pub seeders: u32,
    pub leechers: u32,
    /// Selected peers, the requester excluded.
    pub peers: Vec<Peer>,
    /// Announce interval in seconds, jitter already applied.
    pub interval: u32,
    /// The anti-spoof key the peer must echo on its next announce.
    pub announce_key: auth::AnnounceKey,
}

/// The data returned for a scrape: one entry per requested torrent.
#[derive(Debug, Clone, Default)]
pub struct ScrapeData {
    pub files: HashMap<InfoHash, SwarmCounts>,
}

/// The tracker. It owns every in-memory table and the swarm engine; the
/// delivery layers and background jobs all go through it.
pub struct Tracker {
    pub config: Arc<Configuration>,
    database: Arc<dyn Database>,
    gate: Arc<GateCache>,
    rate_limiter: RateLimiter,
    swarms: SwarmRegistry,
    stats_buffer: Arc<StatsBuffer>,
    verifier: Arc<Verifier>,
    hnr_detector: Option<hnr::HnrDetector>,
    bonus_calculator: Option<bonus::BonusCalculator>,
    stats_event_sender: statistics::EventSender,
    stats_repository: statistics::Repo,
}

impl Tracker {
    /// It assembles a tracker from its already-built collaborators.
    #[must_use]
    pub fn new(
        config: Arc<Configuration>,
        database: Arc<dyn Database>,
        peer_storage: Arc<dyn PeerStorage>,
        verifier: Arc<Verifier>,
        stats_event_sender: statistics::EventSender,
        stats_repository: statistics::Repo,
    ) -> Self {
        let gate = Arc::new(GateCache::new());
        let stats_buffer = Arc::new(StatsBuffer::new());

        let swarms = SwarmRegistry::new(
            peer_storage,
            database.clone(),
            verifier.clone(),
            stats_buffer.clone(),
            SwarmPolicy::from(&config.core),
            config.core.enforce_torrent_whitelist,
        );

        let hnr_detector = config
            .hnr
            .clone()
            .map(|hnr_config| hnr::HnrDetector::new(hnr_config, database.clone(), gate.clone()));

        let bonus_calculator = config
            .bonus_points
            .clone()
            .map(|bonus_config| bonus::BonusCalculator::new(bonus_config, database.clone()));

        Self {
            rate_limiter: RateLimiter::new(&config.rate_limiting),
            config,
            database,
            gate,
            swarms,
            stats_buffer,
            verifier,
            hnr_detector,
            bonus_calculator,
            stats_event_sender,
            stats_repository,
        }
    }

    /// It (re)builds the gate cache from the durable store. Called at startup
    /// and by the admin reload action.
    ///
    /// # Errors
    ///
    /// Will return a database [`Error`](databases::error::Error) if any of
    /// the three loads fail.
    pub fn load_gate_from_database(&self) -> Result<(), databases::error::Error> {
        let users = self.database.load_users()?;
        let whitelist = self.database.load_whitelist()?;
        let bans = self.database.load_bans()?;

        debug!(
            "gate cache loaded: {} users, {} whitelist prefixes, {} bans",
            users.len(),
            whitelist.len(),
            bans.len()
        );

        self.gate.load_users(&users);
        self.gate.load_whitelist(&whitelist);
        self.gate.load_bans(&bans);

        Ok(())
    }

    // Gate checks, in request-pipeline order.

    /// # Errors
    ///
    /// Will return [`Error::Banned`] iff an unexpired ban matches the address.
    pub fn check_banned(&self, ip: IpAddr) -> Result<(), Error> {
        match self.gate.check_banned(ip, CurrentClock::now()) {
            None => Ok(()),
            Some(banned) => Err(Error::Banned { reason: banned.reason }),
        }
    }

    /// # Errors
    ///
    /// Will return [`Error::RateLimited`] when the IP exhausted its budget
    /// for the request class.
    pub fn check_rate_limit(&self, ip: IpAddr, class: RequestClass) -> Result<(), Error> {
        match self.rate_limiter.check(ip, class, CurrentClock::now()) {
            Decision::Allowed => Ok(()),
            Decision::Denied { retry_after } => Err(Error::RateLimited { retry_after }),
        }
    }

    /// It resolves a raw passkey string to the cached user.
    ///
    /// # Errors
    ///
    /// Will return [`Error::InvalidPasskey`] for a malformed or unknown
    /// passkey.
    pub fn authenticate(&self, raw_passkey: &str) -> Result<Arc<UserEntry>, Error> {
        let passkey = Passkey::from_str(raw_passkey).map_err(|_| Error::InvalidPasskey)?;

        self.gate.user_by_passkey(&passkey).ok_or(Error::InvalidPasskey)
    }

    /// # Errors
    ///
    /// Will return [`Error::ClientNotWhitelisted`] when the peer-id prefix is
    /// not registered.
    pub fn check_client_whitelisted(&self, peer_id: &Id) -> Result<(), Error> {
        if self.gate.is_client_whitelisted(&peer_id.to_bytes()) {
            Ok(())
        } else {
            Err(Error::ClientNotWhitelisted)
        }
    }

    /// Leech eligibility. Seeders bypass it unconditionally; leechers need
    /// the leech flag plus a passing ratio (or the grace allowance).
    ///
    /// # Errors
    ///
    /// Will return [`Error::LeechingDisabled`] or [`Error::RatioTooLow`].
    pub fn check_leech_eligibility(&self, user: &UserEntry, left: u64) -> Result<(), Error> {
        if left == 0 {
            return Ok(());
        }

        if !user.can_leech() {
            return Err(Error::LeechingDisabled);
        }

        let downloaded = user.downloaded();

        if downloaded == 0 || downloaded < self.config.core.ratio_grace_bytes {
            return Ok(());
        }

        let required = if user.required_ratio > 0.0 {
            user.required_ratio
        } else {
            self.config.core.min_ratio
        };

        #[allow(clippy::cast_precision_loss)]
        let ratio = user.uploaded() as f64 / downloaded as f64;

        if ratio >= required {
            Ok(())
        } else {
            Err(Error::RatioTooLow)
        }
    }

    // Services

    /// It handles an announce that already passed the gate: eligibility, the
    /// swarm worker, stats recording, response assembly.
    ///
    /// # Errors
    ///
    /// Will return an [`enum@Error`] for eligibility rejections, anti-spoof
    /// rejections, unregistered torrents in whitelist mode, and transient
    /// store failures.
    pub async fn announce(&self, info_hash: &InfoHash, data: PeerData, num_want: usize) -> Result<AnnounceData, Error> {
        if let Some(user_id) = data.user_id {
            if let Some(user) = self.gate.user_by_id(user_id) {
                self.check_leech_eligibility(&user, data.left)?;
            }
        }

        let event = data.event;
        let left = data.left;
        let user_id = data.user_id;

        let outcome = self.swarms.announce(info_hash, data, num_want).await?;

        let now = CurrentClock::now();

        if let Some(user_id) = user_id {
            self.record_user_stats(user_id, &outcome, event, left, now);
        }

        Ok(AnnounceData {
            seeders: outcome.seeders,
            leechers: outcome.leechers,
            peers: outcome.peers,
            interval: self.interval_with_jitter(),
            announce_key: outcome.announce_key,
        })
    }

    /// Multiplier application and buffered recording for an authenticated
    /// announce. Freeleech forces the download multiplier to zero.
    fn record_user_stats(
        &self,
        user_id: UserId,
        outcome: &swarm::AnnounceOutcome,
        event: AnnounceEvent,
        left: u64,
        now: crate::shared::clock::DurationSinceUnixEpoch,
    ) {
        let up_multiplier = outcome.settings.upload_multiplier;
        let down_multiplier = outcome.settings.effective_download_multiplier(now);

        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let credited_up = (outcome.delta_uploaded as f64 * up_multiplier) as u64;
        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let credited_down = (outcome.delta_downloaded as f64 * down_multiplier) as u64;

        self.stats_buffer.record_user_transfer(user_id, credited_up, credited_down);

        if event == AnnounceEvent::Completed {
            self.stats_buffer.record_snatch_completed(user_id, outcome.torrent_id, now);
        }

        if left == 0 {
            if let Some(previous) = outcome.previous_updated {
                let seedtime = now.saturating_sub(previous).as_secs().min(MAX_SEEDTIME_PER_ANNOUNCE);
                if seedtime > 0 {
                    self.stats_buffer.record_seedtime(user_id, outcome.torrent_id, seedtime, now);
                }
            }
        }
    }

    /// It answers a scrape for up to
    /// [`MAX_SCRAPE_TORRENTS`](crate::shared::bit_torrent::MAX_SCRAPE_TORRENTS)
    /// torrents. Unknown torrents scrape as zeroes.
    ///
    /// # Errors
    ///
    /// Will return a transient [`enum@Error`] when the durable store fails.
    pub async fn scrape(&self, info_hashes: &[InfoHash]) -> Result<ScrapeData, Error> {
        let mut data = ScrapeData::default();

        for info_hash in info_hashes
            .iter()
            .take(usize::from(crate::shared::bit_torrent::MAX_SCRAPE_TORRENTS))
        {
            let counts = self.swarms.scrape(info_hash).await?;
            data.files.insert(*info_hash, counts);
        }

        Ok(data)
    }

    /// The announce interval with jitter applied. Jitter desynchronizes
    /// re-announces after mass events (a restart announces every peer within
    /// one interval).
    #[must_use]
    pub fn interval_with_jitter(&self) -> u32 {
        apply_jitter(
            self.config.core.announce_interval,
            self.config.core.announce_jitter,
            &mut rand::thread_rng(),
        )
    }

    // Stats pipeline

    /// The collector: one atomic drain of the buffer, then idempotent writes
    /// against the durable store. A failure on a single entry is logged and
    /// skipped; that delta is lost, bounded by one flush interval.
    pub fn flush_stats(&self) {
        let drained = self.stats_buffer.drain();

        if drained.is_empty() {
            return;
        }

        debug!(
            "flushing stats: {} users, {} torrents, {} snatches",
            drained.users.len(),
            drained.torrents.len(),
            drained.snatches.len()
        );

        for delta in &drained.users {
            match self.database.increment_user_transfer(delta.user_id, delta.uploaded, delta.downloaded) {
                Ok(()) => {
                    if let Some(entry) = self.gate.user_by_id(delta.user_id) {
                        entry.add_transfer(delta.uploaded, delta.downloaded);
                    }
                }
                Err(err) => warn!("dropping transfer delta for user {}: {err}", delta.user_id),
            }
        }

        for delta in &drained.torrents {
            if let Err(err) =
                self.database
                    .sync_torrent_stats(delta.torrent_id, delta.seeders, delta.leechers, delta.completed_delta)
            {
                warn!("dropping stat sync for torrent {}: {err}", delta.torrent_id);
            }
        }

        for delta in &drained.snatches {
            if let Some(completed_at) = delta.completed_at {
                if let Err(err) = self.database.upsert_snatch(delta.user_id, delta.torrent_id, completed_at) {
                    warn!("dropping snatch for ({}, {}): {err}", delta.user_id, delta.torrent_id);
                    continue;
                }
            }

            if delta.seedtime > 0 {
                if let Err(err) =
                    self.database
                        .record_seedtime(delta.user_id, delta.torrent_id, delta.seedtime, delta.last_announce_at)
                {
                    warn!("dropping seedtime for ({}, {}): {err}", delta.user_id, delta.torrent_id);
                }
            }
        }
    }

    /// Graceful shutdown: final swarm syncs, then a final stats flush.
    pub async fn shutdown(&self) {
        self.swarms.shutdown().await;
        self.flush_stats();
    }

    // Background services

    /// One hit-and-run pass, when the detector is configured.
    pub fn run_hnr_pass(&self) {
        if let Some(detector) = &self.hnr_detector {
            if let Err(err) = detector.run_pass(CurrentClock::now()) {
                warn!("hit-and-run pass failed: {err}");
            }
        }
    }

    /// One bonus award pass, when the calculator is configured.
    pub async fn run_bonus_pass(&self) {
        if let Some(calculator) = &self.bonus_calculator {
            calculator.run_pass(&self.swarms).await;
        }
    }

    /// It redeems bonus points for upload credit.
    ///
    /// # Errors
    ///
    /// Will return [`Error::UserNotFound`], [`Error::InsufficientPoints`],
    /// or a transient error; also [`Error::UserNotFound`] when the bonus
    /// system is disabled by configuration.
    pub fn redeem_bonus_points(&self, user_id: UserId, points: f64) -> Result<u64, Error> {
        let calculator = self.bonus_calculator.as_ref().ok_or(Error::UserNotFound)?;
        calculator.redeem(user_id, points)
    }

    /// Periodic in-memory maintenance: rate-limit and verifier cache sweeps.
    pub fn sweep_caches(&self) {
        let now = CurrentClock::now();
        self.rate_limiter.sweep(now);
        self.verifier.sweep_expired(now);
    }

    // Admin surface entry points. The REST layer that calls these lives
    // outside this crate.

    /// # Errors
    ///
    /// Will return [`Error::InvalidCidr`] for a malformed IP string or
    /// [`Error::Duplicate`] when the IP is already banned.
    pub fn add_ban(
        &self,
        ip: &str,
        reason: &str,
        expires_at: Option<crate::shared::clock::DurationSinceUnixEpoch>,
    ) -> Result<(), Error> {
        let ban = self.database.add_ban(ip, reason, expires_at).map_err(|err| match err {
            databases::error::Error::RecordAlreadyExists { message } => Error::Duplicate { message },
            other => Error::from(other),
        })?;

        self.gate.add_ban(&ban).map_err(|err| Error::InvalidCidr { message: err.to_string() })
    }

    /// # Errors
    ///
    /// Will return a transient error when the store fails.
    pub fn remove_ban(&self, ip: &str) -> Result<(), Error> {
        self.database.remove_ban(ip)?;
        self.gate.remove_ban(ip);
        Ok(())
    }

    /// The admin-triggered cleanup of expired bans, store and cache together.
    ///
    /// # Errors
    ///
    /// Will return a transient error when the store fails.
    pub fn cleanup_expired_bans(&self) -> Result<usize, Error> {
        let now = CurrentClock::now();
        let removed = self.database.cleanup_expired_bans(now)?;
        self.gate.sweep_expired_bans(now);
        Ok(removed)
    }

    /// # Errors
    ///
    /// Will return [`Error::Duplicate`] when the prefix is registered already.
    pub fn add_whitelist_entry(&self, entry: &models::WhitelistEntry) -> Result<(), Error> {
        self.database.add_whitelist_entry(entry).map_err(|err| match err {
            databases::error::Error::RecordAlreadyExists { message } => Error::Duplicate { message },
            other => Error::from(other),
        })?;

        self.gate.add_whitelist_prefix(&entry.prefix);
        Ok(())
    }

    /// # Errors
    ///
    /// Will return a transient error when the store fails.
    pub fn remove_whitelist_entry(&self, prefix: &[u8]) -> Result<(), Error> {
        self.database.remove_whitelist_entry(prefix)?;
        self.gate.remove_whitelist_prefix(prefix);
        Ok(())
    }

    /// # Errors
    ///
    /// Will return a transient error when the store fails.
    pub fn clear_hnr_warnings(&self, user_id: UserId) -> Result<(), Error> {
        match &self.hnr_detector {
            Some(detector) => detector.clear_warnings(user_id).map_err(Error::from),
            None => {
                self.database.clear_hnr_warnings(user_id)?;
                if let Some(entry) = self.gate.user_by_id(user_id) {
                    entry.set_can_leech(true);
                }
                Ok(())
            }
        }
    }

    // Metrics

    pub fn send_stats_event(&self, event: statistics::Event) {
        self.stats_event_sender.send_event(event);
    }

    pub async fn get_metrics(&self) -> statistics::Metrics {
        self.stats_repository.get_stats().await
    }

    #[must_use]
    pub fn active_swarm_count(&self) -> usize {
        self.swarms.active_swarm_count()
    }

    #[must_use]
    pub fn gate(&self) -> &GateCache {
        &self.gate
    }
}

/// `max(1, base + uniform(-⌊base·jitter⌋, +⌊base·jitter⌋))`. A jitter of `0`
/// returns the base unchanged.
#[must_use]
pub fn apply_jitter<R: Rng>(base: u32, jitter: f64, rng: &mut R) -> u32 {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let spread = (f64::from(base) * jitter.clamp(0.0, 1.0)).floor() as i64;

    if spread == 0 {
        return base.max(1);
    }

    let offset = rng.gen_range(-spread..=spread);
    let jittered = i64::from(base) + offset;

    u32::try_from(jittered.max(1)).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use std::net::IpAddr;
    use std::sync::Arc;
    use std::time::Duration;

    use super::{statistics, Error, Tracker};
    use crate::config::Configuration;
    use crate::core::databases::sqlite::Sqlite;
    use crate::core::databases::Database;
    use crate::core::models::TorrentSettings;
    use crate::core::peer::{AnnounceEvent, Id};
    use crate::core::swarm::storage::memory::Memory;
    use crate::core::swarm::PeerData;
    use crate::core::verifier::Verifier;
    use crate::shared::bit_torrent::info_hash::InfoHash;

    struct Harness {
        tracker: Arc<Tracker>,
        database: Arc<Sqlite>,
    }

    impl Harness {
        fn new(config: Configuration) -> Self {
            let database = Arc::new({
                let database = Sqlite::new_in_memory();
                database.create_database_tables().unwrap();
                database
            });

            let (stats_event_sender, stats_repository) = statistics::Keeper::new_active_instance();

            let tracker = Arc::new(Tracker::new(
                Arc::new(config),
                database.clone(),
                Arc::new(Memory::new()),
                Verifier::disabled(),
                stats_event_sender,
                stats_repository,
            ));

            Self { tracker, database }
        }

        fn seed_user(&self, passkey: &str, uploaded: u64, downloaded: u64) -> i64 {
            let conn = self.database.connection_for_tests();
            conn.execute(
                "INSERT INTO users (passkey, uploaded, downloaded) VALUES (?1, ?2, ?3)",
                r2d2_sqlite::rusqlite::params![passkey, uploaded, downloaded],
            )
            .unwrap();
            drop(conn);

            self.tracker.load_gate_from_database().unwrap();
            self.database.connection_for_tests().last_insert_rowid()
        }

        fn peer_data(&self, user_id: i64, port: u16, downloaded: u64, left: u64, event: AnnounceEvent) -> PeerData {
            PeerData {
                user_id: Some(user_id),
                ip: IpAddr::V4([127, 0, 0, 1].into()),
                port,
                peer_id: Id(*b"-qB00000000000000001"),
                uploaded: 0,
                downloaded,
                left,
                event,
                key: None,
            }
        }
    }

    fn info_hash(byte: u8) -> InfoHash {
        InfoHash([byte; 20])
    }

    #[tokio::test]
    async fn an_unknown_passkey_should_be_rejected() {
        let harness = Harness::new(Configuration::default());
        harness.seed_user("00000000000000000000000000000001", 0, 0);

        assert!(harness.tracker.authenticate("00000000000000000000000000000001").is_ok());
        assert!(matches!(
            harness.tracker.authenticate("00000000000000000000000000000002"),
            Err(Error::InvalidPasskey)
        ));
        assert!(matches!(harness.tracker.authenticate("short"), Err(Error::InvalidPasskey)));
    }

    #[tokio::test]
    async fn freeleech_should_not_charge_downloaded_volume() {
        let harness = Harness::new(Configuration::default());
        let user_id = harness.seed_user("00000000000000000000000000000001", 0, 0);

        // T1 is freeleech, T2 charges normally.
        let free = harness.database.get_or_insert_torrent(&info_hash(1)).unwrap();
        harness
            .database
            .update_torrent_settings(
                free.id,
                &TorrentSettings {
                    freeleech: true,
                    ..Default::default()
                },
            )
            .unwrap();
        harness.database.get_or_insert_torrent(&info_hash(2)).unwrap();

        // Join, then report 1 MB downloaded on each torrent.
        let first = harness
            .tracker
            .announce(&info_hash(1), harness.peer_data(user_id, 6881, 0, 100, AnnounceEvent::Started), 50)
            .await
            .unwrap();
        let mut reporting = harness.peer_data(user_id, 6881, 1_000_000, 100, AnnounceEvent::None);
        reporting.key = Some(first.announce_key.clone());
        harness.tracker.announce(&info_hash(1), reporting, 50).await.unwrap();

        let first = harness
            .tracker
            .announce(&info_hash(2), harness.peer_data(user_id, 6882, 0, 100, AnnounceEvent::Started), 50)
            .await
            .unwrap();
        let mut reporting = harness.peer_data(user_id, 6882, 1_000_000, 100, AnnounceEvent::None);
        reporting.key = Some(first.announce_key.clone());
        harness.tracker.announce(&info_hash(2), reporting, 50).await.unwrap();

        harness.tracker.flush_stats();

        let user = harness.database.get_user(user_id).unwrap().unwrap();
        assert_eq!(user.downloaded, 1_000_000, "only the non-freeleech torrent charges");
    }

    #[tokio::test]
    async fn a_low_ratio_leecher_should_be_denied_but_may_still_seed() {
        let mut config = Configuration::default();
        config.core.min_ratio = 0.3;
        config.core.ratio_grace_bytes = 1_000_000_000;

        let harness = Harness::new(config);
        // ratio 0.01, downloaded far beyond the grace allowance
        let user_id = harness.seed_user("00000000000000000000000000000001", 100_000_000, 10_000_000_000);

        let leeching = harness
            .tracker
            .announce(&info_hash(1), harness.peer_data(user_id, 6881, 0, 100, AnnounceEvent::Started), 50)
            .await;
        assert!(matches!(leeching, Err(Error::RatioTooLow)));

        let seeding = harness
            .tracker
            .announce(&info_hash(1), harness.peer_data(user_id, 6881, 0, 0, AnnounceEvent::Started), 50)
            .await;
        assert!(seeding.is_ok());
    }

    #[tokio::test]
    async fn a_fresh_user_should_leech_within_the_grace_allowance() {
        let harness = Harness::new(Configuration::default());
        let user_id = harness.seed_user("00000000000000000000000000000001", 0, 0);

        let result = harness
            .tracker
            .announce(&info_hash(1), harness.peer_data(user_id, 6881, 0, 100, AnnounceEvent::Started), 50)
            .await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn whitelist_mode_should_reject_unregistered_torrents() {
        let mut config = Configuration::default();
        config.core.enforce_torrent_whitelist = true;

        let harness = Harness::new(config);
        let user_id = harness.seed_user("00000000000000000000000000000001", 0, 0);

        let unknown = harness
            .tracker
            .announce(&info_hash(9), harness.peer_data(user_id, 6881, 0, 100, AnnounceEvent::Started), 50)
            .await;
        assert!(matches!(unknown, Err(Error::TorrentNotRegistered)));

        harness.database.get_or_insert_torrent(&info_hash(1)).unwrap();
        let registered = harness
            .tracker
            .announce(&info_hash(1), harness.peer_data(user_id, 6881, 0, 100, AnnounceEvent::Started), 50)
            .await;
        assert!(registered.is_ok());
    }

    #[tokio::test]
    async fn a_scrape_should_report_counts_for_known_and_zeros_for_unknown_torrents() {
        let harness = Harness::new(Configuration::default());
        let user_id = harness.seed_user("00000000000000000000000000000001", 0, 0);

        harness
            .tracker
            .announce(&info_hash(1), harness.peer_data(user_id, 6881, 0, 0, AnnounceEvent::Started), 50)
            .await
            .unwrap();

        let data = harness.tracker.scrape(&[info_hash(1), info_hash(7)]).await.unwrap();

        assert_eq!(data.files.len(), 2);
        assert_eq!(data.files.get(&info_hash(1)).unwrap().seeders, 1);
        assert_eq!(data.files.get(&info_hash(7)).unwrap().seeders, 0);
    }

    #[tokio::test]
    async fn a_completed_announce_should_create_a_snatch_on_flush() {
        let harness = Harness::new(Configuration::default());
        let user_id = harness.seed_user("00000000000000000000000000000001", 0, 0);

        let first = harness
            .tracker
            .announce(&info_hash(1), harness.peer_data(user_id, 6881, 0, 100, AnnounceEvent::Started), 50)
            .await
            .unwrap();

        let mut completed = harness.peer_data(user_id, 6881, 100, 0, AnnounceEvent::Completed);
        completed.key = Some(first.announce_key.clone());
        harness.tracker.announce(&info_hash(1), completed, 50).await.unwrap();

        harness.tracker.flush_stats();

        let candidates = harness
            .database
            .find_hnr_candidates(Duration::from_secs(10), 3600)
            .unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].user_id, user_id);
    }
}

#[cfg(test)]
mod jitter_tests {
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    use super::apply_jitter;

    #[test]
    fn the_jittered_interval_should_stay_within_the_documented_bound() {
        let mut rng = SmallRng::seed_from_u64(42);

        for base in [1u32, 30, 1800, 7200] {
            for jitter in [0.0, 0.1, 0.5, 1.0] {
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let spread = (f64::from(base) * jitter).floor() as u32;
                for _ in 0..100 {
                    let value = apply_jitter(base, jitter, &mut rng);
                    assert!(value >= (base.saturating_sub(spread)).max(1));
                    assert!(value <= base + spread);
                }
            }
        }
    }

    #[test]
    fn zero_jitter_should_return_the_base_interval() {
        let mut rng = SmallRng::seed_from_u64(7);
        assert_eq!(apply_jitter(1800, 0.0, &mut rng), 1800);
    }

    #[test]
    fn the_interval_should_never_drop_below_one_second() {
        let mut rng = SmallRng::seed_from_u64(7);
        for _ in 0..100 {
            assert!(apply_jitter(1, 1.0, &mut rng) >= 1);
        }
    }
}
