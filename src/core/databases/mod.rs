//! The persistence module.
//!
//! Persistence is implemented with one [`Database`] trait and an `SQLite3`
//! driver ([`sqlite::Sqlite`]) over an `r2d2` connection pool.
//!
//! The persistent objects are:
//!
//! - **Users**: passkey, transfer counters, HnR state, bonus points.
//! - **Torrents**: info-hash, cached swarm counters, charging settings.
//! - **Snatches**: one row per completed `(user, torrent)` download.
//! - **Client whitelist**: accepted peer-id prefixes.
//! - **Bans**: exact IPs or CIDR ranges with optional expiry.
//!
//! > **NOTICE**: The peer lists are not persisted here. Peers re-announce on
//! > intervals, so swarm state reconverges within one announce interval after
//! > a restart. Peer storage has its own backend (see
//! > [`storage`](crate::core::swarm::storage)).
pub mod error;
pub mod sqlite;

use self::error::Error;
use crate::core::models::{Ban, Snatch, Torrent, TorrentSettings, User, WhitelistEntry};
use crate::core::{TorrentId, UserId};
use crate::shared::bit_torrent::info_hash::InfoHash;
use crate::shared::clock::DurationSinceUnixEpoch;

/// Outcome of a bonus point redemption attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedeemOutcome {
    /// Points deducted and upload credit granted.
    Redeemed,
    UserNotFound,
    InsufficientPoints,
}

/// The persistence trait. It contains all the methods the core needs to
/// interact with the durable store.
///
/// All writes are either counter increments (commutative, safe to replay out
/// of order) or last-write-wins on scalar fields, per statement, on a single
/// row family.
pub trait Database: Sync + Send {
    /// It instantiates a new database driver.
    ///
    /// # Errors
    ///
    /// Will return an [`enum@Error`] if the connection pool cannot be created.
    fn new(db_path: &str) -> Result<Self, Error>
    where
        Self: Sized;

    // Schema

    /// It generates the database tables and indexes. SQL queries are hardcoded
    /// in the trait implementation.
    ///
    /// # Errors
    ///
    /// Will return an [`enum@Error`] if unable to create the tables.
    fn create_database_tables(&self) -> Result<(), Error>;

    /// It drops the database tables.
    ///
    /// # Errors
    ///
    /// Will return an [`enum@Error`] if unable to drop the tables.
    fn drop_database_tables(&self) -> Result<(), Error>;

    // Gate cache loads

    /// It loads all users. Used to build the gate-cache passkey table.
    ///
    /// # Errors
    ///
    /// Will return an [`enum@Error`] if the query fails.
    fn load_users(&self) -> Result<Vec<User>, Error>;

    /// It loads the client whitelist.
    ///
    /// # Errors
    ///
    /// Will return an [`enum@Error`] if the query fails.
    fn load_whitelist(&self) -> Result<Vec<WhitelistEntry>, Error>;

    /// It loads the ban list, expired bans included.
    ///
    /// # Errors
    ///
    /// Will return an [`enum@Error`] if the query fails.
    fn load_bans(&self) -> Result<Vec<Ban>, Error>;

    // Torrents

    /// It returns the torrent with the given info-hash, if registered.
    ///
    /// # Errors
    ///
    /// Will return an [`enum@Error`] if the query fails.
    fn get_torrent_by_info_hash(&self, info_hash: &InfoHash) -> Result<Option<Torrent>, Error>;

    /// It returns the registered torrent for the info-hash, registering it
    /// first when unknown. Race-safe: when two callers insert concurrently the
    /// loser of the unique-constraint race re-fetches the winner's row.
    ///
    /// # Errors
    ///
    /// Will return an [`enum@Error`] if the row can neither be inserted nor
    /// fetched.
    fn get_or_insert_torrent(&self, info_hash: &InfoHash) -> Result<Torrent, Error>;

    /// It updates the cached swarm counters of a torrent: `seeders` and
    /// `leechers` are set, `completed` is incremented by the delta.
    ///
    /// # Errors
    ///
    /// Will return an [`enum@Error`] if the update fails.
    fn sync_torrent_stats(&self, torrent_id: TorrentId, seeders: u32, leechers: u32, completed_delta: u32) -> Result<(), Error>;

    // Users

    /// It returns a user by id.
    ///
    /// # Errors
    ///
    /// Will return an [`enum@Error`] if the query fails.
    fn get_user(&self, user_id: UserId) -> Result<Option<User>, Error>;

    /// It adds an already-multiplied transfer delta to a user's cumulative
    /// counters.
    ///
    /// # Errors
    ///
    /// Will return an [`enum@Error`] if the update fails.
    fn increment_user_transfer(&self, user_id: UserId, uploaded: u64, downloaded: u64) -> Result<(), Error>;

    /// It adds bonus points to a user.
    ///
    /// # Errors
    ///
    /// Will return an [`enum@Error`] if the update fails.
    fn add_bonus_points(&self, user_id: UserId, points: f64) -> Result<(), Error>;

    /// It redeems bonus points for synthetic upload credit, atomically: the
    /// deduction only happens when the balance covers the requested points.
    ///
    /// # Errors
    ///
    /// Will return an [`enum@Error`] if the queries fail; policy rejections
    /// are reported through [`RedeemOutcome`].
    fn redeem_bonus_points(&self, user_id: UserId, points: f64, upload_credit: u64) -> Result<RedeemOutcome, Error>;

    // Snatches

    /// It records a completed download. An existing `(user, torrent)` snatch
    /// keeps its original `completed_at`.
    ///
    /// # Errors
    ///
    /// Will return an [`enum@Error`] if the upsert fails.
    fn upsert_snatch(&self, user_id: UserId, torrent_id: TorrentId, completed_at: DurationSinceUnixEpoch) -> Result<(), Error>;

    /// It adds seedtime to a snatch and refreshes its last-announce
    /// timestamp. Announces for pairs with no snatch row are ignored.
    ///
    /// # Errors
    ///
    /// Will return an [`enum@Error`] if the update fails.
    fn record_seedtime(
        &self,
        user_id: UserId,
        torrent_id: TorrentId,
        seedtime_delta: u64,
        last_announce_at: DurationSinceUnixEpoch,
    ) -> Result<(), Error>;

    /// It returns the snatches that violate the hit-and-run policy: completed
    /// before the cutoff, under the seedtime floor, and not yet marked.
    ///
    /// # Errors
    ///
    /// Will return an [`enum@Error`] if the query fails.
    fn find_hnr_candidates(&self, completed_before: DurationSinceUnixEpoch, min_seedtime: u64) -> Result<Vec<Snatch>, Error>;

    /// It marks a snatch as a hit-and-run.
    ///
    /// # Errors
    ///
    /// Will return an [`enum@Error`] if the update fails.
    fn mark_snatch_hnr(&self, user_id: UserId, torrent_id: TorrentId) -> Result<(), Error>;

    /// It adds to a user's warning counter and returns the new total.
    ///
    /// # Errors
    ///
    /// Will return an [`enum@Error`] if the update fails or the user does not
    /// exist.
    fn increment_hnr_warnings(&self, user_id: UserId, by: u32) -> Result<u32, Error>;

    /// It sets whether a user may leech.
    ///
    /// # Errors
    ///
    /// Will return an [`enum@Error`] if the update fails.
    fn set_can_leech(&self, user_id: UserId, can_leech: bool) -> Result<(), Error>;

    /// It resets a user's warnings to zero and re-enables leeching.
    ///
    /// # Errors
    ///
    /// Will return an [`enum@Error`] if the update fails.
    fn clear_hnr_warnings(&self, user_id: UserId) -> Result<(), Error>;

    // Bans and whitelist

    /// It adds a ban for an exact IP or a CIDR range.
    ///
    /// # Errors
    ///
    /// Will return [`Error::RecordAlreadyExists`] when the IP is already
    /// banned, or another [`enum@Error`] if the insert fails.
    fn add_ban(&self, ip: &str, reason: &str, expires_at: Option<DurationSinceUnixEpoch>) -> Result<Ban, Error>;

    /// It removes a ban by its IP string.
    ///
    /// # Errors
    ///
    /// Will return an [`enum@Error`] if the delete fails.
    fn remove_ban(&self, ip: &str) -> Result<(), Error>;

    /// It deletes expired bans and returns how many were removed.
    ///
    /// # Errors
    ///
    /// Will return an [`enum@Error`] if the delete fails.
    fn cleanup_expired_bans(&self, now: DurationSinceUnixEpoch) -> Result<usize, Error>;

    /// It adds a client whitelist entry.
    ///
    /// # Errors
    ///
    /// Will return [`Error::RecordAlreadyExists`] when the prefix is already
    /// whitelisted, or another [`enum@Error`] if the insert fails.
    fn add_whitelist_entry(&self, entry: &WhitelistEntry) -> Result<(), Error>;

    /// It removes a client whitelist entry by prefix.
    ///
    /// # Errors
    ///
    /// Will return an [`enum@Error`] if the delete fails.
    fn remove_whitelist_entry(&self, prefix: &[u8]) -> Result<(), Error>;

    /// It updates a torrent's charging settings. Used by the external admin
    /// surface; swarm workers pick the change up on their next sync tick.
    ///
    /// # Errors
    ///
    /// Will return an [`enum@Error`] if the update fails.
    fn update_torrent_settings(&self, torrent_id: TorrentId, settings: &TorrentSettings) -> Result<(), Error>;
}

/// It builds a boxed database driver for the configured path.
///
/// # Errors
///
/// Will return an [`enum@Error`] if the driver cannot open the store.
pub fn build(db_path: &str) -> Result<Box<dyn Database>, Error> {
    let database = sqlite::Sqlite::new(db_path)?;
    database.create_database_tables()?;
    Ok(Box::new(database))
}
