//! The `SQLite3` database driver.
use std::panic::Location;
use std::str::FromStr;
use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::rusqlite::{params, Row};
use r2d2_sqlite::SqliteConnectionManager;

use super::error::Error;
use super::{Database, RedeemOutcome};
use crate::core::auth::Passkey;
use crate::core::models::{Ban, Snatch, Torrent, TorrentSettings, User, WhitelistEntry};
use crate::core::{TorrentId, UserId};
use crate::shared::bit_torrent::info_hash::InfoHash;
use crate::shared::clock::DurationSinceUnixEpoch;

pub struct Sqlite {
    pool: Pool<SqliteConnectionManager>,
}

/// Seconds-since-epoch column helper. `SQLite` integers are `i64`; the
/// tracker's byte counters are far below `i64::MAX` in practice, so the
/// saturating casts never engage outside of corrupted rows.
fn to_secs(timestamp: DurationSinceUnixEpoch) -> i64 {
    i64::try_from(timestamp.as_secs()).unwrap_or(i64::MAX)
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[allow(clippy::cast_sign_loss)]
fn from_i64(value: i64) -> u64 {
    value.max(0) as u64
}

fn is_unique_violation(err: &r2d2_sqlite::rusqlite::Error) -> bool {
    matches!(
        err,
        r2d2_sqlite::rusqlite::Error::SqliteFailure(e, _)
            if e.code == r2d2_sqlite::rusqlite::ErrorCode::ConstraintViolation
    )
}

fn user_from_row(row: &Row) -> Result<User, r2d2_sqlite::rusqlite::Error> {
    let passkey: String = row.get(1)?;

    Ok(User {
        id: row.get(0)?,
        passkey: Passkey::from_str(&passkey).map_err(|_| r2d2_sqlite::rusqlite::Error::InvalidQuery)?,
        uploaded: from_i64(row.get(2)?),
        downloaded: from_i64(row.get(3)?),
        hnr_warnings: row.get(4)?,
        can_leech: row.get(5)?,
        required_ratio: row.get(6)?,
        bonus_points: row.get(7)?,
    })
}

fn torrent_from_row(row: &Row) -> Result<Torrent, r2d2_sqlite::rusqlite::Error> {
    let info_hash: String = row.get(1)?;
    let freeleech_until: Option<i64> = row.get(6)?;

    Ok(Torrent {
        id: row.get(0)?,
        info_hash: InfoHash::from_str(&info_hash).map_err(|_| r2d2_sqlite::rusqlite::Error::InvalidQuery)?,
        seeders: row.get(2)?,
        leechers: row.get(3)?,
        completed: row.get(4)?,
        settings: TorrentSettings {
            freeleech: row.get(5)?,
            freeleech_until: freeleech_until.map(|secs| Duration::from_secs(from_i64(secs))),
            upload_multiplier: row.get(7)?,
            download_multiplier: row.get(8)?,
        },
    })
}

const SELECT_TORRENT: &str = "SELECT id, info_hash, seeders, leechers, completed, freeleech, freeleech_until, \
                              upload_multiplier, download_multiplier FROM torrents";

const SELECT_USER: &str =
    "SELECT id, passkey, uploaded, downloaded, hnr_warnings, can_leech, required_ratio, bonus_points FROM users";

impl Database for Sqlite {
    /// It instantiates a new `SQLite3` database driver.
    ///
    /// Refer to [`databases::Database::new`](crate::core::databases::Database::new).
    fn new(db_path: &str) -> Result<Sqlite, Error> {
        let cm = SqliteConnectionManager::file(db_path);
        let pool = Pool::new(cm)?;
        Ok(Sqlite { pool })
    }

    /// Refer to [`databases::Database::create_database_tables`](crate::core::databases::Database::create_database_tables).
    fn create_database_tables(&self) -> Result<(), Error> {
        let statements = [
            "CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                passkey TEXT NOT NULL UNIQUE,
                uploaded INTEGER DEFAULT 0 NOT NULL,
                downloaded INTEGER DEFAULT 0 NOT NULL,
                hnr_warnings INTEGER DEFAULT 0 NOT NULL,
                can_leech INTEGER DEFAULT 1 NOT NULL,
                required_ratio REAL DEFAULT 0 NOT NULL,
                bonus_points REAL DEFAULT 0 NOT NULL
            );",
            "CREATE TABLE IF NOT EXISTS torrents (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                info_hash TEXT NOT NULL UNIQUE,
                seeders INTEGER DEFAULT 0 NOT NULL,
                leechers INTEGER DEFAULT 0 NOT NULL,
                completed INTEGER DEFAULT 0 NOT NULL,
                freeleech INTEGER DEFAULT 0 NOT NULL,
                freeleech_until INTEGER,
                upload_multiplier REAL DEFAULT 1 NOT NULL,
                download_multiplier REAL DEFAULT 1 NOT NULL
            );",
            "CREATE TABLE IF NOT EXISTS snatches (
                user_id INTEGER NOT NULL,
                torrent_id INTEGER NOT NULL,
                completed_at INTEGER NOT NULL,
                seedtime INTEGER DEFAULT 0 NOT NULL,
                last_announce_at INTEGER NOT NULL,
                hnr INTEGER DEFAULT 0 NOT NULL,
                PRIMARY KEY (user_id, torrent_id)
            );",
            "CREATE INDEX IF NOT EXISTS idx_snatches_hnr ON snatches (hnr) WHERE hnr = 1;",
            "CREATE TABLE IF NOT EXISTS whitelist (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                prefix BLOB NOT NULL UNIQUE,
                name TEXT NOT NULL
            );",
            "CREATE TABLE IF NOT EXISTS bans (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ip TEXT NOT NULL UNIQUE,
                reason TEXT NOT NULL,
                expires_at INTEGER
            );",
            "CREATE INDEX IF NOT EXISTS idx_bans_expires_at ON bans (expires_at);",
        ];

        let conn = self.pool.get()?;

        for statement in statements {
            conn.execute(statement, [])?;
        }

        Ok(())
    }

    /// Refer to [`databases::Database::drop_database_tables`](crate::core::databases::Database::drop_database_tables).
    fn drop_database_tables(&self) -> Result<(), Error> {
        let conn = self.pool.get()?;

        for table in ["users", "torrents", "snatches", "whitelist", "bans"] {
            conn.execute(&format!("DROP TABLE IF EXISTS {table};"), [])?;
        }

        Ok(())
    }

    /// Refer to [`databases::Database::load_users`](crate::core::databases::Database::load_users).
    fn load_users(&self) -> Result<Vec<User>, Error> {
        let conn = self.pool.get()?;

        let mut stmt = conn.prepare(SELECT_USER)?;
        let users = stmt
            .query_map([], |row| user_from_row(row))?
            .filter_map(std::result::Result::ok)
            .collect();

        Ok(users)
    }

    /// Refer to [`databases::Database::load_whitelist`](crate::core::databases::Database::load_whitelist).
    fn load_whitelist(&self) -> Result<Vec<WhitelistEntry>, Error> {
        let conn = self.pool.get()?;

        let mut stmt = conn.prepare("SELECT prefix, name FROM whitelist")?;
        let entries = stmt
            .query_map([], |row| {
                Ok(WhitelistEntry {
                    prefix: row.get(0)?,
                    name: row.get(1)?,
                })
            })?
            .filter_map(std::result::Result::ok)
            .collect();

        Ok(entries)
    }

    /// Refer to [`databases::Database::load_bans`](crate::core::databases::Database::load_bans).
    fn load_bans(&self) -> Result<Vec<Ban>, Error> {
        let conn = self.pool.get()?;

        let mut stmt = conn.prepare("SELECT id, ip, reason, expires_at FROM bans")?;
        let bans = stmt
            .query_map([], |row| {
                let expires_at: Option<i64> = row.get(3)?;
                Ok(Ban {
                    id: row.get(0)?,
                    ip: row.get(1)?,
                    reason: row.get(2)?,
                    expires_at: expires_at.map(|secs| Duration::from_secs(from_i64(secs))),
                })
            })?
            .filter_map(std::result::Result::ok)
            .collect();

        Ok(bans)
    }

    /// Refer to [`databases::Database::get_torrent_by_info_hash`](crate::core::databases::Database::get_torrent_by_info_hash).
    fn get_torrent_by_info_hash(&self, info_hash: &InfoHash) -> Result<Option<Torrent>, Error> {
        let conn = self.pool.get()?;

        let mut stmt = conn.prepare(&format!("{SELECT_TORRENT} WHERE info_hash = ?1"))?;
        let mut rows = stmt.query([info_hash.to_hex_string()])?;

        match rows.next()? {
            Some(row) => Ok(Some(torrent_from_row(row)?)),
            None => Ok(None),
        }
    }

    /// Refer to [`databases::Database::get_or_insert_torrent`](crate::core::databases::Database::get_or_insert_torrent).
    fn get_or_insert_torrent(&self, info_hash: &InfoHash) -> Result<Torrent, Error> {
        if let Some(torrent) = self.get_torrent_by_info_hash(info_hash)? {
            return Ok(torrent);
        }

        let conn = self.pool.get()?;

        let inserted = conn.execute("INSERT INTO torrents (info_hash) VALUES (?1)", [info_hash.to_hex_string()]);

        match inserted {
            Ok(_) => {}
            // Unique-constraint race with a concurrent caller: the winner's
            // row is fetched below.
            Err(err) if is_unique_violation(&err) => {}
            Err(err) => return Err(err.into()),
        }

        self.get_torrent_by_info_hash(info_hash)?.ok_or(Error::InsertFailed {
            location: Location::caller(),
        })
    }

    /// Refer to [`databases::Database::sync_torrent_stats`](crate::core::databases::Database::sync_torrent_stats).
    fn sync_torrent_stats(&self, torrent_id: TorrentId, seeders: u32, leechers: u32, completed_delta: u32) -> Result<(), Error> {
        let conn = self.pool.get()?;

        conn.execute(
            "UPDATE torrents SET seeders = ?2, leechers = ?3, completed = completed + ?4 WHERE id = ?1",
            params![torrent_id, seeders, leechers, completed_delta],
        )?;

        Ok(())
    }

    /// Refer to [`databases::Database::get_user`](crate::core::databases::Database::get_user).
    fn get_user(&self, user_id: UserId) -> Result<Option<User>, Error> {
        let conn = self.pool.get()?;

        let mut stmt = conn.prepare(&format!("{SELECT_USER} WHERE id = ?1"))?;
        let mut rows = stmt.query([user_id])?;

        match rows.next()? {
            Some(row) => Ok(Some(user_from_row(row)?)),
            None => Ok(None),
        }
    }

    /// Refer to [`databases::Database::increment_user_transfer`](crate::core::databases::Database::increment_user_transfer).
    fn increment_user_transfer(&self, user_id: UserId, uploaded: u64, downloaded: u64) -> Result<(), Error> {
        let conn = self.pool.get()?;

        conn.execute(
            "UPDATE users SET uploaded = uploaded + ?2, downloaded = downloaded + ?3 WHERE id = ?1",
            params![user_id, to_i64(uploaded), to_i64(downloaded)],
        )?;

        Ok(())
    }

    /// Refer to [`databases::Database::add_bonus_points`](crate::core::databases::Database::add_bonus_points).
    fn add_bonus_points(&self, user_id: UserId, points: f64) -> Result<(), Error> {
        let conn = self.pool.get()?;

        conn.execute(
            "UPDATE users SET bonus_points = bonus_points + ?2 WHERE id = ?1",
            params![user_id, points],
        )?;

        Ok(())
    }

    /// Refer to [`databases::Database::redeem_bonus_points`](crate::core::databases::Database::redeem_bonus_points).
    fn redeem_bonus_points(&self, user_id: UserId, points: f64, upload_credit: u64) -> Result<RedeemOutcome, Error> {
        let conn = self.pool.get()?;

        let updated = conn.execute(
            "UPDATE users SET bonus_points = bonus_points - ?2, uploaded = uploaded + ?3 \
             WHERE id = ?1 AND bonus_points >= ?2",
            params![user_id, points, to_i64(upload_credit)],
        )?;

        if updated == 1 {
            return Ok(RedeemOutcome::Redeemed);
        }

        match self.get_user(user_id)? {
            Some(_) => Ok(RedeemOutcome::InsufficientPoints),
            None => Ok(RedeemOutcome::UserNotFound),
        }
    }

    /// Refer to [`databases::Database::upsert_snatch`](crate::core::databases::Database::upsert_snatch).
    fn upsert_snatch(&self, user_id: UserId, torrent_id: TorrentId, completed_at: DurationSinceUnixEpoch) -> Result<(), Error> {
        let conn = self.pool.get()?;

        conn.execute(
            "INSERT INTO snatches (user_id, torrent_id, completed_at, last_announce_at) VALUES (?1, ?2, ?3, ?3) \
             ON CONFLICT (user_id, torrent_id) DO UPDATE SET last_announce_at = ?3",
            params![user_id, torrent_id, to_secs(completed_at)],
        )?;

        Ok(())
    }

    /// Refer to [`databases::Database::record_seedtime`](crate::core::databases::Database::record_seedtime).
    fn record_seedtime(
        &self,
        user_id: UserId,
        torrent_id: TorrentId,
        seedtime_delta: u64,
        last_announce_at: DurationSinceUnixEpoch,
    ) -> Result<(), Error> {
        let conn = self.pool.get()?;

        conn.execute(
            "UPDATE snatches SET seedtime = seedtime + ?3, last_announce_at = ?4 \
             WHERE user_id = ?1 AND torrent_id = ?2",
            params![user_id, torrent_id, to_i64(seedtime_delta), to_secs(last_announce_at)],
        )?;

        Ok(())
    }

    /// Refer to [`databases::Database::find_hnr_candidates`](crate::core::databases::Database::find_hnr_candidates).
    fn find_hnr_candidates(&self, completed_before: DurationSinceUnixEpoch, min_seedtime: u64) -> Result<Vec<Snatch>, Error> {
        let conn = self.pool.get()?;

        let mut stmt = conn.prepare(
            "SELECT user_id, torrent_id, completed_at, seedtime, last_announce_at, hnr FROM snatches \
             WHERE completed_at < ?1 AND seedtime < ?2 AND hnr = 0",
        )?;

        let snatches = stmt
            .query_map(params![to_secs(completed_before), to_i64(min_seedtime)], |row| {
                Ok(Snatch {
                    user_id: row.get(0)?,
                    torrent_id: row.get(1)?,
                    completed_at: Duration::from_secs(from_i64(row.get(2)?)),
                    seedtime: from_i64(row.get(3)?),
                    last_announce_at: Duration::from_secs(from_i64(row.get(4)?)),
                    hnr: row.get(5)?,
                })
            })?
            .filter_map(std::result::Result::ok)
            .collect();

        Ok(snatches)
    }

    /// Refer to [`databases::Database::mark_snatch_hnr`](crate::core::databases::Database::mark_snatch_hnr).
    fn mark_snatch_hnr(&self, user_id: UserId, torrent_id: TorrentId) -> Result<(), Error> {
        let conn = self.pool.get()?;

        conn.execute(
            "UPDATE snatches SET hnr = 1 WHERE user_id = ?1 AND torrent_id = ?2",
            params![user_id, torrent_id],
        )?;

        Ok(())
    }

    /// Refer to [`databases::Database::increment_hnr_warnings`](crate::core::databases::Database::increment_hnr_warnings).
    fn increment_hnr_warnings(&self, user_id: UserId, by: u32) -> Result<u32, Error> {
        let conn = self.pool.get()?;

        let updated = conn.execute(
            "UPDATE users SET hnr_warnings = hnr_warnings + ?2 WHERE id = ?1",
            params![user_id, by],
        )?;

        if updated == 0 {
            return Err(Error::RecordNotFound {
                message: format!("user {user_id}"),
            });
        }

        let warnings = conn.query_row("SELECT hnr_warnings FROM users WHERE id = ?1", [user_id], |row| row.get(0))?;

        Ok(warnings)
    }

    /// Refer to [`databases::Database::set_can_leech`](crate::core::databases::Database::set_can_leech).
    fn set_can_leech(&self, user_id: UserId, can_leech: bool) -> Result<(), Error> {
        let conn = self.pool.get()?;

        conn.execute("UPDATE users SET can_leech = ?2 WHERE id = ?1", params![user_id, can_leech])?;

        Ok(())
    }

    /// Refer to [`databases::Database::clear_hnr_warnings`](crate::core::databases::Database::clear_hnr_warnings).
    fn clear_hnr_warnings(&self, user_id: UserId) -> Result<(), Error> {
        let conn = self.pool.get()?;

        conn.execute("UPDATE users SET hnr_warnings = 0, can_leech = 1 WHERE id = ?1", [user_id])?;

        Ok(())
    }

    /// Refer to [`databases::Database::add_ban`](crate::core::databases::Database::add_ban).
    fn add_ban(&self, ip: &str, reason: &str, expires_at: Option<DurationSinceUnixEpoch>) -> Result<Ban, Error> {
        let conn = self.pool.get()?;

        let inserted = conn.execute(
            "INSERT INTO bans (ip, reason, expires_at) VALUES (?1, ?2, ?3)",
            params![ip, reason, expires_at.map(to_secs)],
        );

        match inserted {
            Ok(_) => {}
            Err(err) if is_unique_violation(&err) => {
                return Err(Error::RecordAlreadyExists {
                    message: format!("ban for {ip}"),
                })
            }
            Err(err) => return Err(err.into()),
        }

        let id = conn.last_insert_rowid();

        Ok(Ban {
            id,
            ip: ip.to_string(),
            reason: reason.to_string(),
            expires_at,
        })
    }

    /// Refer to [`databases::Database::remove_ban`](crate::core::databases::Database::remove_ban).
    fn remove_ban(&self, ip: &str) -> Result<(), Error> {
        let conn = self.pool.get()?;

        let deleted = conn.execute("DELETE FROM bans WHERE ip = ?1", [ip])?;

        if deleted == 0 {
            return Err(Error::RecordNotFound {
                message: format!("ban for {ip}"),
            });
        }

        Ok(())
    }

    /// Refer to [`databases::Database::cleanup_expired_bans`](crate::core::databases::Database::cleanup_expired_bans).
    fn cleanup_expired_bans(&self, now: DurationSinceUnixEpoch) -> Result<usize, Error> {
        let conn = self.pool.get()?;

        let deleted = conn.execute(
            "DELETE FROM bans WHERE expires_at IS NOT NULL AND expires_at <= ?1",
            [to_secs(now)],
        )?;

        Ok(deleted)
    }

    /// Refer to [`databases::Database::add_whitelist_entry`](crate::core::databases::Database::add_whitelist_entry).
    fn add_whitelist_entry(&self, entry: &WhitelistEntry) -> Result<(), Error> {
        let conn = self.pool.get()?;

        let inserted = conn.execute(
            "INSERT INTO whitelist (prefix, name) VALUES (?1, ?2)",
            params![entry.prefix, entry.name],
        );

        match inserted {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => Err(Error::RecordAlreadyExists {
                message: format!("whitelist prefix {:?}", entry.prefix),
            }),
            Err(err) => Err(err.into()),
        }
    }

    /// Refer to [`databases::Database::remove_whitelist_entry`](crate::core::databases::Database::remove_whitelist_entry).
    fn remove_whitelist_entry(&self, prefix: &[u8]) -> Result<(), Error> {
        let conn = self.pool.get()?;

        let deleted = conn.execute("DELETE FROM whitelist WHERE prefix = ?1", [prefix])?;

        if deleted == 0 {
            return Err(Error::RecordNotFound {
                message: format!("whitelist prefix {prefix:?}"),
            });
        }

        Ok(())
    }

    /// Refer to [`databases::Database::update_torrent_settings`](crate::core::databases::Database::update_torrent_settings).
    fn update_torrent_settings(&self, torrent_id: TorrentId, settings: &TorrentSettings) -> Result<(), Error> {
        let conn = self.pool.get()?;

        conn.execute(
            "UPDATE torrents SET freeleech = ?2, freeleech_until = ?3, upload_multiplier = ?4, download_multiplier = ?5 \
             WHERE id = ?1",
            params![
                torrent_id,
                settings.freeleech,
                settings.freeleech_until.map(to_secs),
                settings.upload_multiplier,
                settings.download_multiplier
            ],
        )?;

        Ok(())
    }
}

impl Sqlite {
    /// A single-connection in-memory database. Used by tests.
    #[cfg(test)]
    pub(crate) fn new_in_memory() -> Self {
        let cm = SqliteConnectionManager::memory();
        let pool = Pool::builder().max_size(1).build(cm).expect("in-memory pool");
        Self { pool }
    }

    /// Raw connection for test fixtures that insert rows the tracker itself
    /// never creates (users are owned by the admin surface).
    #[cfg(test)]
    pub(crate) fn connection_for_tests(&self) -> r2d2::PooledConnection<SqliteConnectionManager> {
        self.pool.get().expect("test connection")
    }
}
