//! Tracker configuration.
//!
//! The configuration is loaded from a TOML file (default `./margay.toml`) with
//! environment variable overrides (prefix `MARGAY_`). Every option has a
//! default so a partial file, or no file at all, produces a working tracker.
//!
//! Sections:
//!
//! - `[core]`: announce policy, ratio policy, swarm timings.
//! - `[http_tracker]` / `[udp_tracker]`: listeners.
//! - `[database]`: durable store.
//! - `[peer_storage]`: swarm peer store backend (`memory` or `redis`).
//! - `[rate_limiting]`: per-IP, per-request-class sliding windows.
//! - `[hnr]`: hit-and-run detection (optional, absent = disabled).
//! - `[bonus_points]`: seeding rewards (optional, absent = disabled).
//! - `[peer_verification]`: peer reachability probes.
//! - `[admin]`: gating for the external admin surface.
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Prefix for environment variable overrides, e.g.
/// `MARGAY_HTTP_TRACKER__HTTP_PORT=7070`.
const ENV_VAR_PREFIX: &str = "MARGAY_";

/// Core policy knobs for announce handling and the swarm engine.
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct Core {
    /// Base `interval` (seconds) returned to announcing peers.
    #[serde(default = "Core::default_announce_interval")]
    pub announce_interval: u32,

    /// Jitter fraction applied to the announce interval, in `[0.0, 1.0]`.
    /// `0.0` disables jitter.
    #[serde(default = "Core::default_announce_jitter")]
    pub announce_jitter: f64,

    /// Global minimum share ratio required to leech. Used when the user has no
    /// per-user override.
    #[serde(default = "Core::default_min_ratio")]
    pub min_ratio: f64,

    /// Users with less than this many bytes downloaded bypass the ratio check.
    #[serde(default = "Core::default_ratio_grace_bytes")]
    pub ratio_grace_bytes: u64,

    /// If true, announces for unknown torrents are rejected instead of the
    /// torrent being auto-registered.
    #[serde(default)]
    pub enforce_torrent_whitelist: bool,

    /// If true, seeders sort before other peers in announce responses sent to
    /// leechers.
    #[serde(default = "Core::default_prefer_seeders")]
    pub prefer_seeders: bool,

    /// Maximum time in seconds that a peer can be inactive before being
    /// removed from the swarm.
    #[serde(default = "Core::default_max_peer_timeout")]
    pub max_peer_timeout: u64,

    /// How often (seconds) each swarm removes inactive peers.
    #[serde(default = "Core::default_peer_cleanup_interval")]
    pub peer_cleanup_interval: u64,

    /// How often (seconds) each swarm checks whether it is empty and can shut
    /// itself down.
    #[serde(default = "Core::default_idle_check_interval")]
    pub idle_check_interval: u64,

    /// How often (seconds) each swarm syncs its counters to the database.
    #[serde(default = "Core::default_torrent_sync_interval")]
    pub torrent_sync_interval: u64,

    /// How often (seconds) the stats collector flushes buffered user and
    /// torrent deltas to the database.
    #[serde(default = "Core::default_stats_flush_interval")]
    pub stats_flush_interval: u64,
}

impl Default for Core {
    fn default() -> Self {
        Self {
            announce_interval: Self::default_announce_interval(),
            announce_jitter: Self::default_announce_jitter(),
            min_ratio: Self::default_min_ratio(),
            ratio_grace_bytes: Self::default_ratio_grace_bytes(),
            enforce_torrent_whitelist: false,
            prefer_seeders: Self::default_prefer_seeders(),
            max_peer_timeout: Self::default_max_peer_timeout(),
            peer_cleanup_interval: Self::default_peer_cleanup_interval(),
            idle_check_interval: Self::default_idle_check_interval(),
            torrent_sync_interval: Self::default_torrent_sync_interval(),
            stats_flush_interval: Self::default_stats_flush_interval(),
        }
    }
}

impl Core {
    fn default_announce_interval() -> u32 {
        1800
    }
    fn default_announce_jitter() -> f64 {
        0.1
    }
    fn default_prefer_seeders() -> bool {
        true
    }
    fn default_min_ratio() -> f64 {
        0.3
    }
    fn default_ratio_grace_bytes() -> u64 {
        5_000_000_000
    }
    fn default_max_peer_timeout() -> u64 {
        3600
    }
    fn default_peer_cleanup_interval() -> u64 {
        300
    }
    fn default_idle_check_interval() -> u64 {
        3600
    }
    fn default_torrent_sync_interval() -> u64 {
        30
    }
    fn default_stats_flush_interval() -> u64 {
        10
    }
}

/// HTTP tracker listener configuration.
#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
pub struct HttpTracker {
    /// Plain HTTP listener port. `0` picks an ephemeral port.
    #[serde(default = "HttpTracker::default_http_port")]
    pub http_port: u16,

    /// The IP the listeners bind to.
    #[serde(default = "HttpTracker::default_bind_ip")]
    pub bind_ip: IpAddr,

    /// TLS listener port. Only used when the certificate and key paths are
    /// set.
    #[serde(default)]
    pub https_port: Option<u16>,

    /// If true the plain HTTP listener is not started.
    #[serde(default)]
    pub https_only: bool,

    #[serde(default)]
    pub ssl_cert_path: Option<String>,

    #[serde(default)]
    pub ssl_key_path: Option<String>,
}

impl Default for HttpTracker {
    fn default() -> Self {
        Self {
            http_port: Self::default_http_port(),
            bind_ip: Self::default_bind_ip(),
            https_port: None,
            https_only: false,
            ssl_cert_path: None,
            ssl_key_path: None,
        }
    }
}

impl HttpTracker {
    fn default_http_port() -> u16 {
        7070
    }
    fn default_bind_ip() -> IpAddr {
        IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED)
    }
}

/// UDP tracker listener configuration (BEP 15).
#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
pub struct UdpTracker {
    /// UDP listener port. `None` disables the UDP tracker.
    #[serde(default = "UdpTracker::default_udp_port")]
    pub udp_port: Option<u16>,

    /// The IP the UDP socket binds to.
    #[serde(default = "UdpTracker::default_bind_ip")]
    pub bind_ip: IpAddr,

    /// Seconds an issued connection id stays valid.
    #[serde(default = "UdpTracker::default_connection_timeout")]
    pub udp_connection_timeout: u64,
}

impl Default for UdpTracker {
    fn default() -> Self {
        Self {
            udp_port: Self::default_udp_port(),
            bind_ip: Self::default_bind_ip(),
            udp_connection_timeout: Self::default_connection_timeout(),
        }
    }
}

impl UdpTracker {
    fn default_udp_port() -> Option<u16> {
        Some(6969)
    }
    fn default_bind_ip() -> IpAddr {
        IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED)
    }
    fn default_connection_timeout() -> u64 {
        120
    }
}

/// Durable store configuration.
#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
pub struct Database {
    /// Path of the `SQLite` database file.
    #[serde(default = "Database::default_path")]
    pub path: String,
}

impl Default for Database {
    fn default() -> Self {
        Self {
            path: Self::default_path(),
        }
    }
}

impl Database {
    fn default_path() -> String {
        "./storage/margay.db".to_string()
    }
}

/// Which backend holds the volatile swarm peers.
#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone, Copy, Default)]
#[serde(rename_all = "lowercase")]
pub enum PeerStorageDriver {
    #[default]
    Memory,
    Redis,
}

/// Swarm peer storage backend configuration.
#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone, Default)]
pub struct PeerStorage {
    #[serde(default)]
    pub driver: PeerStorageDriver,

    /// Redis connection URL, required when `driver = "redis"`.
    #[serde(default)]
    pub redis_url: Option<String>,
}

/// The request budget for one class within the fixed 60 second window.
#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone, Copy)]
pub struct RateLimit {
    pub max_requests: u32,
}

/// Rate limiting configuration. The window is a fixed 60 seconds.
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct RateLimiting {
    #[serde(default = "RateLimiting::default_enabled")]
    pub enabled: bool,

    /// IPs that bypass rate limiting entirely.
    #[serde(default)]
    pub whitelist: Vec<IpAddr>,

    #[serde(default = "RateLimiting::default_announce")]
    pub announce: RateLimit,

    #[serde(default = "RateLimiting::default_scrape")]
    pub scrape: RateLimit,

    #[serde(default = "RateLimiting::default_admin_api")]
    pub admin_api: RateLimit,
}

impl Default for RateLimiting {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            whitelist: Vec::new(),
            announce: Self::default_announce(),
            scrape: Self::default_scrape(),
            admin_api: Self::default_admin_api(),
        }
    }
}

impl RateLimiting {
    fn default_enabled() -> bool {
        true
    }
    fn default_announce() -> RateLimit {
        RateLimit { max_requests: 60 }
    }
    fn default_scrape() -> RateLimit {
        RateLimit { max_requests: 30 }
    }
    fn default_admin_api() -> RateLimit {
        RateLimit { max_requests: 120 }
    }
}

/// Hit-and-run detection parameters. The section being present enables the
/// detector.
#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
pub struct HitAndRun {
    /// Seconds of seedtime a snatch must accumulate to not be a hit-and-run.
    #[serde(default = "HitAndRun::default_min_seedtime")]
    pub min_seedtime: u64,

    /// Days after completion before a snatch is judged.
    #[serde(default = "HitAndRun::default_grace_period_days")]
    pub grace_period_days: u32,

    /// Number of warnings after which leeching is disabled.
    #[serde(default = "HitAndRun::default_max_warnings")]
    pub max_warnings: u32,
}

impl Default for HitAndRun {
    fn default() -> Self {
        Self {
            min_seedtime: Self::default_min_seedtime(),
            grace_period_days: Self::default_grace_period_days(),
            max_warnings: Self::default_max_warnings(),
        }
    }
}

impl HitAndRun {
    fn default_min_seedtime() -> u64 {
        172_800 // 48 hours
    }
    fn default_grace_period_days() -> u32 {
        14
    }
    fn default_max_warnings() -> u32 {
        3
    }
}

/// Bonus point economy parameters. The section being present enables the
/// hourly calculator.
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct BonusPoints {
    /// Base points per seeder per pass, before the rarity weight.
    #[serde(default = "BonusPoints::default_base_points")]
    pub base_points: f64,

    /// Bytes of upload credit one point converts into on redemption.
    #[serde(default = "BonusPoints::default_conversion_rate")]
    pub conversion_rate: u64,
}

impl Default for BonusPoints {
    fn default() -> Self {
        Self {
            base_points: Self::default_base_points(),
            conversion_rate: Self::default_conversion_rate(),
        }
    }
}

impl BonusPoints {
    fn default_base_points() -> f64 {
        1.0
    }
    fn default_conversion_rate() -> u64 {
        1_000_000 // 1 MB per point
    }
}

/// Peer reachability verifier configuration.
#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
pub struct PeerVerification {
    #[serde(default = "PeerVerification::default_enabled")]
    pub enabled: bool,

    /// TCP connect timeout in seconds.
    #[serde(default = "PeerVerification::default_connect_timeout")]
    pub connect_timeout: u64,

    /// Seconds a verification result stays cached.
    #[serde(default = "PeerVerification::default_cache_ttl")]
    pub cache_ttl: u64,

    /// Maximum number of concurrent TCP dials.
    #[serde(default = "PeerVerification::default_max_concurrent")]
    pub max_concurrent: usize,
}

impl Default for PeerVerification {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            connect_timeout: Self::default_connect_timeout(),
            cache_ttl: Self::default_cache_ttl(),
            max_concurrent: Self::default_max_concurrent(),
        }
    }
}

impl PeerVerification {
    fn default_enabled() -> bool {
        true
    }
    fn default_connect_timeout() -> u64 {
        3
    }
    fn default_cache_ttl() -> u64 {
        3600
    }
    fn default_max_concurrent() -> usize {
        50
    }
}

/// Gating for the external admin surface. The core only recognizes these
/// options; the REST endpoints live outside this crate.
#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone, Default)]
pub struct Admin {
    /// Token expected in the `X-Admin-Token` header. `None` disables the
    /// admin surface.
    #[serde(default)]
    pub admin_token: Option<String>,

    #[serde(default)]
    pub cors_origins: Vec<String>,

    #[serde(default)]
    pub admin_api_ip_whitelist: Vec<IpAddr>,
}

/// The whole tracker configuration.
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct Configuration {
    /// Logging threshold: `off`, `error`, `warn`, `info`, `debug` or `trace`.
    #[serde(default = "Configuration::default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub core: Core,

    #[serde(default)]
    pub http_tracker: HttpTracker,

    #[serde(default)]
    pub udp_tracker: UdpTracker,

    #[serde(default)]
    pub database: Database,

    #[serde(default)]
    pub peer_storage: PeerStorage,

    #[serde(default)]
    pub rate_limiting: RateLimiting,

    /// Absent = hit-and-run detection disabled.
    #[serde(default)]
    pub hnr: Option<HitAndRun>,

    /// Absent = bonus points disabled.
    #[serde(default)]
    pub bonus_points: Option<BonusPoints>,

    #[serde(default)]
    pub peer_verification: PeerVerification,

    #[serde(default)]
    pub admin: Admin,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
            core: Core::default(),
            http_tracker: HttpTracker::default(),
            udp_tracker: UdpTracker::default(),
            database: Database::default(),
            peer_storage: PeerStorage::default(),
            rate_limiting: RateLimiting::default(),
            hnr: None,
            bonus_points: None,
            peer_verification: PeerVerification::default(),
            admin: Admin::default(),
        }
    }
}

/// This error can be returned when loading or validating the configuration.
#[derive(Error, Debug)]
pub enum Error {
    #[error("unable to load configuration: {source}")]
    Load {
        #[from]
        source: Box<figment::Error>,
    },
    #[error("invalid configuration: {reason}")]
    Invalid { reason: String },
}

impl Configuration {
    fn default_log_level() -> String {
        "info".to_string()
    }

    /// Loads the configuration from an optional TOML file plus `MARGAY_*`
    /// environment variable overrides.
    ///
    /// # Errors
    ///
    /// Will return an [`enum@Error`] if the file cannot be parsed or the merged
    /// configuration fails validation.
    pub fn load(config_path: &str) -> Result<Configuration, Error> {
        let mut figment = Figment::from(Serialized::defaults(Configuration::default()));

        if Path::new(config_path).exists() {
            figment = figment.merge(Toml::file(config_path));
        }

        let config: Configuration = figment
            .merge(Env::prefixed(ENV_VAR_PREFIX).split("__"))
            .extract()
            .map_err(Box::new)?;

        config.validate()?;

        Ok(config)
    }

    /// Loads the configuration from a TOML string. Used by tests.
    ///
    /// # Errors
    ///
    /// Will return an [`enum@Error`] if the string cannot be parsed or fails
    /// validation.
    pub fn load_from_str(toml: &str) -> Result<Configuration, Error> {
        let config: Configuration = Figment::from(Serialized::defaults(Configuration::default()))
            .merge(Toml::string(toml))
            .extract()
            .map_err(Box::new)?;

        config.validate()?;

        Ok(config)
    }

    fn validate(&self) -> Result<(), Error> {
        if !(0.0..=1.0).contains(&self.core.announce_jitter) {
            return Err(Error::Invalid {
                reason: format!("announce_jitter must be within [0.0, 1.0], got {}", self.core.announce_jitter),
            });
        }

        if self.core.min_ratio < 0.0 {
            return Err(Error::Invalid {
                reason: format!("min_ratio must be non-negative, got {}", self.core.min_ratio),
            });
        }

        if self.core.announce_interval == 0 {
            return Err(Error::Invalid {
                reason: "announce_interval must be greater than zero".to_string(),
            });
        }

        if self.http_tracker.https_only && self.http_tracker.https_port.is_none() {
            return Err(Error::Invalid {
                reason: "https_only requires https_port".to_string(),
            });
        }

        if matches!(self.peer_storage.driver, PeerStorageDriver::Redis) && self.peer_storage.redis_url.is_none() {
            return Err(Error::Invalid {
                reason: "peer_storage.driver = \"redis\" requires peer_storage.redis_url".to_string(),
            });
        }

        Ok(())
    }

    #[must_use]
    pub fn announce_interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.core.announce_interval))
    }
}

#[cfg(test)]
mod tests {
    use super::{Configuration, PeerStorageDriver};

    #[test]
    fn configuration_should_have_working_defaults() {
        let configuration = Configuration::load_from_str("").unwrap();

        assert_eq!(configuration, Configuration::default());
        assert_eq!(configuration.core.announce_interval, 1800);
        assert_eq!(configuration.udp_tracker.udp_port, Some(6969));
        assert!(configuration.hnr.is_none());
        assert!(configuration.bonus_points.is_none());
    }

    #[test]
    fn configuration_should_be_loaded_from_a_toml_string() {
        let configuration = Configuration::load_from_str(
            r#"
            log_level = "debug"

            [core]
            announce_interval = 900
            min_ratio = 0.5

            [hnr]
            min_seedtime = 3600
            grace_period_days = 7
            max_warnings = 2

            [peer_storage]
            driver = "redis"
            redis_url = "redis://127.0.0.1/"
            "#,
        )
        .unwrap();

        assert_eq!(configuration.core.announce_interval, 900);
        assert_eq!(configuration.hnr.unwrap().grace_period_days, 7);
        assert_eq!(configuration.peer_storage.driver, PeerStorageDriver::Redis);
    }

    #[test]
    fn configuration_should_reject_an_out_of_range_jitter() {
        let result = Configuration::load_from_str(
            r#"
            [core]
            announce_jitter = 1.5
            "#,
        );

        assert!(result.is_err());
    }

    #[test]
    fn configuration_should_reject_a_redis_backend_without_url() {
        let result = Configuration::load_from_str(
            r#"
            [peer_storage]
            driver = "redis"
            "#,
        );

        assert!(result.is_err());
    }

    #[test]
    fn configuration_should_reject_https_only_without_https_port() {
        let result = Configuration::load_from_str(
            r#"
            [http_tracker]
            https_only = true
            "#,
        );

        assert!(result.is_err());
    }
}
