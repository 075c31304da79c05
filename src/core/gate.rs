//! The gate cache: the in-memory reflection of the durable state every
//! request is checked against before it reaches a swarm.
//!
//! It owns three tables with the same contract: loaded from the database at
//! startup, mutated by admin commands that also update the database, and
//! queried read-mostly by every announce and scrape:
//!
//! - The **passkey table**: passkey to user. The per-user transfer counters
//!   are cached here too so the leech-eligibility check (ratio) never touches
//!   the database on the request path.
//! - The **client whitelist**: accepted peer-id prefixes. Only the first
//!   three bytes of the announced peer id are checked, even though prefixes of
//!   up to eight bytes can be registered.
//! - The **ban list**: exact IPs and CIDR ranges, with optional expiry.
//!
//! Hot-path queries are non-blocking: the passkey table is a sharded
//! [`DashMap`] and user counters are atomics shared with the stats collector;
//! the whitelist and ban tables are behind read-mostly `RwLock`s that are only
//! write-locked by admin commands and reloads.
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use thiserror::Error;

use crate::core::auth::Passkey;
use crate::core::models::{Ban, User, WhitelistEntry};
use crate::core::UserId;
use crate::shared::clock::DurationSinceUnixEpoch;

/// How many leading bytes of the peer id the whitelist check examines.
pub const CLIENT_PREFIX_LENGTH: usize = 3;

/// A cached user. The counters are shared atomics: the stats collector bumps
/// them when it flushes so the ratio gate tracks the durable store without
/// re-reading it.
#[derive(Debug)]
pub struct UserEntry {
    pub id: UserId,
    pub required_ratio: f64,
    uploaded: AtomicU64,
    downloaded: AtomicU64,
    can_leech: AtomicBool,
}

impl UserEntry {
    #[must_use]
    pub fn uploaded(&self) -> u64 {
        self.uploaded.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn downloaded(&self) -> u64 {
        self.downloaded.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn can_leech(&self) -> bool {
        self.can_leech.load(Ordering::Relaxed)
    }

    pub fn add_transfer(&self, uploaded: u64, downloaded: u64) {
        self.uploaded.fetch_add(uploaded, Ordering::Relaxed);
        self.downloaded.fetch_add(downloaded, Ordering::Relaxed);
    }

    pub fn set_can_leech(&self, can_leech: bool) {
        self.can_leech.store(can_leech, Ordering::Relaxed);
    }
}

impl From<&User> for UserEntry {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            required_ratio: user.required_ratio,
            uploaded: AtomicU64::new(user.uploaded),
            downloaded: AtomicU64::new(user.downloaded),
            can_leech: AtomicBool::new(user.can_leech),
        }
    }
}

/// One parsed ban rule: an exact address or a CIDR range.
#[derive(Debug, Clone, PartialEq, Eq)]
enum BanMatcher {
    Exact(IpAddr),
    Cidr { network: IpAddr, prefix: u8 },
}

impl BanMatcher {
    fn matches(&self, addr: IpAddr) -> bool {
        match self {
            BanMatcher::Exact(banned) => *banned == addr,
            BanMatcher::Cidr { network, prefix } => cidr_contains(*network, *prefix, addr),
        }
    }
}

fn cidr_contains(network: IpAddr, prefix: u8, addr: IpAddr) -> bool {
    match (network, addr) {
        (IpAddr::V4(network), IpAddr::V4(addr)) => {
            let mask = if prefix == 0 { 0 } else { u32::MAX << (32 - u32::from(prefix)) };
            u32::from(network) & mask == u32::from(addr) & mask
        }
        (IpAddr::V6(network), IpAddr::V6(addr)) => {
            let mask = if prefix == 0 { 0 } else { u128::MAX << (128 - u32::from(prefix)) };
            u128::from(network) & mask == u128::from(addr) & mask
        }
        _ => false,
    }
}

#[derive(Debug, Clone)]
struct BanRule {
    matcher: BanMatcher,
    reason: String,
    expires_at: Option<DurationSinceUnixEpoch>,
}

impl BanRule {
    fn applies(&self, addr: IpAddr, now: DurationSinceUnixEpoch) -> bool {
        let unexpired = self.expires_at.map_or(true, |expires_at| now < expires_at);
        unexpired && self.matcher.matches(addr)
    }
}

/// This error can be returned when parsing a ban IP string.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseBanError {
    #[error("invalid IP address: {raw}")]
    InvalidAddress { raw: String },
    #[error("invalid CIDR prefix length: {raw}")]
    InvalidPrefix { raw: String },
}

/// It parses a ban string: either a bare IP or `address/prefix`.
///
/// # Errors
///
/// Will return a [`ParseBanError`] if the address or the mask is malformed.
fn parse_ban_matcher(raw: &str) -> Result<BanMatcher, ParseBanError> {
    match raw.split_once('/') {
        None => {
            let addr = raw.parse::<IpAddr>().map_err(|_| ParseBanError::InvalidAddress { raw: raw.to_string() })?;
            Ok(BanMatcher::Exact(addr))
        }
        Some((address, mask)) => {
            let network = address
                .parse::<IpAddr>()
                .map_err(|_| ParseBanError::InvalidAddress { raw: raw.to_string() })?;

            let prefix = mask.parse::<u8>().map_err(|_| ParseBanError::InvalidPrefix { raw: raw.to_string() })?;

            let max_prefix = match network {
                IpAddr::V4(_) => 32,
                IpAddr::V6(_) => 128,
            };
            if prefix > max_prefix {
                return Err(ParseBanError::InvalidPrefix { raw: raw.to_string() });
            }

            Ok(BanMatcher::Cidr { network, prefix })
        }
    }
}

/// Why the gate rejected a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Banned {
    pub reason: String,
}

/// The gate cache. See the [module documentation](crate::core::gate).
#[derive(Default)]
pub struct GateCache {
    passkeys: DashMap<Passkey, Arc<UserEntry>>,
    users_by_id: DashMap<UserId, Arc<UserEntry>>,
    whitelist: RwLock<HashSet<Vec<u8>>>,
    bans: RwLock<Vec<BanRule>>,
}

impl GateCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // Passkey table

    /// It replaces the whole passkey table. O(n) rebuild.
    pub fn load_users(&self, users: &[User]) {
        self.passkeys.clear();
        self.users_by_id.clear();

        for user in users {
            let entry = Arc::new(UserEntry::from(user));
            self.users_by_id.insert(user.id, entry.clone());
            self.passkeys.insert(user.passkey.clone(), entry);
        }
    }

    /// It returns the cached user for a passkey.
    #[must_use]
    pub fn user_by_passkey(&self, passkey: &Passkey) -> Option<Arc<UserEntry>> {
        self.passkeys.get(passkey).map(|entry| entry.value().clone())
    }

    #[must_use]
    pub fn user_by_id(&self, user_id: UserId) -> Option<Arc<UserEntry>> {
        self.users_by_id.get(&user_id).map(|entry| entry.value().clone())
    }

    /// It upserts a single user, keeping both indexes in step.
    pub fn upsert_user(&self, user: &User) {
        let entry = Arc::new(UserEntry::from(user));
        self.users_by_id.insert(user.id, entry.clone());
        self.passkeys.insert(user.passkey.clone(), entry);
    }

    // Client whitelist

    /// It replaces the whole whitelist. O(n) rebuild.
    pub fn load_whitelist(&self, entries: &[WhitelistEntry]) {
        let mut whitelist = self.whitelist.write().expect("whitelist lock poisoned");
        whitelist.clear();
        for entry in entries {
            whitelist.insert(entry.prefix.clone());
        }
    }

    pub fn add_whitelist_prefix(&self, prefix: &[u8]) {
        self.whitelist
            .write()
            .expect("whitelist lock poisoned")
            .insert(prefix.to_vec());
    }

    pub fn remove_whitelist_prefix(&self, prefix: &[u8]) {
        self.whitelist.write().expect("whitelist lock poisoned").remove(prefix);
    }

    /// A client is valid iff the first [`CLIENT_PREFIX_LENGTH`] bytes of its
    /// peer id are a registered prefix.
    ///
    /// An empty whitelist accepts every client: a freshly installed tracker
    /// should not reject all traffic.
    #[must_use]
    pub fn is_client_whitelisted(&self, peer_id_prefix: &[u8]) -> bool {
        let whitelist = self.whitelist.read().expect("whitelist lock poisoned");
        whitelist.is_empty() || whitelist.contains(&peer_id_prefix[..CLIENT_PREFIX_LENGTH.min(peer_id_prefix.len())])
    }

    // Ban list

    /// It replaces the whole ban table. Unparseable rows are skipped: a bad
    /// admin row must not take announces down. O(n) rebuild.
    pub fn load_bans(&self, bans: &[Ban]) {
        let mut rules = Vec::with_capacity(bans.len());

        for ban in bans {
            match parse_ban_matcher(&ban.ip) {
                Ok(matcher) => rules.push(BanRule {
                    matcher,
                    reason: ban.reason.clone(),
                    expires_at: ban.expires_at,
                }),
                Err(err) => {
                    tracing::warn!("skipping unparseable ban {:?}: {err}", ban.ip);
                }
            }
        }

        *self.bans.write().expect("ban lock poisoned") = rules;
    }

    /// It adds one parsed ban to the cache.
    ///
    /// # Errors
    ///
    /// Will return a [`ParseBanError`] if the IP string is malformed.
    pub fn add_ban(&self, ban: &Ban) -> Result<(), ParseBanError> {
        let rule = BanRule {
            matcher: parse_ban_matcher(&ban.ip)?,
            reason: ban.reason.clone(),
            expires_at: ban.expires_at,
        };

        self.bans.write().expect("ban lock poisoned").push(rule);
        Ok(())
    }

    /// It removes a ban by its original IP string.
    pub fn remove_ban(&self, ip: &str) {
        if let Ok(matcher) = parse_ban_matcher(ip) {
            self.bans.write().expect("ban lock poisoned").retain(|rule| rule.matcher != matcher);
        }
    }

    /// It drops expired rules from the cache. The admin cleanup action calls
    /// this together with the database delete.
    pub fn sweep_expired_bans(&self, now: DurationSinceUnixEpoch) -> usize {
        let mut bans = self.bans.write().expect("ban lock poisoned");
        let before = bans.len();
        bans.retain(|rule| rule.expires_at.map_or(true, |expires_at| now < expires_at));
        before - bans.len()
    }

    /// It returns `Some(Banned)` iff any unexpired rule matches the address,
    /// exactly or by CIDR containment.
    #[must_use]
    pub fn check_banned(&self, addr: IpAddr, now: DurationSinceUnixEpoch) -> Option<Banned> {
        let bans = self.bans.read().expect("ban lock poisoned");

        bans.iter().find(|rule| rule.applies(addr, now)).map(|rule| Banned {
            reason: rule.reason.clone(),
        })
    }

    #[must_use]
    pub fn user_count(&self) -> usize {
        self.passkeys.len()
    }

    #[must_use]
    pub fn ban_count(&self) -> usize {
        self.bans.read().expect("ban lock poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;
    use std::time::Duration;

    use super::GateCache;
    use crate::core::auth::Passkey;
    use crate::core::models::{Ban, User};

    fn sample_user(id: i64, passkey: &str) -> User {
        User {
            id,
            passkey: Passkey::from_str(passkey).unwrap(),
            uploaded: 0,
            downloaded: 0,
            hnr_warnings: 0,
            can_leech: true,
            required_ratio: 0.0,
            bonus_points: 0.0,
        }
    }

    fn ban(ip: &str, expires_at: Option<u64>) -> Ban {
        Ban {
            id: 0,
            ip: ip.to_string(),
            reason: format!("banned: {ip}"),
            expires_at: expires_at.map(Duration::from_secs),
        }
    }

    mod passkey_table {
        use std::str::FromStr;

        use super::{sample_user, GateCache};
        use crate::core::auth::Passkey;

        #[test]
        fn it_should_resolve_a_loaded_passkey_to_its_user() {
            let gate = GateCache::new();
            gate.load_users(&[sample_user(1, "00000000000000000000000000000001")]);

            let passkey = Passkey::from_str("00000000000000000000000000000001").unwrap();
            let entry = gate.user_by_passkey(&passkey).unwrap();

            assert_eq!(entry.id, 1);
            assert!(gate.user_by_passkey(&Passkey::from_str("00000000000000000000000000000002").unwrap()).is_none());
        }

        #[test]
        fn transfer_updates_should_be_visible_through_both_indexes() {
            let gate = GateCache::new();
            gate.load_users(&[sample_user(1, "00000000000000000000000000000001")]);

            gate.user_by_id(1).unwrap().add_transfer(100, 10);

            let passkey = Passkey::from_str("00000000000000000000000000000001").unwrap();
            let entry = gate.user_by_passkey(&passkey).unwrap();
            assert_eq!(entry.uploaded(), 100);
            assert_eq!(entry.downloaded(), 10);
        }

        #[test]
        fn a_reload_should_replace_stale_users() {
            let gate = GateCache::new();
            gate.load_users(&[sample_user(1, "00000000000000000000000000000001")]);
            gate.load_users(&[sample_user(2, "00000000000000000000000000000002")]);

            assert_eq!(gate.user_count(), 1);
            assert!(gate.user_by_id(1).is_none());
            assert!(gate.user_by_id(2).is_some());
        }
    }

    mod client_whitelist {
        use super::GateCache;
        use crate::core::models::WhitelistEntry;

        fn entry(prefix: &[u8]) -> WhitelistEntry {
            WhitelistEntry {
                prefix: prefix.to_vec(),
                name: String::from_utf8_lossy(prefix).to_string(),
            }
        }

        #[test]
        fn it_should_check_the_first_three_bytes_of_the_peer_id() {
            let gate = GateCache::new();
            gate.load_whitelist(&[entry(b"-qB"), entry(b"-TR")]);

            assert!(gate.is_client_whitelisted(b"-qB00000000000000000"));
            assert!(gate.is_client_whitelisted(b"-TR3000-xxxxxxxxxxxx"));
            assert!(!gate.is_client_whitelisted(b"-AZ50000000000000000"));
        }

        #[test]
        fn a_longer_registered_prefix_cannot_match() {
            // Registered prefixes may be up to 8 bytes, but the check only
            // compares the first 3, so longer entries never match.
            let gate = GateCache::new();
            gate.load_whitelist(&[entry(b"-qB4520-")]);

            assert!(!gate.is_client_whitelisted(b"-qB45200000000000000"));
        }

        #[test]
        fn an_empty_whitelist_should_accept_every_client() {
            let gate = GateCache::new();
            assert!(gate.is_client_whitelisted(b"-XX00000000000000000"));
        }
    }

    mod ban_list {
        use std::net::IpAddr;
        use std::time::Duration;

        use super::{ban, GateCache};

        fn addr(ip: &str) -> IpAddr {
            ip.parse().unwrap()
        }

        #[test]
        fn it_should_match_exact_addresses() {
            let gate = GateCache::new();
            gate.load_bans(&[ban("10.1.2.3", None)]);

            assert!(gate.check_banned(addr("10.1.2.3"), Duration::ZERO).is_some());
            assert!(gate.check_banned(addr("10.1.2.4"), Duration::ZERO).is_none());
        }

        #[test]
        fn it_should_match_addresses_contained_in_a_cidr_range() {
            let gate = GateCache::new();
            gate.load_bans(&[ban("10.0.0.0/8", None)]);

            assert!(gate.check_banned(addr("10.1.2.3"), Duration::ZERO).is_some());
            assert!(gate.check_banned(addr("11.0.0.1"), Duration::ZERO).is_none());
        }

        #[test]
        fn it_should_match_ipv6_cidr_ranges() {
            let gate = GateCache::new();
            gate.load_bans(&[ban("2001:db8::/32", None)]);

            assert!(gate.check_banned(addr("2001:db8::1"), Duration::ZERO).is_some());
            assert!(gate.check_banned(addr("2001:db9::1"), Duration::ZERO).is_none());
            // A v4 address never matches a v6 rule.
            assert!(gate.check_banned(addr("10.0.0.1"), Duration::ZERO).is_none());
        }

        #[test]
        fn a_zero_prefix_should_match_everything_in_the_family() {
            let gate = GateCache::new();
            gate.load_bans(&[ban("0.0.0.0/0", None)]);

            assert!(gate.check_banned(addr("203.0.113.77"), Duration::ZERO).is_some());
            assert!(gate.check_banned(addr("2001:db8::1"), Duration::ZERO).is_none());
        }

        #[test]
        fn expired_bans_should_never_match() {
            let gate = GateCache::new();
            gate.load_bans(&[ban("10.1.2.3", Some(100))]);

            assert!(gate.check_banned(addr("10.1.2.3"), Duration::from_secs(99)).is_some());
            assert!(gate.check_banned(addr("10.1.2.3"), Duration::from_secs(100)).is_none());
        }

        #[test]
        fn the_sweep_should_remove_only_expired_rules() {
            let gate = GateCache::new();
            gate.load_bans(&[ban("10.1.2.3", Some(100)), ban("10.1.2.4", None)]);

            let removed = gate.sweep_expired_bans(Duration::from_secs(500));

            assert_eq!(removed, 1);
            assert_eq!(gate.ban_count(), 1);
        }

        #[test]
        fn unparseable_bans_should_be_skipped_on_load() {
            let gate = GateCache::new();
            gate.load_bans(&[ban("not-an-ip", None), ban("10.0.0.0/33", None), ban("10.1.2.3", None)]);

            assert_eq!(gate.ban_count(), 1);
        }
    }
}
