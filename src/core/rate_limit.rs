//! Per-IP request rate limiting.
//!
//! Each `(IP, request class)` pair gets a sliding window of 60 seconds. A
//! request is allowed while the window holds fewer than the configured maximum
//! of timestamps; otherwise it is denied together with the number of seconds
//! after which the oldest timestamp will have left the window.
//!
//! Whitelisted IPs bypass the check entirely. A background sweep drops records
//! whose window has emptied so one-off scrapers do not accumulate state.
use std::collections::{HashSet, VecDeque};
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::Duration;

use dashmap::DashMap;

use crate::config::RateLimiting;
use crate::shared::clock::DurationSinceUnixEpoch;

/// The fixed window length.
pub const WINDOW: Duration = Duration::from_secs(60);

/// The request classes with independent budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestClass {
    Announce,
    Scrape,
    AdminApi,
}

/// The limiter's verdict for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Denied {
        /// Seconds until a slot frees up.
        retry_after: Duration,
    },
}

impl Decision {
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed)
    }
}

/// Sliding-window rate limiter shared by all request handlers.
pub struct RateLimiter {
    enabled: bool,
    whitelist: HashSet<IpAddr>,
    announce_max: u32,
    scrape_max: u32,
    admin_api_max: u32,
    records: DashMap<(IpAddr, RequestClass), Mutex<VecDeque<DurationSinceUnixEpoch>>>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(config: &RateLimiting) -> Self {
        Self {
            enabled: config.enabled,
            whitelist: config.whitelist.iter().copied().collect(),
            announce_max: config.announce.max_requests,
            scrape_max: config.scrape.max_requests,
            admin_api_max: config.admin_api.max_requests,
            records: DashMap::new(),
        }
    }

    fn max_requests(&self, class: RequestClass) -> u32 {
        match class {
            RequestClass::Announce => self.announce_max,
            RequestClass::Scrape => self.scrape_max,
            RequestClass::AdminApi => self.admin_api_max,
        }
    }

    /// It checks and records one request.
    ///
    /// The per-record mutex makes the read-modify-write atomic under
    /// concurrent callers for the same `(ip, class)`; different pairs never
    /// contend.
    pub fn check(&self, ip: IpAddr, class: RequestClass, now: DurationSinceUnixEpoch) -> Decision {
        if !self.enabled || self.whitelist.contains(&ip) {
            return Decision::Allowed;
        }

        let max_requests = self.max_requests(class);
        if max_requests == 0 {
            return Decision::Denied { retry_after: WINDOW };
        }

        let window_start = now.saturating_sub(WINDOW);

        let record = self.records.entry((ip, class)).or_insert_with(|| Mutex::new(VecDeque::new()));
        let mut timestamps = record.lock().expect("rate limit record poisoned");

        while timestamps.front().is_some_and(|stamp| *stamp < window_start) {
            timestamps.pop_front();
        }

        if timestamps.len() < max_requests as usize {
            timestamps.push_back(now);
            return Decision::Allowed;
        }

        let oldest = *timestamps.front().expect("window is non-empty when full");

        Decision::Denied {
            retry_after: (oldest + WINDOW).saturating_sub(now),
        }
    }

    /// It removes records whose whole window has expired. Called on a timer.
    pub fn sweep(&self, now: DurationSinceUnixEpoch) -> usize {
        let window_start = now.saturating_sub(WINDOW);
        let before = self.records.len();

        self.records.retain(|_, record| {
            let timestamps = record.lock().expect("rate limit record poisoned");
            timestamps.back().is_some_and(|stamp| *stamp >= window_start)
        });

        before - self.records.len()
    }

    #[must_use]
    pub fn tracked_records(&self) -> usize {
        self.records.len()
    }
}
