//! Issued connection ids.
//!
//! The server issues a random 64-bit id per `connect` request, remembers it
//! with an expiry (default 120 seconds), and rejects announces and scrapes
//! whose id it does not remember. Ids come from the thread-local CSPRNG, so
//! they cannot be predicted from the client side.
//!
//! The map is owned by the UDP server; expired entries are removed on its
//! cleanup timer.
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use rand::Rng;

use super::request::ConnectionId;
use crate::shared::clock::DurationSinceUnixEpoch;

pub struct ConnectionIdMap {
    timeout: Duration,
    ids: Mutex<HashMap<u64, DurationSinceUnixEpoch>>,
}

impl ConnectionIdMap {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            ids: Mutex::new(HashMap::new()),
        }
    }

    /// It issues a fresh id valid for the configured timeout.
    pub fn issue(&self, now: DurationSinceUnixEpoch) -> ConnectionId {
        let mut ids = self.ids.lock().expect("connection id map poisoned");

        loop {
            let id: u64 = rand::thread_rng().gen();
            // A collision would silently extend a stranger's id.
            if let std::collections::hash_map::Entry::Vacant(entry) = ids.entry(id) {
                entry.insert(now + self.timeout);
                return ConnectionId(id);
            }
        }
    }

    /// An id is valid iff it was issued and has not expired.
    #[must_use]
    pub fn is_valid(&self, connection_id: ConnectionId, now: DurationSinceUnixEpoch) -> bool {
        self.ids
            .lock()
            .expect("connection id map poisoned")
            .get(&connection_id.0)
            .is_some_and(|expires_at| now < *expires_at)
    }

    /// It drops expired ids. Called on the server's cleanup timer.
    pub fn cleanup(&self, now: DurationSinceUnixEpoch) -> usize {
        let mut ids = self.ids.lock().expect("connection id map poisoned");
        let before = ids.len();
        ids.retain(|_, expires_at| now < *expires_at);
        before - ids.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.lock().expect("connection id map poisoned").len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::ConnectionIdMap;

    #[test]
    fn an_issued_id_should_be_valid_until_it_expires() {
        let map = ConnectionIdMap::new(Duration::from_secs(120));
        let now = Duration::from_secs(1000);

        let id = map.issue(now);

        assert!(map.is_valid(id, now));
        assert!(map.is_valid(id, now + Duration::from_secs(119)));
        assert!(!map.is_valid(id, now + Duration::from_secs(120)));
    }

    #[test]
    fn an_unknown_id_should_be_invalid() {
        let map = ConnectionIdMap::new(Duration::from_secs(120));

        assert!(!map.is_valid(super::ConnectionId(42), Duration::from_secs(0)));
    }

    #[test]
    fn two_issues_should_produce_different_ids() {
        let map = ConnectionIdMap::new(Duration::from_secs(120));
        let now = Duration::from_secs(0);

        assert_ne!(map.issue(now), map.issue(now));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn the_cleanup_should_drop_only_expired_ids() {
        let map = ConnectionIdMap::new(Duration::from_secs(120));

        let old = map.issue(Duration::from_secs(0));
        let fresh = map.issue(Duration::from_secs(100));

        let removed = map.cleanup(Duration::from_secs(150));

        assert_eq!(removed, 1);
        assert!(!map.is_valid(old, Duration::from_secs(150)));
        assert!(map.is_valid(fresh, Duration::from_secs(150)));
    }
}
