//! Peer reachability verification.
//!
//! Clients behind NAT or firewalls can announce but not accept connections.
//! The verifier dials announced `(ip, port)` addresses over TCP, caches the
//! result with a TTL, and the swarm workers use it to order connectable peers
//! first in announce responses.
//!
//! The request path never waits for a probe: [`Verifier::check_connectable`]
//! answers from the cache and enqueues a background verification on a miss.
//! Probes are bounded by a semaphore and a connect timeout; each probe opens a
//! connection and immediately closes it.
//!
//! When disabled by configuration the queue is a no-op and every check
//! answers `Unknown`.
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Semaphore};
use tracing::debug;

use crate::config::PeerVerification;
use crate::core::peer::Connectability;
use crate::shared::clock::{DurationSinceUnixEpoch, Time};
use crate::CurrentClock;

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    connectable: bool,
    expires_at: DurationSinceUnixEpoch,
}

/// The verifier. See the [module documentation](crate::core::verifier).
pub struct Verifier {
    enabled: bool,
    cache_ttl: Duration,
    cache: DashMap<SocketAddr, CacheEntry>,
    /// Addresses with a probe already queued, so a swarm of announces from
    /// the same peer does not queue duplicate dials.
    pending: DashMap<SocketAddr, ()>,
    queue: Option<mpsc::Sender<SocketAddr>>,
}

impl Verifier {
    /// It builds the verifier and, when enabled, spawns the probe dispatcher.
    #[must_use]
    pub fn start(config: &PeerVerification) -> Arc<Self> {
        let (queue, receiver) = if config.enabled {
            let (tx, rx) = mpsc::channel::<SocketAddr>(QUEUE_CAPACITY);
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        let verifier = Arc::new(Self {
            enabled: config.enabled,
            cache_ttl: Duration::from_secs(config.cache_ttl),
            cache: DashMap::new(),
            pending: DashMap::new(),
            queue,
        });

        if let Some(receiver) = receiver {
            tokio::spawn(run_dispatcher(
                verifier.clone(),
                receiver,
                Duration::from_secs(config.connect_timeout),
                config.max_concurrent,
            ));
        }

        verifier
    }

    /// A verifier for contexts without a runtime. Checks answer `Unknown`.
    #[must_use]
    pub fn disabled() -> Arc<Self> {
        Arc::new(Self {
            enabled: false,
            cache_ttl: Duration::ZERO,
            cache: DashMap::new(),
            pending: DashMap::new(),
            queue: None,
        })
    }

    /// It answers from the cache; a miss or an expired entry answers
    /// `Unknown` and enqueues the address for verification.
    #[must_use]
    pub fn check_connectable(&self, addr: SocketAddr) -> Connectability {
        if !self.enabled {
            return Connectability::Unknown;
        }

        let now = CurrentClock::now();

        if let Some(entry) = self.cache.get(&addr) {
            if now < entry.expires_at {
                return if entry.connectable {
                    Connectability::Connectable
                } else {
                    Connectability::Unreachable
                };
            }
        }

        self.queue_verification(addr);
        Connectability::Unknown
    }

    /// It enqueues an address for a background probe. No-op when disabled,
    /// when the address is already queued, or when the queue is full.
    pub fn queue_verification(&self, addr: SocketAddr) {
        let Some(queue) = &self.queue else {
            return;
        };

        if self.pending.insert(addr, ()).is_some() {
            return;
        }

        if queue.try_send(addr).is_err() {
            self.pending.remove(&addr);
        }
    }

    fn record(&self, addr: SocketAddr, connectable: bool) {
        let expires_at = CurrentClock::now() + self.cache_ttl;
        self.cache.insert(addr, CacheEntry { connectable, expires_at });
        self.pending.remove(&addr);
    }

    /// It drops expired cache entries. Called on a timer.
    pub fn sweep_expired(&self, now: DurationSinceUnixEpoch) -> usize {
        let before = self.cache.len();
        self.cache.retain(|_, entry| now < entry.expires_at);
        before - self.cache.len()
    }

    #[must_use]
    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }
}

const QUEUE_CAPACITY: usize = 4096;

async fn run_dispatcher(
    verifier: Arc<Verifier>,
    mut receiver: mpsc::Receiver<SocketAddr>,
    connect_timeout: Duration,
    max_concurrent: usize,
) {
    let semaphore = Arc::new(Semaphore::new(max_concurrent.max(1)));

    while let Some(addr) = receiver.recv().await {
        let Ok(permit) = semaphore.clone().acquire_owned().await else {
            break;
        };
        let verifier = verifier.clone();

        tokio::spawn(async move {
            let connectable = probe(addr, connect_timeout).await;
            debug!("peer {addr} connectable: {connectable}");
            verifier.record(addr, connectable);
            drop(permit);
        });
    }
}

/// One probe: connect, then immediately close.
async fn probe(addr: SocketAddr, connect_timeout: Duration) -> bool {
    matches!(tokio::time::timeout(connect_timeout, TcpStream::connect(addr)).await, Ok(Ok(_)))
}
