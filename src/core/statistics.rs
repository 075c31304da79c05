//! Structs to collect and keep tracker request metrics.
//!
//! The tracker counts handled requests per transport and request type. The
//! data is collected with an event-sender -> event-listener model: request
//! handlers send an [`Event`] over an mpsc channel and a keeper task folds the
//! events into [`Metrics`]. The `GET /stats` endpoint serves a snapshot.
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc::error::SendError;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

const CHANNEL_BUFFER_SIZE: usize = 65_535;

/// A metrics event.
///
/// - `Http`/`Udp` is the transport the request arrived on.
/// - The suffix is the request type. Only the UDP tracker has `connect`
///   requests.
#[derive(Debug, PartialEq, Eq)]
pub enum Event {
    HttpAnnounce,
    HttpScrape,
    UdpConnect,
    UdpAnnounce,
    UdpScrape,
    /// A request rejected by the gate (ban, rate limit, auth or eligibility).
    Rejected,
}

/// Metrics collected by the tracker since it started.
#[derive(Debug, PartialEq, Eq, Default, Clone, Serialize)]
pub struct Metrics {
    pub http_announces_handled: u64,
    pub http_scrapes_handled: u64,
    pub udp_connections_handled: u64,
    pub udp_announces_handled: u64,
    pub udp_scrapes_handled: u64,
    pub requests_rejected: u64,
}

/// The metrics repository shared between the keeper and readers.
#[derive(Clone, Default)]
pub struct Repo {
    pub stats: Arc<RwLock<Metrics>>,
}

impl Repo {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_stats(&self) -> Metrics {
        self.stats.read().await.clone()
    }

    async fn increase_event(&self, event: &Event) {
        let mut stats = self.stats.write().await;

        match event {
            Event::HttpAnnounce => stats.http_announces_handled += 1,
            Event::HttpScrape => stats.http_scrapes_handled += 1,
            Event::UdpConnect => stats.udp_connections_handled += 1,
            Event::UdpAnnounce => stats.udp_announces_handled += 1,
            Event::UdpScrape => stats.udp_scrapes_handled += 1,
            Event::Rejected => stats.requests_rejected += 1,
        }
    }
}

/// The sender half handed to request handlers.
#[derive(Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// It sends an event without waiting: a full channel drops the event
    /// rather than slowing a request down.
    pub fn send_event(&self, event: Event) -> Option<SendError<Event>> {
        match self.sender.try_send(event) {
            Ok(()) => None,
            Err(mpsc::error::TrySendError::Full(event)) => {
                debug!("metrics channel full, dropping {event:?}");
                None
            }
            Err(mpsc::error::TrySendError::Closed(event)) => Some(SendError(event)),
        }
    }
}

/// The keeper: spawns the listener task and owns the repository.
pub struct Keeper {
    pub repository: Repo,
}

impl Keeper {
    /// It builds a keeper and returns the sender handed to request handlers
    /// together with the repository handed to readers.
    #[must_use]
    pub fn new_active_instance() -> (EventSender, Repo) {
        let keeper = Self {
            repository: Repo::new(),
        };

        let (sender, receiver) = mpsc::channel::<Event>(CHANNEL_BUFFER_SIZE);
        let repository = keeper.repository.clone();

        tokio::spawn(async move {
            let mut receiver = receiver;
            while let Some(event) = receiver.recv().await {
                debug!("metrics event: {event:?}");
                keeper.repository.increase_event(&event).await;
            }
        });

        (EventSender { sender }, repository)
    }
}
