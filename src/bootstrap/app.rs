//! App assembly: build every collaborator, wire the tracker, start the
//! listeners and the background jobs.
//!
//! Startup order matters: the durable store and the gate cache come up before
//! any listener binds, so the first announce already sees the passkeys; jobs
//! start last. Failures here are fatal: `main` logs them and exits nonzero.
use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::config::{Configuration, PeerStorageDriver};
use crate::core::swarm::storage::{memory::Memory, redis::Redis, PeerStorage};
use crate::core::verifier::Verifier;
use crate::core::{databases, statistics, Tracker};
use crate::servers;

use super::{jobs, logging};

/// Fatal startup failures.
#[derive(Error, Debug)]
pub enum Error {
    #[error("database startup failed: {source}")]
    Database {
        #[from]
        source: databases::error::Error,
    },
    #[error("redis peer storage startup failed: {source}")]
    PeerStorage {
        #[from]
        source: crate::core::swarm::storage::Error,
    },
    #[error("http tracker startup failed: {source}")]
    HttpTracker {
        #[from]
        source: servers::http::server::Error,
    },
    #[error("udp tracker startup failed: {source}")]
    UdpTracker {
        #[from]
        source: std::io::Error,
    },
    #[error("configuration error: {reason}")]
    Configuration { reason: String },
}

/// It builds and starts the whole tracker. Returns the tracker handle the
/// caller keeps until shutdown.
///
/// # Errors
///
/// Will return an [`enum@Error`] when the durable store, the peer store or a
/// listener cannot start.
pub async fn start(config: Arc<Configuration>) -> Result<Arc<Tracker>, Error> {
    logging::setup(&config);

    // Durable store
    let database: Arc<dyn databases::Database> = Arc::from(databases::build(&config.database.path)?);

    // Peer storage backend
    let peer_storage: Arc<dyn PeerStorage> = match config.peer_storage.driver {
        PeerStorageDriver::Memory => Arc::new(Memory::new()),
        PeerStorageDriver::Redis => {
            let url = config.peer_storage.redis_url.as_ref().ok_or(Error::Configuration {
                reason: "peer_storage.redis_url is required for the redis driver".to_string(),
            })?;
            Arc::new(Redis::new(url).await?)
        }
    };

    // Reachability verifier
    let verifier = Verifier::start(&config.peer_verification);

    // Request metrics
    let (stats_event_sender, stats_repository) = statistics::Keeper::new_active_instance();

    let tracker = Arc::new(Tracker::new(
        config.clone(),
        database,
        peer_storage,
        verifier,
        stats_event_sender,
        stats_repository,
    ));

    // The gate must be warm before the first request arrives.
    tracker.load_gate_from_database()?;

    // Listeners
    servers::http::server::start(&config.http_tracker, tracker.clone()).await?;
    servers::udp::server::start(&config.udp_tracker, tracker.clone()).await?;

    // Background jobs
    jobs::stats_collector::start_job(&tracker);
    jobs::cache_sweeper::start_job(&tracker);

    if config.hnr.is_some() {
        jobs::hit_and_run::start_job(&tracker);
    }

    if config.bonus_points.is_some() {
        jobs::bonus_points::start_job(&tracker);
    }

    info!("tracker started");

    Ok(tracker)
}
