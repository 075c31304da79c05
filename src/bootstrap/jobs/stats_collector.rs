//! Job that drains the stats buffer into the durable store.
//!
//! It runs every `stats_flush_interval` seconds (default 10). The final
//! drain on graceful shutdown happens in
//! [`Tracker::shutdown`](crate::core::Tracker::shutdown), not here.
use std::sync::{Arc, Weak};

use tokio::task::JoinHandle;
use tracing::info;

use crate::core::Tracker;

#[must_use]
pub fn start_job(tracker: &Arc<Tracker>) -> JoinHandle<()> {
    let weak_tracker = Arc::downgrade(tracker);
    let interval = tracker.config.core.stats_flush_interval;

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval));
        interval.tick().await;

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("stopping stats collector job..");
                    break;
                }
                _ = interval.tick() => {
                    let Some(tracker) = Weak::upgrade(&weak_tracker) else {
                        break;
                    };
                    tracker.flush_stats();
                }
            }
        }
    })
}
