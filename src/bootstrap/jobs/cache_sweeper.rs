//! Job that sweeps the in-memory side tables.
//!
//! Rate-limit records with empty windows and expired reachability results
//! only waste memory; a minutely sweep keeps both bounded.
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::info;

use crate::core::Tracker;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[must_use]
pub fn start_job(tracker: &Arc<Tracker>) -> JoinHandle<()> {
    let weak_tracker = Arc::downgrade(tracker);

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("stopping cache sweeper job..");
                    break;
                }
                _ = interval.tick() => {
                    let Some(tracker) = Weak::upgrade(&weak_tracker) else {
                        break;
                    };
                    tracker.sweep_caches();
                }
            }
        }
    })
}
