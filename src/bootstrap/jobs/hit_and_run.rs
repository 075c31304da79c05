//! Job that runs the hit-and-run detector.
//!
//! Started only when the `[hnr]` configuration section is present. The pass
//! itself lives in [`core::hnr`](crate::core::hnr); admins can also trigger
//! it on demand through the external surface.
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::info;

use crate::core::Tracker;

/// Detection runs every 6 hours.
const PASS_INTERVAL: Duration = Duration::from_secs(6 * 3600);

#[must_use]
pub fn start_job(tracker: &Arc<Tracker>) -> JoinHandle<()> {
    let weak_tracker = Arc::downgrade(tracker);

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PASS_INTERVAL);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("stopping hit-and-run job..");
                    break;
                }
                _ = interval.tick() => {
                    let Some(tracker) = Weak::upgrade(&weak_tracker) else {
                        break;
                    };
                    tracker.run_hnr_pass();
                }
            }
        }
    })
}
