//! Job that runs the bonus point calculator.
//!
//! Started only when the `[bonus_points]` configuration section is present.
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::info;

use crate::core::Tracker;

/// Awards run hourly.
const PASS_INTERVAL: Duration = Duration::from_secs(3600);

#[must_use]
pub fn start_job(tracker: &Arc<Tracker>) -> JoinHandle<()> {
    let weak_tracker = Arc::downgrade(tracker);

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PASS_INTERVAL);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("stopping bonus points job..");
                    break;
                }
                _ = interval.tick() => {
                    let Some(tracker) = Weak::upgrade(&weak_tracker) else {
                        break;
                    };
                    tracker.run_bonus_pass().await;
                }
            }
        }
    })
}
