//! Background jobs running on intervals against the tracker.
//!
//! Every job holds a `Weak` reference: when the tracker is dropped the timer
//! stops on its next tick instead of keeping the process alive.
pub mod bonus_points;
pub mod cache_sweeper;
pub mod hit_and_run;
pub mod stats_collector;
