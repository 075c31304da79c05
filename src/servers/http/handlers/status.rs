//! Handlers for the `health` and `stats` endpoints.
use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::core::{statistics, Tracker};

#[derive(Serialize)]
pub struct HealthReport {
    pub status: &'static str,
}

#[allow(clippy::unused_async)]
pub async fn health_check() -> Json<HealthReport> {
    Json(HealthReport { status: "ok" })
}

/// Implementation-defined operational counters.
#[derive(Serialize)]
pub struct StatsReport {
    pub active_swarms: usize,
    pub users: usize,
    #[serde(flatten)]
    pub requests: statistics::Metrics,
}

pub async fn stats(State(tracker): State<Arc<Tracker>>) -> Json<StatsReport> {
    Json(StatsReport {
        active_swarms: tracker.active_swarm_count(),
        users: tracker.gate().user_count(),
        requests: tracker.get_metrics().await,
    })
}
