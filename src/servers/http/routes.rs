//! The HTTP tracker routes.
use std::sync::Arc;

use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;

use super::handlers::{announce, scrape, status};
use super::responses;
use crate::core::{Error, Tracker};

/// It builds the tracker router:
///
/// - `GET /{passkey}/announce`
/// - `GET /{passkey}/scrape`
/// - `GET /health`
/// - `GET /stats`
///
/// Announces and scrapes without a passkey path segment get a bencoded
/// `Passkey required` failure instead of a bare `404`.
#[must_use]
pub fn router(tracker: Arc<Tracker>) -> Router {
    Router::new()
        .route("/announce", get(missing_passkey))
        .route("/scrape", get(missing_passkey))
        .route("/:passkey/announce", get(announce::handle))
        .route("/:passkey/scrape", get(scrape::handle))
        .route("/health", get(status::health_check))
        .route("/stats", get(status::stats))
        .with_state(tracker)
}

#[allow(clippy::unused_async)]
async fn missing_passkey() -> Response {
    responses::error::Error::from(Error::PasskeyRequired).into_response()
}
