//! Handler for the `scrape` request.
use std::net::IpAddr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use tracing::debug;

use crate::core::rate_limit::RequestClass;
use crate::core::{statistics, Error, ScrapeData, Tracker};
use crate::servers::http::extractors::client_ip::ExtractClientIp;
use crate::servers::http::extractors::scrape_request::ExtractRequest;
use crate::servers::http::requests::scrape::Scrape;
use crate::servers::http::responses;

pub async fn handle(
    State(tracker): State<Arc<Tracker>>,
    Path(passkey): Path<String>,
    ExtractClientIp(client_ip): ExtractClientIp,
    ExtractRequest(scrape_request): ExtractRequest,
) -> Response {
    debug!("http scrape request from {client_ip}: {} torrents", scrape_request.info_hashes.len());

    match handle_scrape(&tracker, &passkey, client_ip, &scrape_request).await {
        Ok(scrape_data) => responses::scrape::Scrape { data: scrape_data }.into_response(),
        Err(error) => {
            tracker.send_stats_event(statistics::Event::Rejected);
            responses::error::Error::from(error).into_response()
        }
    }
}

async fn handle_scrape(
    tracker: &Arc<Tracker>,
    passkey: &str,
    client_ip: IpAddr,
    request: &Scrape,
) -> Result<ScrapeData, Error> {
    tracker.check_banned(client_ip)?;
    tracker.check_rate_limit(client_ip, RequestClass::Scrape)?;

    tracker.authenticate(passkey)?;

    let scrape_data = tracker.scrape(&request.info_hashes).await?;

    tracker.send_stats_event(statistics::Event::HttpScrape);

    Ok(scrape_data)
}
