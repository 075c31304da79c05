//! Handler for the `announce` request.
//!
//! The request pipeline, in order: ban check, rate limit, passkey lookup,
//! client whitelist, then the core announce (leech eligibility, swarm
//! dispatch, stats recording). Any rejection short-circuits into a bencoded
//! `failure reason`.
use std::net::IpAddr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use tracing::debug;

use crate::core::rate_limit::RequestClass;
use crate::core::swarm::PeerData;
use crate::core::{statistics, AnnounceData, Error, Tracker};
use crate::servers::http::extractors::announce_request::ExtractRequest;
use crate::servers::http::extractors::client_ip::ExtractClientIp;
use crate::servers::http::requests::announce::Announce;
use crate::servers::http::responses;

pub async fn handle(
    State(tracker): State<Arc<Tracker>>,
    Path(passkey): Path<String>,
    ExtractClientIp(client_ip): ExtractClientIp,
    ExtractRequest(announce_request): ExtractRequest,
) -> Response {
    debug!("http announce request from {client_ip}: {announce_request:?}");

    match handle_announce(&tracker, &passkey, client_ip, &announce_request).await {
        Ok(announce_data) => responses::announce::Announce {
            data: announce_data,
            compact: announce_request.compact,
        }
        .into_response(),
        Err(error) => {
            tracker.send_stats_event(statistics::Event::Rejected);
            responses::error::Error::from(error).into_response()
        }
    }
}

async fn handle_announce(
    tracker: &Arc<Tracker>,
    passkey: &str,
    client_ip: IpAddr,
    request: &Announce,
) -> Result<AnnounceData, Error> {
    tracker.check_banned(client_ip)?;
    tracker.check_rate_limit(client_ip, RequestClass::Announce)?;

    let user = tracker.authenticate(passkey)?;

    tracker.check_client_whitelisted(&request.peer_id)?;

    let peer_data = PeerData {
        user_id: Some(user.id),
        ip: client_ip,
        port: request.port,
        peer_id: request.peer_id,
        uploaded: request.uploaded,
        downloaded: request.downloaded,
        left: request.left,
        event: request.event,
        key: request.key.clone(),
    };

    let announce_data = tracker.announce(&request.info_hash, peer_data, request.num_want).await?;

    tracker.send_stats_event(statistics::Event::HttpAnnounce);

    Ok(announce_data)
}
