//! Handlers for the UDP tracker.
//!
//! One datagram in, one frame out. Parse failures and gate rejections become
//! error frames carrying the client's transaction id (or zero when the
//! transaction id itself never parsed).
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;

use tracing::debug;

use super::connection_id::ConnectionIdMap;
use super::error::Error;
use super::request::{AnnounceRequest, Request, ScrapeRequest, TransactionId};
use super::response::{
    AnnounceResponse, ConnectResponse, ErrorResponse, Response, ResponsePeer, ScrapeResponse, TorrentScrapeStatistics,
};
use crate::core::auth::AnnounceKey;
use crate::core::rate_limit::RequestClass;
use crate::core::swarm::PeerData;
use crate::core::{statistics, Tracker};
use crate::shared::bit_torrent::MAX_SCRAPE_TORRENTS;
use crate::shared::clock::Time;
use crate::CurrentClock;

/// Default peer count for `num_want < 0`.
const DEFAULT_NUM_WANT: usize = 50;

/// It handles one incoming datagram and builds the response frame.
pub async fn handle_packet(
    payload: &[u8],
    from: SocketAddr,
    tracker: &Arc<Tracker>,
    connections: &ConnectionIdMap,
) -> Response {
    let request = match Request::parse(payload, MAX_SCRAPE_TORRENTS) {
        Ok(request) => request,
        Err(parse_error) => {
            debug!("udp bad request from {from}: {parse_error}");
            tracker.send_stats_event(statistics::Event::Rejected);
            return handle_error(&Error::from(parse_error), TransactionId(0));
        }
    };

    let transaction_id = match &request {
        Request::Connect(connect) => connect.transaction_id,
        Request::Announce(announce) => announce.transaction_id,
        Request::Scrape(scrape) => scrape.transaction_id,
    };

    let result = match request {
        Request::Connect(_) => handle_connect(transaction_id, tracker, connections),
        Request::Announce(announce) => handle_announce(&announce, from, tracker, connections).await,
        Request::Scrape(scrape) => handle_scrape(&scrape, from, tracker, connections).await,
    };

    match result {
        Ok(response) => response,
        Err(error) => {
            tracker.send_stats_event(statistics::Event::Rejected);
            handle_error(&error, transaction_id)
        }
    }
}

fn handle_connect(transaction_id: TransactionId, tracker: &Arc<Tracker>, connections: &ConnectionIdMap) -> Result<Response, Error> {
    let connection_id = connections.issue(CurrentClock::now());

    tracker.send_stats_event(statistics::Event::UdpConnect);

    Ok(Response::Connect(ConnectResponse {
        transaction_id,
        connection_id: connection_id.0,
    }))
}

async fn handle_announce(
    request: &AnnounceRequest,
    from: SocketAddr,
    tracker: &Arc<Tracker>,
    connections: &ConnectionIdMap,
) -> Result<Response, Error> {
    let now = CurrentClock::now();

    if !connections.is_valid(request.connection_id, now) {
        return Err(Error::InvalidConnectionId);
    }

    tracker.check_banned(from.ip())?;
    tracker.check_rate_limit(from.ip(), RequestClass::Announce)?;
    tracker.check_client_whitelisted(&request.peer_id)?;

    // The claimed `ip` field is ignored: only the verified source address is
    // recorded. BEP 15 carries no passkey, so the peer stays anonymous and
    // its anti-spoof key is derived from the client-chosen `key` field.
    let peer_data = PeerData {
        user_id: None,
        ip: from.ip(),
        port: request.port,
        peer_id: request.peer_id,
        uploaded: request.uploaded,
        downloaded: request.downloaded,
        left: request.left,
        event: request.event,
        key: Some(announce_key_from_udp_key(request.key)),
    };

    // Negative means "server default"; zero is a legitimate "no peers".
    let num_want = usize::try_from(request.num_want).unwrap_or(DEFAULT_NUM_WANT);

    let data = tracker.announce(&request.info_hash, peer_data, num_want).await?;

    tracker.send_stats_event(statistics::Event::UdpAnnounce);

    let peers = data
        .peers
        .iter()
        .filter_map(|peer| match peer.ip() {
            IpAddr::V4(ip_address) => Some(ResponsePeer {
                ip_address,
                port: peer.port(),
            }),
            IpAddr::V6(_) => None,
        })
        .collect();

    Ok(Response::Announce(AnnounceResponse {
        transaction_id: request.transaction_id,
        interval: data.interval,
        leechers: data.leechers,
        seeders: data.seeders,
        peers,
    }))
}

async fn handle_scrape(
    request: &ScrapeRequest,
    from: SocketAddr,
    tracker: &Arc<Tracker>,
    connections: &ConnectionIdMap,
) -> Result<Response, Error> {
    let now = CurrentClock::now();

    if !connections.is_valid(request.connection_id, now) {
        return Err(Error::InvalidConnectionId);
    }

    tracker.check_banned(from.ip())?;
    tracker.check_rate_limit(from.ip(), RequestClass::Scrape)?;

    let data = tracker.scrape(&request.info_hashes).await?;

    tracker.send_stats_event(statistics::Event::UdpScrape);

    // The response carries one entry per requested hash, in request order.
    let torrent_stats = request
        .info_hashes
        .iter()
        .map(|info_hash| {
            let counts = data.files.get(info_hash).copied().unwrap_or_default();
            TorrentScrapeStatistics {
                seeders: counts.seeders,
                completed: counts.completed,
                leechers: counts.leechers,
            }
        })
        .collect();

    Ok(Response::Scrape(ScrapeResponse {
        transaction_id: request.transaction_id,
        torrent_stats,
    }))
}

fn handle_error(error: &Error, transaction_id: TransactionId) -> Response {
    Response::Error(ErrorResponse {
        transaction_id,
        message: error.frame_message(),
    })
}

/// The BEP 15 `key` is 4 client-chosen bytes; widen it into the tracker's
/// 16-hex-char announce key form.
fn announce_key_from_udp_key(key: u32) -> AnnounceKey {
    AnnounceKey::from_str(&format!("{:016x}", u64::from(key))).expect("16 hex chars parse as an announce key")
}

#[cfg(test)]
mod tests {
    use super::announce_key_from_udp_key;

    #[test]
    fn the_udp_key_should_widen_into_a_stable_announce_key() {
        let key = announce_key_from_udp_key(0xdead_beef);

        assert_eq!(key.value(), "00000000deadbeef");
        assert_eq!(announce_key_from_udp_key(0xdead_beef), key);
        assert_ne!(announce_key_from_udp_key(1), key);
    }
}
