//! Serialization of BEP 15 response frames.
use std::net::Ipv4Addr;

use super::request::TransactionId;

const ACTION_CONNECT: u32 = 0;
const ACTION_ANNOUNCE: u32 = 1;
const ACTION_SCRAPE: u32 = 2;
const ACTION_ERROR: u32 = 3;

/// A response frame ready to serialize.
#[derive(Debug, PartialEq, Eq)]
pub enum Response {
    Connect(ConnectResponse),
    Announce(AnnounceResponse),
    Scrape(ScrapeResponse),
    Error(ErrorResponse),
}

#[derive(Debug, PartialEq, Eq)]
pub struct ConnectResponse {
    pub transaction_id: TransactionId,
    pub connection_id: u64,
}

/// An IPv4 peer record of the announce response.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct ResponsePeer {
    pub ip_address: Ipv4Addr,
    pub port: u16,
}

#[derive(Debug, PartialEq, Eq)]
pub struct AnnounceResponse {
    pub transaction_id: TransactionId,
    pub interval: u32,
    pub leechers: u32,
    pub seeders: u32,
    pub peers: Vec<ResponsePeer>,
}

/// One torrent's counters in a scrape response. Order matches the request.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct TorrentScrapeStatistics {
    pub seeders: u32,
    pub completed: u32,
    pub leechers: u32,
}

#[derive(Debug, PartialEq, Eq)]
pub struct ScrapeResponse {
    pub transaction_id: TransactionId,
    pub torrent_stats: Vec<TorrentScrapeStatistics>,
}

#[derive(Debug, PartialEq, Eq)]
pub struct ErrorResponse {
    pub transaction_id: TransactionId,
    pub message: String,
}

impl Response {
    /// It serializes the frame into a fresh buffer.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(64);

        match self {
            Response::Connect(connect) => {
                bytes.extend_from_slice(&ACTION_CONNECT.to_be_bytes());
                bytes.extend_from_slice(&connect.transaction_id.0.to_be_bytes());
                bytes.extend_from_slice(&connect.connection_id.to_be_bytes());
            }
            Response::Announce(announce) => {
                bytes.extend_from_slice(&ACTION_ANNOUNCE.to_be_bytes());
                bytes.extend_from_slice(&announce.transaction_id.0.to_be_bytes());
                bytes.extend_from_slice(&announce.interval.to_be_bytes());
                bytes.extend_from_slice(&announce.leechers.to_be_bytes());
                bytes.extend_from_slice(&announce.seeders.to_be_bytes());
                for peer in &announce.peers {
                    bytes.extend_from_slice(&peer.ip_address.octets());
                    bytes.extend_from_slice(&peer.port.to_be_bytes());
                }
            }
            Response::Scrape(scrape) => {
                bytes.extend_from_slice(&ACTION_SCRAPE.to_be_bytes());
                bytes.extend_from_slice(&scrape.transaction_id.0.to_be_bytes());
                for stats in &scrape.torrent_stats {
                    bytes.extend_from_slice(&stats.seeders.to_be_bytes());
                    bytes.extend_from_slice(&stats.completed.to_be_bytes());
                    bytes.extend_from_slice(&stats.leechers.to_be_bytes());
                }
            }
            Response::Error(error) => {
                bytes.extend_from_slice(&ACTION_ERROR.to_be_bytes());
                bytes.extend_from_slice(&error.transaction_id.0.to_be_bytes());
                bytes.extend_from_slice(error.message.as_bytes());
            }
        }

        bytes
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::{AnnounceResponse, ConnectResponse, ErrorResponse, Response, ResponsePeer, ScrapeResponse, TorrentScrapeStatistics};
    use crate::servers::udp::request::TransactionId;

    #[test]
    fn a_connect_response_should_be_16_bytes() {
        let response = Response::Connect(ConnectResponse {
            transaction_id: TransactionId(12345),
            connection_id: 0x1122_3344_5566_7788,
        });

        let bytes = response.to_bytes();

        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[0..4], &[0, 0, 0, 0]);
        assert_eq!(&bytes[4..8], &12345u32.to_be_bytes());
        assert_eq!(&bytes[8..16], &0x1122_3344_5566_7788u64.to_be_bytes());
    }

    #[test]
    fn an_announce_response_should_append_6_byte_peer_records() {
        let response = Response::Announce(AnnounceResponse {
            transaction_id: TransactionId(7),
            interval: 1800,
            leechers: 2,
            seeders: 3,
            peers: vec![
                ResponsePeer {
                    ip_address: Ipv4Addr::new(105, 105, 105, 105),
                    port: 0x7070,
                },
                ResponsePeer {
                    ip_address: Ipv4Addr::new(1, 2, 3, 4),
                    port: 80,
                },
            ],
        });

        let bytes = response.to_bytes();

        assert_eq!(bytes.len(), 20 + 2 * 6);
        assert_eq!(&bytes[0..4], &1u32.to_be_bytes());
        assert_eq!(&bytes[8..12], &1800u32.to_be_bytes());
        assert_eq!(&bytes[12..16], &2u32.to_be_bytes());
        assert_eq!(&bytes[16..20], &3u32.to_be_bytes());
        assert_eq!(&bytes[20..26], &[105, 105, 105, 105, 0x70, 0x70]);
        assert_eq!(&bytes[26..32], &[1, 2, 3, 4, 0, 80]);
    }

    #[test]
    fn a_scrape_response_should_pack_three_counters_per_torrent() {
        let response = Response::Scrape(ScrapeResponse {
            transaction_id: TransactionId(9),
            torrent_stats: vec![TorrentScrapeStatistics {
                seeders: 1,
                completed: 2,
                leechers: 3,
            }],
        });

        let bytes = response.to_bytes();

        assert_eq!(bytes.len(), 8 + 12);
        assert_eq!(&bytes[0..4], &2u32.to_be_bytes());
        assert_eq!(&bytes[8..12], &1u32.to_be_bytes());
        assert_eq!(&bytes[12..16], &2u32.to_be_bytes());
        assert_eq!(&bytes[16..20], &3u32.to_be_bytes());
    }

    #[test]
    fn an_error_response_should_carry_the_utf8_message() {
        let response = Response::Error(ErrorResponse {
            transaction_id: TransactionId(1),
            message: "Invalid connection id".to_string(),
        });

        let bytes = response.to_bytes();

        assert_eq!(&bytes[0..4], &3u32.to_be_bytes());
        assert_eq!(&bytes[8..], b"Invalid connection id");
    }
}
