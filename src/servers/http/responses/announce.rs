//! `Announce` response for the HTTP tracker.
//!
//! Two shapes exist:
//!
//! - **Compact** ([BEP 23](https://www.bittorrent.org/beps/bep_0023.html)):
//!   `peers` is a byte string of 6-byte records (IPv4 address + big-endian
//!   port). IPv6 peers go into `peers6` as 18-byte records
//!   ([BEP 7](https://www.bittorrent.org/beps/bep_0007.html)); the key is
//!   absent when no IPv6 peer is returned.
//! - **Normal**: `peers` is a list of `{"ip", "port"}` dictionaries.
//!
//! Both shapes carry `complete`, `incomplete`, `interval` and the anti-spoof
//! `tracker id`.
use std::collections::BTreeMap;
use std::net::IpAddr;

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::core::AnnounceData;
use crate::shared::bit_torrent::bencode::Value;

/// The `announce` response payload.
#[derive(Debug)]
pub struct Announce {
    pub data: AnnounceData,
    pub compact: bool,
}

impl Announce {
    /// Returns the bencoded body.
    #[must_use]
    pub fn body(&self) -> Vec<u8> {
        let mut dict = BTreeMap::new();

        dict.insert(b"complete".to_vec(), Value::int(i64::from(self.data.seeders)));
        dict.insert(b"incomplete".to_vec(), Value::int(i64::from(self.data.leechers)));
        dict.insert(b"interval".to_vec(), Value::int(i64::from(self.data.interval)));
        dict.insert(b"tracker id".to_vec(), Value::bytes(self.data.announce_key.value().as_bytes()));

        if self.compact {
            let (peers, peers6) = compact_peer_records(&self.data);

            dict.insert(b"peers".to_vec(), Value::Bytes(peers));
            if let Some(peers6) = peers6 {
                dict.insert(b"peers6".to_vec(), Value::Bytes(peers6));
            }
        } else {
            let peers = self
                .data
                .peers
                .iter()
                .map(|peer| {
                    let mut entry = BTreeMap::new();
                    entry.insert(b"ip".to_vec(), Value::bytes(peer.ip().to_string().into_bytes()));
                    entry.insert(b"port".to_vec(), Value::int(i64::from(peer.port())));
                    Value::Dict(entry)
                })
                .collect();

            dict.insert(b"peers".to_vec(), Value::List(peers));
        }

        Value::Dict(dict).encode()
    }
}

/// It packs IPv4 peers into 6-byte records and IPv6 peers into 18-byte
/// records. The second element is `None` when there is no IPv6 peer.
fn compact_peer_records(data: &AnnounceData) -> (Vec<u8>, Option<Vec<u8>>) {
    let mut peers = Vec::new();
    let mut peers6 = Vec::new();

    for peer in &data.peers {
        match peer.ip() {
            IpAddr::V4(ip) => {
                peers.extend_from_slice(&ip.octets());
                peers.extend_from_slice(&peer.port().to_be_bytes());
            }
            IpAddr::V6(ip) => {
                peers6.extend_from_slice(&ip.octets());
                peers6.extend_from_slice(&peer.port().to_be_bytes());
            }
        }
    }

    (peers, (!peers6.is_empty()).then_some(peers6))
}

impl IntoResponse for Announce {
    fn into_response(self) -> Response {
        (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            self.body(),
        )
            .into_response()
    }
}
