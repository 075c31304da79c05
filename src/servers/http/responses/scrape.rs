//! `Scrape` response for the HTTP tracker.
//!
//! A dictionary with one key, `files`, mapping each requested 20-byte
//! `info_hash` to its `{complete, downloaded, incomplete}` counters.
use std::collections::BTreeMap;

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::core::ScrapeData;
use crate::shared::bit_torrent::bencode::Value;

/// The `scrape` response payload.
#[derive(Debug)]
pub struct Scrape {
    pub data: ScrapeData,
}

impl Scrape {
    /// Returns the bencoded body.
    #[must_use]
    pub fn body(&self) -> Vec<u8> {
        let mut files = BTreeMap::new();

        for (info_hash, counts) in &self.data.files {
            let mut entry = BTreeMap::new();
            entry.insert(b"complete".to_vec(), Value::int(i64::from(counts.seeders)));
            entry.insert(b"downloaded".to_vec(), Value::int(i64::from(counts.completed)));
            entry.insert(b"incomplete".to_vec(), Value::int(i64::from(counts.leechers)));

            files.insert(info_hash.bytes().to_vec(), Value::Dict(entry));
        }

        let mut dict = BTreeMap::new();
        dict.insert(b"files".to_vec(), Value::Dict(files));

        Value::Dict(dict).encode()
    }
}

impl IntoResponse for Scrape {
    fn into_response(self) -> Response {
        (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            self.body(),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::Scrape;
    use crate::core::swarm::SwarmCounts;
    use crate::core::ScrapeData;
    use crate::shared::bit_torrent::info_hash::InfoHash;

    #[test]
    fn it_should_bencode_one_entry_per_torrent() {
        let mut data = ScrapeData::default();
        data.files.insert(
            InfoHash([0x41; 20]), // "AAAA..." keeps the expected string printable
            SwarmCounts {
                seeders: 1,
                leechers: 2,
                completed: 3,
            },
        );

        let response = Scrape { data };

        let body = String::from_utf8(response.body()).unwrap();

        assert_eq!(
            body,
            "d5:filesd20:AAAAAAAAAAAAAAAAAAAAd8:completei1e10:downloadedi3e10:incompletei2eeee"
        );
    }

    #[test]
    fn an_empty_scrape_should_still_carry_the_files_key() {
        let response = Scrape {
            data: ScrapeData::default(),
        };

        assert_eq!(response.body(), b"d5:filesdee".to_vec());
    }
}
