//! `Scrape` request for the HTTP tracker.
use thiserror::Error;

use crate::servers::http::query::{ParseQueryError, Query};
use crate::shared::bit_torrent::info_hash::InfoHash;

const INFO_HASH: &str = "info_hash";

/// The `Scrape` request: one or more torrents to query.
#[derive(Debug, PartialEq)]
pub struct Scrape {
    pub info_hashes: Vec<InfoHash>,
}

/// Errors that can occur when parsing the `Scrape` request.
#[derive(Error, Debug)]
pub enum ParseScrapeQueryError {
    #[error("missing query params for scrape request")]
    MissingParams {
        #[from]
        source: ParseQueryError,
    },
    /// The scrape listed no `info_hash` at all.
    #[error("No info_hash provided")]
    NoInfoHash,
    #[error("invalid info_hash")]
    InvalidInfoHash,
}

impl Scrape {
    /// It parses the raw query string of a scrape URL. Repeated `info_hash`
    /// params form the list, in query order.
    ///
    /// # Errors
    ///
    /// Will return a [`ParseScrapeQueryError`] when no `info_hash` is present
    /// or any of them is not exactly 20 bytes.
    pub fn from_raw_query(raw_query: &str) -> Result<Self, ParseScrapeQueryError> {
        let query = raw_query.parse::<Query>()?;

        let raw_hashes = query.get_param_vec_bytes(INFO_HASH).ok_or(ParseScrapeQueryError::NoInfoHash)?;

        let mut info_hashes = Vec::with_capacity(raw_hashes.len());
        for raw in raw_hashes {
            info_hashes.push(InfoHash::try_from(raw.clone()).map_err(|_| ParseScrapeQueryError::InvalidInfoHash)?);
        }

        Ok(Self { info_hashes })
    }
}
