//! `Error` response for the HTTP tracker.
//!
//! From [BEP 3. The `BitTorrent` Protocol Specification](https://www.bittorrent.org/beps/bep_0003.html):
//!
//! _"If a tracker response has a key failure reason, then that maps to a
//! human readable string which explains why the query failed, and no other
//! keys are required."_
//!
//! > **NOTICE**: error responses are bencoded and always have a `200 OK`
//! > status code. Many clients never read the body of a non-2xx response.
use std::collections::BTreeMap;

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::core;
use crate::shared::bit_torrent::bencode::Value;

/// `Error` response for the HTTP tracker.
#[derive(Debug, PartialEq)]
pub struct Error {
    /// Human readable string which explains why the request failed.
    pub failure_reason: String,
}

impl Error {
    /// Returns the bencoded representation of the error.
    #[must_use]
    pub fn write(&self) -> Vec<u8> {
        let mut dict = BTreeMap::new();
        dict.insert(b"failure reason".to_vec(), Value::bytes(self.failure_reason.as_bytes()));
        Value::Dict(dict).encode()
    }
}

impl From<core::error::Error> for Error {
    fn from(err: core::error::Error) -> Self {
        Self {
            failure_reason: err.failure_reason(),
        }
    }
}

impl From<crate::servers::http::requests::announce::ParseAnnounceQueryError> for Error {
    fn from(err: crate::servers::http::requests::announce::ParseAnnounceQueryError) -> Self {
        Self {
            failure_reason: err.to_string(),
        }
    }
}

impl From<crate::servers::http::requests::scrape::ParseScrapeQueryError> for Error {
    fn from(err: crate::servers::http::requests::scrape::ParseScrapeQueryError) -> Self {
        Self {
            failure_reason: err.to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            self.write(),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::Error;

    #[test]
    fn http_tracker_errors_can_be_bencoded() {
        let err = Error {
            failure_reason: "error message".to_owned(),
        };

        assert_eq!(err.write(), b"d14:failure reason13:error messagee"); // cspell:disable-line
    }

    #[test]
    fn core_rejections_should_surface_their_wire_message() {
        let err = Error::from(crate::core::error::Error::InvalidPasskey);

        assert_eq!(err.failure_reason, "Invalid passkey");
    }
}
