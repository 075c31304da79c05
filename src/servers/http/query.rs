//! The `Query` struct used to parse and store URL query parameters.
//!
//! Axum's own query extractors assume UTF-8, which mangles the binary
//! `info_hash` and `peer_id` parameters. This parser keeps every decoded
//! value as raw bytes and repeated parameters as a multi-valued entry
//! (a scrape can carry many `info_hash=` params).
use std::str::FromStr;

use multimap::MultiMap;
use thiserror::Error;

use super::percent_encoding::percent_decode_bytes;

type ParamName = String;

/// It represents a URL query component: ordered name to raw-bytes values.
#[derive(Debug)]
pub struct Query {
    params: MultiMap<ParamName, Vec<u8>>,
}

impl Query {
    /// It returns the first value for a param, decoded as UTF-8.
    ///
    /// Binary values that do not decode return `None`, the same as an absent
    /// param; callers that expect binary use [`Query::get_param_bytes`].
    #[must_use]
    pub fn get_param(&self, name: &str) -> Option<String> {
        self.params
            .get(name)
            .and_then(|value| String::from_utf8(value.clone()).ok())
    }

    /// It returns the first value for a param as raw bytes.
    #[must_use]
    pub fn get_param_bytes(&self, name: &str) -> Option<&[u8]> {
        self.params.get(name).map(Vec::as_slice)
    }

    /// It returns all the values of a repeated param, in query order.
    #[must_use]
    pub fn get_param_vec_bytes(&self, name: &str) -> Option<&Vec<Vec<u8>>> {
        self.params.get_vec(name)
    }

    #[must_use]
    pub fn has_param(&self, name: &str) -> bool {
        self.params.contains_key(name)
    }
}

/// This error can be returned when parsing a [`Query`] from a string.
#[derive(Error, Debug)]
pub enum ParseQueryError {
    /// Invalid URL query param. For example `"name=value=value"`: it contains
    /// an unescaped `=` character.
    #[error("invalid param {raw_param}")]
    InvalidParam { raw_param: String },
}

impl FromStr for Query {
    type Err = ParseQueryError;

    fn from_str(raw_query: &str) -> Result<Self, Self::Err> {
        let mut params: MultiMap<ParamName, Vec<u8>> = MultiMap::new();

        for raw_param in raw_query.trim().trim_start_matches('?').split('&') {
            if raw_param.is_empty() {
                continue;
            }

            let mut parts = raw_param.splitn(2, '=');
            let raw_name = parts.next().expect("splitn yields at least one part");
            let raw_value = parts.next().unwrap_or("");

            if raw_value.contains('=') {
                return Err(ParseQueryError::InvalidParam {
                    raw_param: raw_param.to_string(),
                });
            }

            let name = String::from_utf8(percent_decode_bytes(raw_name)).map_err(|_| ParseQueryError::InvalidParam {
                raw_param: raw_param.to_string(),
            })?;

            params.insert(name, percent_decode_bytes(raw_value));
        }

        Ok(Self { params })
    }
}
