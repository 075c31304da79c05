//! `Announce` request for the HTTP tracker.
//!
//! Data structures and logic for parsing the `announce` request.
use std::str::FromStr;

use thiserror::Error;

use crate::core::auth::AnnounceKey;
use crate::core::peer::{self, AnnounceEvent};
use crate::servers::http::query::{ParseQueryError, Query};
use crate::shared::bit_torrent::info_hash::InfoHash;

// Query param names
const INFO_HASH: &str = "info_hash";
const PEER_ID: &str = "peer_id";
const PORT: &str = "port";
const UPLOADED: &str = "uploaded";
const DOWNLOADED: &str = "downloaded";
const LEFT: &str = "left";
const EVENT: &str = "event";
const NUMWANT: &str = "numwant";
const COMPACT: &str = "compact";
const KEY: &str = "key";

/// `numwant` values outside `1..=200` fall back to this.
const DEFAULT_NUM_WANT: usize = 50;

/// The `Announce` request. Fields use the domain types after parsing the
/// query params of the request.
///
/// The peer IP is deliberately absent: it is resolved from the connection and
/// the forwarding headers, never from a query param.
#[derive(Debug, PartialEq)]
pub struct Announce {
    pub info_hash: InfoHash,
    pub peer_id: peer::Id,
    /// The port the peer listens on, `1..=65535`.
    pub port: u16,
    pub uploaded: u64,
    pub downloaded: u64,
    pub left: u64,
    /// Absent or empty `event` means a regular interval announce.
    pub event: AnnounceEvent,
    /// How many peers the client wants, already clamped.
    pub num_want: usize,
    /// Whether the response uses the compact peer format. Defaults to true.
    pub compact: bool,
    /// The anti-spoof key a returning peer echoes.
    pub key: Option<AnnounceKey>,
}

/// Errors that can occur when parsing the `Announce` request.
///
/// The messages surface verbatim inside the bencoded `failure reason`.
#[derive(Error, Debug)]
pub enum ParseAnnounceQueryError {
    #[error("missing query params for announce request")]
    MissingParams {
        #[from]
        source: ParseQueryError,
    },
    #[error("missing {param_name}")]
    MissingParam { param_name: &'static str },
    #[error("invalid {param_name}")]
    InvalidParam { param_name: &'static str },
}

impl Announce {
    /// It parses the raw query string of an announce URL.
    ///
    /// # Errors
    ///
    /// Will return a [`ParseAnnounceQueryError`] when a required param is
    /// missing or any param fails to parse into its domain type.
    pub fn from_raw_query(raw_query: &str) -> Result<Self, ParseAnnounceQueryError> {
        let query = raw_query.parse::<Query>()?;

        Ok(Self {
            info_hash: extract_info_hash(&query)?,
            peer_id: extract_peer_id(&query)?,
            port: extract_port(&query)?,
            uploaded: extract_number(&query, UPLOADED)?,
            downloaded: extract_number(&query, DOWNLOADED)?,
            left: extract_number(&query, LEFT)?,
            event: extract_event(&query)?,
            num_want: extract_num_want(&query),
            compact: extract_compact(&query)?,
            key: extract_key(&query)?,
        })
    }
}

fn raw_param<'a>(query: &'a Query, name: &'static str) -> Result<&'a [u8], ParseAnnounceQueryError> {
    query
        .get_param_bytes(name)
        .ok_or(ParseAnnounceQueryError::MissingParam { param_name: name })
}

fn extract_info_hash(query: &Query) -> Result<InfoHash, ParseAnnounceQueryError> {
    let raw = raw_param(query, INFO_HASH)?;

    InfoHash::try_from(raw.to_vec()).map_err(|_| ParseAnnounceQueryError::InvalidParam { param_name: INFO_HASH })
}

fn extract_peer_id(query: &Query) -> Result<peer::Id, ParseAnnounceQueryError> {
    let raw = raw_param(query, PEER_ID)?;

    peer::Id::try_from(raw.to_vec()).map_err(|_| ParseAnnounceQueryError::InvalidParam { param_name: PEER_ID })
}

fn extract_port(query: &Query) -> Result<u16, ParseAnnounceQueryError> {
    let raw = query
        .get_param(PORT)
        .ok_or(ParseAnnounceQueryError::MissingParam { param_name: PORT })?;

    match raw.parse::<u16>() {
        Ok(0) | Err(_) => Err(ParseAnnounceQueryError::InvalidParam { param_name: PORT }),
        Ok(port) => Ok(port),
    }
}

fn extract_number(query: &Query, name: &'static str) -> Result<u64, ParseAnnounceQueryError> {
    let raw = query
        .get_param(name)
        .ok_or(ParseAnnounceQueryError::MissingParam { param_name: name })?;

    raw.parse::<u64>()
        .map_err(|_| ParseAnnounceQueryError::InvalidParam { param_name: name })
}

fn extract_event(query: &Query) -> Result<AnnounceEvent, ParseAnnounceQueryError> {
    match query.get_param(EVENT).as_deref() {
        None | Some("") => Ok(AnnounceEvent::None),
        Some("started") => Ok(AnnounceEvent::Started),
        Some("stopped") => Ok(AnnounceEvent::Stopped),
        Some("completed") => Ok(AnnounceEvent::Completed),
        Some(_) => Err(ParseAnnounceQueryError::InvalidParam { param_name: EVENT }),
    }
}

fn extract_num_want(query: &Query) -> usize {
    match query.get_param(NUMWANT).map(|raw| raw.parse::<usize>()) {
        Some(Ok(num_want)) if (1..=200).contains(&num_want) => num_want,
        _ => DEFAULT_NUM_WANT,
    }
}

fn extract_compact(query: &Query) -> Result<bool, ParseAnnounceQueryError> {
    match query.get_param(COMPACT).as_deref() {
        None => Ok(true),
        Some("1") => Ok(true),
        Some("0") => Ok(false),
        Some(_) => Err(ParseAnnounceQueryError::InvalidParam { param_name: COMPACT }),
    }
}

fn extract_key(query: &Query) -> Result<Option<AnnounceKey>, ParseAnnounceQueryError> {
    match query.get_param(KEY) {
        None => Ok(None),
        Some(raw) => AnnounceKey::from_str(&raw)
            .map(Some)
            .map_err(|_| ParseAnnounceQueryError::InvalidParam { param_name: KEY }),
    }
}

#[cfg(test)]
mod tests {
    use super::{Announce, ParseAnnounceQueryError};
    use crate::core::peer::{AnnounceEvent, Id};
    use crate::shared::bit_torrent::info_hash::InfoHash;

    fn sample_query() -> String {
        [
            "info_hash=%3B%24U%04%CF%5F%11%BB%DB%E1%20%1C%EAjk%F4Z%EE%1B%C0",
            "peer_id=-qB00000000000000001",
            "port=17548",
            "uploaded=1",
            "downloaded=2",
            "left=3",
        ]
        .join("&")
    }

    #[test]
    fn it_should_parse_a_complete_announce() {
        let query = format!("{}&event=started&numwant=42&compact=0", sample_query());

        let announce = Announce::from_raw_query(&query).unwrap();

        assert_eq!(
            announce.info_hash,
            "3b245504cf5f11bbdbe1201cea6a6bf45aee1bc0".parse::<InfoHash>().unwrap()
        );
        assert_eq!(announce.peer_id, Id(*b"-qB00000000000000001"));
        assert_eq!(announce.port, 17548);
        assert_eq!((announce.uploaded, announce.downloaded, announce.left), (1, 2, 3));
        assert_eq!(announce.event, AnnounceEvent::Started);
        assert_eq!(announce.num_want, 42);
        assert!(!announce.compact);
        assert_eq!(announce.key, None);
    }

    #[test]
    fn optional_params_should_default() {
        let announce = Announce::from_raw_query(&sample_query()).unwrap();

        assert_eq!(announce.event, AnnounceEvent::None);
        assert_eq!(announce.num_want, 50);
        assert!(announce.compact);
    }

    #[test]
    fn an_empty_event_should_be_a_regular_announce() {
        let query = format!("{}&event=", sample_query());

        assert_eq!(Announce::from_raw_query(&query).unwrap().event, AnnounceEvent::None);
    }

    #[test]
    fn missing_required_params_should_name_the_param() {
        let query = sample_query().replace("&left=3", "");

        let err = Announce::from_raw_query(&query).unwrap_err();
        assert_eq!(err.to_string(), "missing left");
    }

    #[test]
    fn a_wrong_size_info_hash_should_be_invalid() {
        let query = sample_query().replace(
            "info_hash=%3B%24U%04%CF%5F%11%BB%DB%E1%20%1C%EAjk%F4Z%EE%1B%C0",
            "info_hash=deadbeef",
        );

        let err = Announce::from_raw_query(&query).unwrap_err();
        assert_eq!(err.to_string(), "invalid info_hash");
    }

    #[test]
    fn a_zero_port_should_be_invalid() {
        let query = sample_query().replace("port=17548", "port=0");

        assert!(matches!(
            Announce::from_raw_query(&query),
            Err(ParseAnnounceQueryError::InvalidParam { param_name: "port" })
        ));
    }

    #[test]
    fn out_of_range_numwant_values_should_fall_back_to_the_default() {
        for numwant in ["0", "201", "abc", "-5"] {
            let query = format!("{}&numwant={numwant}", sample_query());
            assert_eq!(Announce::from_raw_query(&query).unwrap().num_want, 50, "numwant={numwant}");
        }
    }

    #[test]
    fn an_unknown_event_should_be_invalid() {
        let query = format!("{}&event=paused", sample_query());

        assert!(matches!(
            Announce::from_raw_query(&query),
            Err(ParseAnnounceQueryError::InvalidParam { param_name: "event" })
        ));
    }

    #[test]
    fn a_returning_peer_key_should_be_parsed() {
        let query = format!("{}&key=00112233445566aa", sample_query());

        let announce = Announce::from_raw_query(&query).unwrap();
        assert_eq!(announce.key.unwrap().value(), "00112233445566aa");
    }

    #[test]
    fn a_malformed_key_should_be_invalid() {
        let query = format!("{}&key=zzz", sample_query());

        assert!(matches!(
            Announce::from_raw_query(&query),
            Err(ParseAnnounceQueryError::InvalidParam { param_name: "key" })
        ));
    }
}
