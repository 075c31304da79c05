//! Parsing of BEP 15 request frames.
use std::net::Ipv4Addr;

use super::{MAX_PACKET_SIZE, PROTOCOL_ID};
use crate::core::peer::{self, AnnounceEvent};
use crate::shared::bit_torrent::info_hash::InfoHash;

/// A server-issued connection id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

/// The client's transaction id, echoed verbatim in every response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionId(pub u32);

const ACTION_CONNECT: u32 = 0;
const ACTION_ANNOUNCE: u32 = 1;
const ACTION_SCRAPE: u32 = 2;

/// A parsed request frame.
#[derive(Debug, PartialEq)]
pub enum Request {
    Connect(ConnectRequest),
    Announce(AnnounceRequest),
    Scrape(ScrapeRequest),
}

#[derive(Debug, PartialEq, Eq)]
pub struct ConnectRequest {
    pub transaction_id: TransactionId,
}

#[derive(Debug, PartialEq)]
pub struct AnnounceRequest {
    pub connection_id: ConnectionId,
    pub transaction_id: TransactionId,
    pub info_hash: InfoHash,
    pub peer_id: peer::Id,
    pub downloaded: u64,
    pub left: u64,
    pub uploaded: u64,
    pub event: AnnounceEvent,
    /// The IPv4 address the client claims, `None` for `0` (use the source
    /// address). Ignored by this tracker: the source address always wins.
    pub ip_address: Option<Ipv4Addr>,
    /// Client-chosen key that survives address changes.
    pub key: u32,
    /// Negative values mean the server default.
    pub num_want: i32,
    pub port: u16,
}

#[derive(Debug, PartialEq, Eq)]
pub struct ScrapeRequest {
    pub connection_id: ConnectionId,
    pub transaction_id: TransactionId,
    pub info_hashes: Vec<InfoHash>,
}

/// Why a datagram failed to parse. Surfaced to the client as an error frame.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("packet too short")]
    PacketTooShort,
    #[error("packet too large")]
    PacketTooLarge,
    #[error("bad protocol identifier")]
    BadProtocolId,
    #[error("unknown action {0}")]
    UnknownAction(u32),
    #[error("scrape must carry between 1 and {max} info hashes")]
    BadScrapeLength { max: u8 },
}

/// A little-cursor over the datagram. All reads are bounds-checked once via
/// the length checks in `Request::parse`.
struct Reader<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, position: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.position
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], ParseError> {
        if self.remaining() < len {
            return Err(ParseError::PacketTooShort);
        }
        let slice = &self.bytes[self.position..self.position + len];
        self.position += len;
        Ok(slice)
    }

    fn read_u16(&mut self) -> Result<u16, ParseError> {
        Ok(u16::from_be_bytes(self.take(2)?.try_into().expect("exact length")))
    }

    fn read_u32(&mut self) -> Result<u32, ParseError> {
        Ok(u32::from_be_bytes(self.take(4)?.try_into().expect("exact length")))
    }

    fn read_u64(&mut self) -> Result<u64, ParseError> {
        Ok(u64::from_be_bytes(self.take(8)?.try_into().expect("exact length")))
    }

    fn read_info_hash(&mut self) -> Result<InfoHash, ParseError> {
        Ok(InfoHash::from_bytes(self.take(20)?))
    }
}

impl Request {
    /// It parses one datagram.
    ///
    /// # Errors
    ///
    /// Will return a [`ParseError`] for short or oversized packets, a wrong
    /// connect magic, an unknown action, or a scrape body that is not a
    /// non-empty multiple of 20 bytes within the limit.
    pub fn parse(bytes: &[u8], max_scrape_torrents: u8) -> Result<Request, ParseError> {
        if bytes.len() > MAX_PACKET_SIZE {
            return Err(ParseError::PacketTooLarge);
        }

        // Every request starts with 8 bytes (protocol id or connection id),
        // the action and the transaction id.
        if bytes.len() < 16 {
            return Err(ParseError::PacketTooShort);
        }

        let mut reader = Reader::new(bytes);

        let prefix = reader.read_u64()?;
        let action = reader.read_u32()?;
        let transaction_id = TransactionId(reader.read_u32()?);

        match action {
            ACTION_CONNECT => {
                if prefix != PROTOCOL_ID {
                    return Err(ParseError::BadProtocolId);
                }
                Ok(Request::Connect(ConnectRequest { transaction_id }))
            }
            ACTION_ANNOUNCE => {
                let connection_id = ConnectionId(prefix);

                let info_hash = reader.read_info_hash()?;
                let peer_id = peer::Id(reader.take(20)?.try_into().expect("exact length"));
                let downloaded = reader.read_u64()?;
                let left = reader.read_u64()?;
                let uploaded = reader.read_u64()?;
                #[allow(clippy::cast_possible_wrap)]
                let event = AnnounceEvent::from_i32(reader.read_u32()? as i32);
                let raw_ip = reader.read_u32()?;
                let key = reader.read_u32()?;
                #[allow(clippy::cast_possible_wrap)]
                let num_want = reader.read_u32()? as i32;
                let port = reader.read_u16()?;

                Ok(Request::Announce(AnnounceRequest {
                    connection_id,
                    transaction_id,
                    info_hash,
                    peer_id,
                    downloaded,
                    left,
                    uploaded,
                    event,
                    ip_address: (raw_ip != 0).then(|| Ipv4Addr::from(raw_ip)),
                    key,
                    num_want,
                    port,
                }))
            }
            ACTION_SCRAPE => {
                let connection_id = ConnectionId(prefix);

                let rest = reader.remaining();
                if rest == 0 || rest % 20 != 0 {
                    return Err(ParseError::BadScrapeLength { max: max_scrape_torrents });
                }

                let count = rest / 20;
                if count > usize::from(max_scrape_torrents) {
                    return Err(ParseError::BadScrapeLength { max: max_scrape_torrents });
                }

                let mut info_hashes = Vec::with_capacity(count);
                for _ in 0..count {
                    info_hashes.push(reader.read_info_hash()?);
                }

                Ok(Request::Scrape(ScrapeRequest {
                    connection_id,
                    transaction_id,
                    info_hashes,
                }))
            }
            action => Err(ParseError::UnknownAction(action)),
        }
    }
}
