//! The UDP tracker, speaking
//! [BEP 15. UDP Tracker Protocol for `BitTorrent`](https://www.bittorrent.org/beps/bep_0015.html).
//!
//! The protocol is a two-step handshake over one socket: a `connect` request
//! buys a `connection_id` valid for a couple of minutes, and subsequent
//! `announce`/`scrape` requests must carry it. The id proves the client can
//! receive at its claimed source address, which stops trivial source-address
//! spoofing.
//!
//! All integers on the wire are big-endian.
//!
//! ```text
//! connect request    = protocol_id(8) action(4)=0 transaction_id(4)
//! connect response   = action(4)=0 transaction_id(4) connection_id(8)
//! announce request   = connection_id(8) action(4)=1 transaction_id(4)
//!                      info_hash(20) peer_id(20) downloaded(8) left(8)
//!                      uploaded(8) event(4) ip(4) key(4) num_want(4) port(2)
//! announce response  = action(4)=1 transaction_id(4) interval(4) leechers(4)
//!                      seeders(4) {ip(4) port(2)}*
//! scrape request     = connection_id(8) action(4)=2 transaction_id(4)
//!                      info_hash(20)+
//! scrape response    = action(4)=2 transaction_id(4)
//!                      {seeders(4) completed(4) leechers(4)}*
//! error response     = action(4)=3 transaction_id(4) message
//! ```
//!
//! > **NOTICE**: UDP announces carry no passkey, so UDP peers are anonymous:
//! > they join swarms and receive peers, but no transfer volume can be
//! > attributed to a user. This is a protocol limitation, not a bug.
pub mod connection_id;
pub mod error;
pub mod handlers;
pub mod request;
pub mod response;
pub mod server;

/// The magic `protocol_id` of the connect request.
pub const PROTOCOL_ID: u64 = 0x0417_2710_1980;

/// Maximum accepted/emitted datagram size.
pub const MAX_PACKET_SIZE: usize = 2048;
