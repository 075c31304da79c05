//! The HTTP tracker: announce and scrape over HTTP
//! ([BEP 3](https://www.bittorrent.org/beps/bep_0003.html)) with compact peer
//! lists ([BEP 23](https://www.bittorrent.org/beps/bep_0023.html)) and IPv6
//! extensions ([BEP 7](https://www.bittorrent.org/beps/bep_0007.html)).
//!
//! Endpoints:
//!
//! - `GET /{passkey}/announce`
//! - `GET /{passkey}/scrape`
//! - `GET /health`
//! - `GET /stats`
//!
//! Errors are bencoded into the body under `failure reason`; the HTTP status
//! is always `200 OK` because `BitTorrent` clients do not reliably read
//! non-2xx bodies.
pub mod extractors;
pub mod handlers;
pub mod percent_encoding;
pub mod query;
pub mod requests;
pub mod responses;
pub mod routes;
pub mod server;
