//! Axum extractors for the HTTP tracker.
//!
//! They parse the raw query string (the binary `info_hash`/`peer_id` params
//! never survive axum's UTF-8 query extractors) and resolve the client IP
//! from the connection and forwarding headers.
pub mod announce_request;
pub mod client_ip;
pub mod scrape_request;
