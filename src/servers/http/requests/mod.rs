//! Typed HTTP tracker requests, parsed from the raw query string.
pub mod announce;
pub mod scrape;
