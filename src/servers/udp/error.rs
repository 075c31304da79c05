//! Errors of the UDP tracker request path.
use thiserror::Error;

use super::request::ParseError;
use crate::core;

#[derive(Debug, Error)]
pub enum Error {
    #[error("bad request: {source}")]
    BadRequest {
        #[from]
        source: ParseError,
    },
    /// The announce or scrape carried an id the server never issued or
    /// already expired.
    #[error("Invalid connection id")]
    InvalidConnectionId,
    #[error("{source}")]
    Core {
        #[from]
        source: core::Error,
    },
}

impl Error {
    /// The UTF-8 message placed in the error frame.
    #[must_use]
    pub fn frame_message(&self) -> String {
        match self {
            Error::BadRequest { source } => format!("Bad request: {source}"),
            Error::InvalidConnectionId => "Invalid connection id".to_string(),
            Error::Core { source } => source.failure_reason(),
        }
    }
}
