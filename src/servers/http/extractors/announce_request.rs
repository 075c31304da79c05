//! Axum extractor for the `Announce` request.
//!
//! It parses the query parameters into an
//! [`Announce`](crate::servers::http::requests::announce::Announce) request,
//! rejecting with a bencoded `failure reason` (HTTP `200`) when they are
//! missing or invalid.
use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};

use crate::servers::http::requests::announce::Announce;
use crate::servers::http::responses;

/// Extractor for the [`Announce`] request.
pub struct ExtractRequest(pub Announce);

#[async_trait]
impl<S> FromRequestParts<S> for ExtractRequest
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match Announce::from_raw_query(parts.uri.query().unwrap_or_default()) {
            Ok(announce_request) => Ok(ExtractRequest(announce_request)),
            Err(error) => Err(responses::error::Error::from(error).into_response()),
        }
    }
}
