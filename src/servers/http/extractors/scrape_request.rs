//! Axum extractor for the `Scrape` request.
use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};

use crate::servers::http::requests::scrape::Scrape;
use crate::servers::http::responses;

/// Extractor for the [`Scrape`] request.
pub struct ExtractRequest(pub Scrape);

#[async_trait]
impl<S> FromRequestParts<S> for ExtractRequest
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match Scrape::from_raw_query(parts.uri.query().unwrap_or_default()) {
            Ok(scrape_request) => Ok(ExtractRequest(scrape_request)),
            Err(error) => Err(responses::error::Error::from(error).into_response()),
        }
    }
}
