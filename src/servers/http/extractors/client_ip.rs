//! Axum extractor for the client IP.
//!
//! When an `X-Forwarded-For` header is present (the tracker behind a reverse
//! proxy), its first comma-separated token is the client. A malformed value
//! falls back to the socket address, which is also the answer for direct
//! connections.
//!
//! The resolved IP drives banning, rate limiting and peer recording; the IP a
//! client claims in query params is never trusted.
use std::net::{IpAddr, SocketAddr};

use axum::async_trait;
use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::request::Parts;
use axum::response::Response;

const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Extractor for the resolved client IP.
pub struct ExtractClientIp(pub IpAddr);

fn forwarded_for_ip(parts: &Parts) -> Option<IpAddr> {
    parts
        .headers
        .get(X_FORWARDED_FOR)?
        .to_str()
        .ok()?
        .split(',')
        .next()?
        .trim()
        .parse()
        .ok()
}

#[async_trait]
impl<S> FromRequestParts<S> for ExtractClientIp
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(ip) = forwarded_for_ip(parts) {
            return Ok(ExtractClientIp(ip));
        }

        let socket_ip = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip())
            .unwrap_or(IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED));

        Ok(ExtractClientIp(socket_ip))
    }
}

#[cfg(test)]
mod tests {
    use axum::http::Request;

    use super::forwarded_for_ip;

    fn parts_with_header(value: &str) -> axum::http::request::Parts {
        let (parts, ()) = Request::builder()
            .uri("/")
            .header("X-Forwarded-For", value)
            .body(())
            .unwrap()
            .into_parts();
        parts
    }

    #[test]
    fn the_first_forwarded_token_should_win() {
        let parts = parts_with_header("150.172.238.178, 70.41.3.18, 150.172.238.178");
        assert_eq!(forwarded_for_ip(&parts), Some("150.172.238.178".parse().unwrap()));
    }

    #[test]
    fn an_ipv6_forwarded_token_should_parse() {
        let parts = parts_with_header("2001:db8::1");
        assert_eq!(forwarded_for_ip(&parts), Some("2001:db8::1".parse().unwrap()));
    }

    #[test]
    fn a_malformed_header_should_fall_back_to_the_socket_address() {
        let parts = parts_with_header("not-an-ip");
        assert_eq!(forwarded_for_ip(&parts), None);
    }
}
