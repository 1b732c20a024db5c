//! Middleware Components
//!
//! Every request gets a [`RequestId`] and runs inside a `request` span that
//! carries it, so matchmaking, settlement and ledger log lines emitted while
//! serving it can be correlated with the `x-request-id` the client sees.

use axum::{
    extract::Request,
    http::{HeaderMap, HeaderName, HeaderValue, Method},
    middleware::Next,
    response::Response,
};
use std::time::Instant;
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer, ExposeHeaders};
use tracing::{debug, info, info_span, Instrument};
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";
/// Milliseconds spent serving the request, set on every response
pub const RESPONSE_TIME_HEADER: &str = "x-response-time-ms";

/// Methods used by the route table; reads are GET, every mutation is POST
pub const ALLOWED_METHODS: [Method; 3] = [Method::GET, Method::POST, Method::OPTIONS];

/// Longest client-supplied id that is echoed back instead of replaced
const MAX_REQUEST_ID_LEN: usize = 128;

/// Correlation id attached to the request extensions and error bodies
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

impl RequestId {
    /// Reuse the caller's id when it is short printable ASCII; mint one otherwise
    pub fn from_headers(headers: &HeaderMap) -> Self {
        headers
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty() && s.len() <= MAX_REQUEST_ID_LEN)
            .map(|s| Self(s.to_string()))
            .unwrap_or_else(Self::generate)
    }

    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

/// CORS for the configured origins; empty or `*` allows any origin
pub fn create_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origin = if allowed_origins.is_empty() || allowed_origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(
            allowed_origins
                .iter()
                .filter_map(|o| o.parse::<HeaderValue>().ok()),
        )
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods(ALLOWED_METHODS.to_vec())
        .allow_headers(AllowHeaders::list([
            axum::http::header::CONTENT_TYPE,
            HeaderName::from_static(REQUEST_ID_HEADER),
        ]))
        .expose_headers(ExposeHeaders::list([
            HeaderName::from_static(REQUEST_ID_HEADER),
            HeaderName::from_static(RESPONSE_TIME_HEADER),
        ]))
}

/// Tag the request with its id, serve it inside a span, and stamp the
/// response with the id and the time taken
pub async fn request_context_middleware(mut request: Request, next: Next) -> Response {
    let request_id = RequestId::from_headers(request.headers());
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    request.extensions_mut().insert(request_id.clone());

    let span = info_span!("request", request_id = %request_id.0, %method, %path);
    let started = Instant::now();
    let mut response = next.run(request).instrument(span.clone()).await;
    let elapsed_ms = started.elapsed().as_millis();

    let status = response.status();
    span.in_scope(|| {
        // Mutations move lobbies or money; reads only log at debug
        if method == Method::POST || status.is_server_error() {
            info!(status = status.as_u16(), elapsed_ms, "Request served");
        } else {
            debug!(status = status.as_u16(), elapsed_ms, "Request served");
        }
    });

    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&request_id.0) {
        headers.insert(REQUEST_ID_HEADER, value);
    }
    headers.insert(RESPONSE_TIME_HEADER, HeaderValue::from(elapsed_ms as u64));
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_id_reuses_valid_header() {
        let mut headers = HeaderMap::new();
        headers.insert(REQUEST_ID_HEADER, HeaderValue::from_static(" req-7 "));
        assert_eq!(RequestId::from_headers(&headers), RequestId("req-7".into()));
    }

    #[test]
    fn test_request_id_replaces_missing_or_oversized() {
        let minted = RequestId::from_headers(&HeaderMap::new());
        assert!(Uuid::parse_str(&minted.0).is_ok());

        let mut headers = HeaderMap::new();
        let long = "x".repeat(MAX_REQUEST_ID_LEN + 1);
        headers.insert(REQUEST_ID_HEADER, HeaderValue::from_str(&long).unwrap());
        assert_ne!(RequestId::from_headers(&headers).0, long);
    }
}
