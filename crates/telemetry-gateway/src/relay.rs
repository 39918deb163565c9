//! Verbatim relay to the collector
//!
//! Requests are forwarded with their method, path, query, headers and body
//! unchanged apart from hop-by-hop headers, and the collector's response is
//! returned as received. The gateway adds `X-Gateway-ID` so the collector can
//! see which edge a request came through.

use axum::{
    body::{Body, Bytes},
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

pub const GATEWAY_ID_HEADER: &str = "x-gateway-id";

/// Headers that describe one connection, not the message
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "host",
    "content-length",
    "transfer-encoding",
    "te",
    "trailer",
    "upgrade",
    "proxy-authorization",
    "proxy-authenticate",
];

/// Relay failures
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Failed to build HTTP client: {0}")]
    Client(String),

    #[error("Invalid gateway id header value: {0}")]
    InvalidGatewayId(String),

    #[error("Collector request timed out")]
    Timeout,

    #[error("Collector unreachable: {0}")]
    Upstream(String),
}

impl From<reqwest::Error> for RelayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RelayError::Timeout
        } else {
            RelayError::Upstream(err.to_string())
        }
    }
}

/// Copy `headers` without hop-by-hop entries
pub fn strip_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
    let mut out = headers.clone();
    for name in HOP_BY_HOP {
        out.remove(*name);
    }
    out
}

/// The collector's answer, passed through unchanged
#[derive(Debug)]
pub struct RelayedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl IntoResponse for RelayedResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

pub struct ProxyRelay {
    client: reqwest::Client,
    base_url: String,
    gateway_id: HeaderValue,
}

impl ProxyRelay {
    pub fn new(base_url: &str, gateway_id: &str, timeout: Duration) -> Result<Self, RelayError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RelayError::Client(e.to_string()))?;
        let gateway_id = HeaderValue::from_str(gateway_id)
            .map_err(|_| RelayError::InvalidGatewayId(gateway_id.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            gateway_id,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Forward one request and return the collector's response
    pub async fn forward(
        &self,
        method: Method,
        path_and_query: &str,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<RelayedResponse, RelayError> {
        let url = format!("{}{}", self.base_url, path_and_query);

        let mut outbound = strip_hop_by_hop(headers);
        outbound.insert(GATEWAY_ID_HEADER, self.gateway_id.clone());

        debug!(method = %method, url = %url, "Relaying request");

        let response = self
            .client
            .request(method.clone(), &url)
            .headers(outbound)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                warn!(method = %method, url = %url, error = %e, "Relay to collector failed");
                RelayError::from(e)
            })?;

        let status = response.status();
        let headers = strip_hop_by_hop(response.headers());
        let body = response.bytes().await?;

        debug!(status = %status, bytes = body.len(), "Collector responded");
        Ok(RelayedResponse {
            status,
            headers,
            body,
        })
    }
}
