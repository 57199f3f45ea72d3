//! Error types for the upstream API client.

use reqwest::StatusCode;

/// Failures surfaced by the transport and the typed API layer.
///
/// A rate-limited response (HTTP 429) is not a transport error; the transport
/// hands back whatever pages it read before the limit was hit. Endpoints that
/// need a complete listing turn it into [`ApiError::RateLimited`].
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {status} from {url}")]
    Status { status: StatusCode, url: String },

    #[error("malformed response body: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("rate limited while listing {path}")]
    RateLimited { path: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
