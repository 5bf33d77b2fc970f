//! Wire adapter error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WireError {
    /// No usable origin could be constructed for the inbound request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("malformed url: {0}")]
    Url(#[from] url::ParseError),

    #[error("http error: {0}")]
    Http(#[from] http::Error),

    /// The host or sandbox body stream failed mid-flight.
    #[error("body stream error: {0}")]
    Body(String),

    /// The host response sink rejected a write.
    #[error("host sink error: {0}")]
    Sink(String),
}
