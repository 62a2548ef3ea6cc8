//! Shared plumbing for talking to Fluig servers.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("HTTP request failed: {0}")]
    Http(String),
    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },
    /// The platform answered but reported a failure.
    #[error("{0}")]
    Remote(String),
    #[error("unexpected response: {0}")]
    Decode(String),
    #[error("file error: {0}")]
    Io(String),
}

impl From<reqwest::Error> for PlatformError {
    fn from(e: reqwest::Error) -> Self {
        PlatformError::Http(format!("{e}"))
    }
}

/// Builds the HTTP client used for every platform call. Fluig installations
/// routinely run on self-signed certificates, so certificate validation is off.
pub fn http_client() -> Result<reqwest::Client, PlatformError> {
    reqwest::Client::builder()
        .danger_accept_invalid_certs(true)
        .timeout(Duration::from_secs(120))
        .build()
        .map_err(|e| PlatformError::Http(format!("failed to build HTTP client: {e}")))
}
