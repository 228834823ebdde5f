//! Shared helpers for the reqwest-backed clients.

use crate::error::ClientError;

pub(crate) const USER_AGENT: &str = concat!("quarry-ingest/", env!("CARGO_PKG_VERSION"));

/// Turn a non-2xx response into [`ClientError::Api`].
pub(crate) async fn check_status(
    response: reqwest::Response,
) -> Result<reqwest::Response, ClientError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(ClientError::Api(format!("{status}: {body}")))
}
