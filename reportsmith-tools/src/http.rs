//! Shared HTTP plumbing for the evidence providers.

use std::time::Duration;

use reportsmith_core::error::ProviderError;
use serde::de::DeserializeOwned;

pub const USER_AGENT: &str = concat!("reportsmith/", env!("CARGO_PKG_VERSION"));

/// Build the HTTP client used by one provider.
pub fn build_client(provider: &str) -> Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(20))
        .connect_timeout(Duration::from_secs(10))
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| ProviderError::Request {
            provider: provider.to_string(),
            message: format!("failed to create HTTP client: {e}"),
        })
}

/// Send `request` and return the body of a successful response.
pub async fn send_text(
    provider: &str,
    request: reqwest::RequestBuilder,
) -> Result<String, ProviderError> {
    let response = request.send().await.map_err(|e| ProviderError::Request {
        provider: provider.to_string(),
        message: e.to_string(),
    })?;

    let status = response.status();
    if !status.is_success() {
        return Err(ProviderError::Status {
            provider: provider.to_string(),
            status: status.as_u16(),
        });
    }

    response.text().await.map_err(|e| ProviderError::Request {
        provider: provider.to_string(),
        message: format!("failed to read response: {e}"),
    })
}

/// Deserialize a JSON response body.
pub fn parse_json<T: DeserializeOwned>(provider: &str, body: &str) -> Result<T, ProviderError> {
    serde_json::from_str(body).map_err(|e| ProviderError::Parse {
        provider: provider.to_string(),
        message: e.to_string(),
    })
}

/// Collapse runs of whitespace into single spaces.
pub fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
