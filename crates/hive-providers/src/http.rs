//! Request plumbing shared by the HTTP adapters.

use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use tracing::{debug, error};

use hive_core::ProviderError;

/// Send a JSON request and decode the JSON reply.
///
/// Non-success statuses are classified into auth, rate-limit and API errors;
/// a body that does not decode is a malformed reply.
pub(crate) async fn send_json<T: DeserializeOwned>(
    provider: &str,
    request: RequestBuilder,
) -> Result<T, ProviderError> {
    let response = request
        .send()
        .await
        .map_err(|e| network_error(provider, e))?;

    let status = response.status();
    if !status.is_success() {
        let retry_after = retry_after(response.headers());
        let body = response.text().await.unwrap_or_default();
        error!(provider, status = status.as_u16(), "Provider API error: {}", body);
        return Err(ProviderError::from_status(
            provider,
            status.as_u16(),
            error_message(&body),
            retry_after,
        ));
    }

    let body = response
        .text()
        .await
        .map_err(|e| network_error(provider, e))?;
    debug!(provider, bytes = body.len(), "Provider reply received");

    serde_json::from_str(&body)
        .map_err(|e| ProviderError::malformed(provider, format!("unexpected reply body: {e}")))
}

fn network_error(provider: &str, error: reqwest::Error) -> ProviderError {
    ProviderError::NetworkError {
        provider: provider.to_string(),
        message: error.to_string(),
    }
}

/// `Retry-After` in delta-seconds form.
pub(crate) fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Pull the human message out of a vendor error body when there is one.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string())
}
