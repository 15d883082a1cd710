//! HTTP plumbing shared by the vendor providers

use crate::error::{FilterError, Result};
use reqwest::Client;
use reqwest::header::HeaderMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

pub(crate) fn build_client(timeout_secs: u64) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| FilterError::Client(e.to_string()))
}

/// Pull `error.message` out of a vendor error body
///
/// Both OpenAI and Anthropic wrap failures as `{"error": {"message": ...}}`.
pub(crate) fn vendor_error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    value
        .get("error")
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// POST a JSON body and decode the JSON answer
///
/// Non-success statuses become [`FilterError::Api`] carrying the status code
/// and the vendor's message, or the status reason when there is none.
pub(crate) async fn post_json<B, R>(
    client: &Client,
    vendor: &str,
    url: &str,
    headers: HeaderMap,
    body: &B,
) -> Result<R>
where
    B: Serialize + ?Sized,
    R: DeserializeOwned,
{
    debug!(vendor, url, "sending filter request");

    let response = client.post(url).headers(headers).json(body).send().await?;
    let status = response.status();

    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        let message = vendor_error_message(&text)
            .or_else(|| status.canonical_reason().map(str::to_string))
            .unwrap_or_default();
        warn!(vendor, status = status.as_u16(), %message, "LLM API request failed");
        return Err(FilterError::Api {
            status: status.as_u16(),
            message,
        });
    }

    Ok(response.json::<R>().await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vendor_error_message() {
        let body = r#"{"error": {"message": "Incorrect API key provided", "type": "invalid_request_error"}}"#;
        assert_eq!(
            vendor_error_message(body).as_deref(),
            Some("Incorrect API key provided")
        );
        assert_eq!(vendor_error_message("<html>bad gateway</html>"), None);
        assert_eq!(vendor_error_message(r#"{"detail": "x"}"#), None);
    }
}
