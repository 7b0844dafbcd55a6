use std::time::Duration;

use reqwest::blocking::Client;
use serde_json::Value;

use crate::error::{Result, SealError};
use crate::providers::kms::{error_for_status, KmsService};

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Blocking JSON client with a bearer token.
pub(crate) struct BearerClient {
    service: KmsService,
    client: Client,
    token: Option<String>,
}

impl BearerClient {
    pub(crate) fn new(service: KmsService, token: Option<String>) -> Self {
        let timeout = std::env::var("SEALVAULT_KMS_HTTP_TIMEOUT_SECS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            service,
            client,
            token: token.filter(|token| !token.trim().is_empty()),
        }
    }

    fn bearer(&self) -> Result<String> {
        let token = self.token.as_deref().ok_or_else(|| {
            SealError::ServiceMisconfigured(format!("no access token configured for {}", self.service))
        })?;
        let trimmed = token.trim();
        if trimmed.to_ascii_lowercase().starts_with("bearer ") {
            Ok(trimmed.to_owned())
        } else {
            Ok(format!("Bearer {trimmed}"))
        }
    }

    /// POSTs `body` to `url` and returns the parsed JSON response.
    pub(crate) fn post_json(&self, url: &str, body: &Value) -> Result<Value> {
        let response = self
            .client
            .post(url)
            .header("Authorization", self.bearer()?)
            .json(body)
            .send()
            .map_err(|error| {
                SealError::RemoteUnavailable(format!("{} request failed: {error}", self.service))
            })?;

        let status = response.status();
        let text = response.text().unwrap_or_default();
        if !status.is_success() {
            tracing::debug!(service = %self.service, status = status.as_u16(), "key operation failed");
            return Err(error_for_status(self.service, status.as_u16(), &text));
        }
        serde_json::from_str(&text).map_err(|error| {
            SealError::RemoteUnavailable(format!(
                "failed to parse {} response: {error}",
                self.service
            ))
        })
    }
}

/// Reads a string field from a JSON response.
pub(crate) fn response_field<'a>(
    service: KmsService,
    response: &'a Value,
    field: &str,
) -> Result<&'a str> {
    response
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| SealError::RemoteUnavailable(format!("{service} response missing '{field}'")))
}
