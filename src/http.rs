//! Shared HTTP plumbing for the REST collaborators.
//!
//! Retry strategy (used by the model, embedding and index clients):
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use reqwest::{Client, RequestBuilder, Response};
use serde_json::Value;
use std::time::Duration;

use crate::error::ServiceError;

pub fn client(timeout_secs: u64) -> Result<Client, ServiceError> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| ServiceError::unavailable("http", e.to_string()))
}

pub fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(1 << (attempt.saturating_sub(1)).min(5))
}

/// Send a request, turning transport failures and non-2xx statuses into
/// [`ServiceError`]s.
pub async fn send(service: &str, request: RequestBuilder) -> Result<Response, ServiceError> {
    let response = request
        .send()
        .await
        .map_err(|e| ServiceError::from_reqwest(service, e))?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ServiceError::from_status(service, status, &body))
}

/// Send a request and decode the JSON body.
pub async fn send_json(service: &str, request: RequestBuilder) -> Result<Value, ServiceError> {
    let response = send(service, request).await?;
    response
        .json::<Value>()
        .await
        .map_err(|e| ServiceError::malformed(service, e.to_string()))
}

/// Like [`send_json`], retrying retryable failures with exponential backoff.
/// `build` is called once per attempt.
pub async fn send_json_with_retry<F>(
    service: &str,
    max_retries: u32,
    build: F,
) -> Result<Value, ServiceError>
where
    F: Fn() -> RequestBuilder,
{
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            tokio::time::sleep(backoff_delay(attempt)).await;
        }

        match send_json(service, build()).await {
            Ok(json) => return Ok(json),
            Err(e) if e.is_retryable() => {
                tracing::warn!(service, attempt, error = %e, "request failed, will retry");
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_err
        .unwrap_or_else(|| ServiceError::unavailable(service, "request failed after retries")))
}

/// Read an API key from the named environment variable.
pub fn api_key_from_env(service: &str, var: &str) -> Result<String, ServiceError> {
    match std::env::var(var) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ServiceError::auth(
            service,
            format!("{} environment variable not set", var),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_exponential_and_capped() {
        assert_eq!(backoff_delay(1), Duration::from_secs(1));
        assert_eq!(backoff_delay(2), Duration::from_secs(2));
        assert_eq!(backoff_delay(4), Duration::from_secs(8));
        assert_eq!(backoff_delay(6), Duration::from_secs(32));
        assert_eq!(backoff_delay(12), Duration::from_secs(32));
    }

    #[test]
    fn missing_key_is_auth_error() {
        let err = api_key_from_env("openai", "DRIVE_RAG_TEST_UNSET_KEY_VAR").unwrap_err();
        assert!(matches!(err, ServiceError::Auth { .. }));
        assert!(err.to_string().contains("DRIVE_RAG_TEST_UNSET_KEY_VAR"));
    }
}
