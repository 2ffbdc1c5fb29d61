//! Language model client and call throttling.
//!
//! [`GeminiModel`] calls the Gemini `generateContent` REST endpoint with the
//! same retry/backoff policy as the embedding client. [`Throttled`] wraps any
//! [`LanguageModel`] so that calls are bounded in concurrency and spaced by a
//! minimum interval, which keeps metadata extraction rate-limited even when
//! files are ingested in parallel.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;

use crate::config::LlmConfig;
use crate::error::ServiceError;
use crate::http;
use crate::traits::{GenerateRequest, LanguageModel, Role};

const SERVICE: &str = "gemini";

// ============ Gemini ============

pub struct GeminiModel {
    model: String,
    base_url: String,
    api_key: String,
    max_output_tokens: u32,
    temperature: Option<f32>,
    max_retries: u32,
    client: reqwest::Client,
}

impl GeminiModel {
    pub fn new(config: &LlmConfig) -> Result<Self, ServiceError> {
        let api_key = http::api_key_from_env(SERVICE, &config.api_key_env)?;
        Ok(Self {
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            max_output_tokens: config.max_output_tokens,
            temperature: config.temperature,
            max_retries: config.max_retries,
            client: http::client(config.timeout_secs)?,
        })
    }

    fn request_body(&self, request: &GenerateRequest) -> Value {
        build_gemini_body(
            request,
            self.max_output_tokens,
            request.temperature.or(self.temperature),
        )
    }
}

#[async_trait]
impl LanguageModel for GeminiModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<String, ServiceError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let body = self.request_body(request);

        let json = http::send_json_with_retry(SERVICE, self.max_retries, || {
            self.client
                .post(&url)
                .header("x-goog-api-key", &self.api_key)
                .json(&body)
        })
        .await?;

        parse_gemini_response(&json)
    }
}

/// Build the `generateContent` request body.
pub fn build_gemini_body(
    request: &GenerateRequest,
    max_output_tokens: u32,
    temperature: Option<f32>,
) -> Value {
    let contents: Vec<Value> = request
        .turns
        .iter()
        .map(|turn| {
            let role = match turn.role {
                Role::User => "user",
                Role::Model => "model",
            };
            json!({ "role": role, "parts": [{ "text": turn.text }] })
        })
        .collect();

    let mut generation_config = json!({ "maxOutputTokens": max_output_tokens });
    if let Some(t) = temperature {
        generation_config["temperature"] = json!(t);
    }

    let mut body = json!({
        "contents": contents,
        "generationConfig": generation_config,
    });
    if let Some(system) = &request.system {
        body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
    }
    body
}

/// Concatenate the text parts of the first candidate.
pub fn parse_gemini_response(json: &Value) -> Result<String, ServiceError> {
    let candidate = json
        .get("candidates")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .ok_or_else(|| {
            let reason = json
                .pointer("/promptFeedback/blockReason")
                .and_then(|r| r.as_str())
                .unwrap_or("no candidates");
            ServiceError::malformed(SERVICE, reason.to_string())
        })?;

    let parts = candidate
        .pointer("/content/parts")
        .and_then(|p| p.as_array())
        .ok_or_else(|| ServiceError::malformed(SERVICE, "candidate has no content parts"))?;

    Ok(parts
        .iter()
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .collect::<Vec<_>>()
        .join(""))
}

// ============ Throttle ============

/// Bounds concurrent calls and enforces a minimum spacing between call starts.
pub struct Throttle {
    permits: Semaphore,
    min_interval: Duration,
    last_start: Mutex<Option<Instant>>,
}

impl Throttle {
    pub fn new(max_concurrent: usize, min_interval: Duration) -> Self {
        Self {
            permits: Semaphore::new(max_concurrent.max(1)),
            min_interval,
            last_start: Mutex::new(None),
        }
    }

    /// Run `fut` once a permit is free and the spacing has elapsed.
    pub async fn run<F, T>(&self, fut: F) -> Result<T, ServiceError>
    where
        F: std::future::Future<Output = Result<T, ServiceError>>,
    {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| ServiceError::unavailable("throttle", e.to_string()))?;

        {
            let mut last = self.last_start.lock().await;
            if let Some(prev) = *last {
                let ready_at = prev + self.min_interval;
                if ready_at > Instant::now() {
                    tokio::time::sleep_until(ready_at).await;
                }
            }
            *last = Some(Instant::now());
        }

        fut.await
    }
}

/// A [`LanguageModel`] whose calls pass through a [`Throttle`].
pub struct Throttled {
    inner: Arc<dyn LanguageModel>,
    throttle: Throttle,
}

impl Throttled {
    pub fn new(inner: Arc<dyn LanguageModel>, throttle: Throttle) -> Self {
        Self { inner, throttle }
    }
}

#[async_trait]
impl LanguageModel for Throttled {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<String, ServiceError> {
        self.throttle.run(self.inner.generate(request)).await
    }
}

/// Create the throttled model named by `config.provider`.
pub fn create_model(config: &LlmConfig) -> Result<Arc<dyn LanguageModel>> {
    let inner: Arc<dyn LanguageModel> = match config.provider.as_str() {
        "gemini" => Arc::new(GeminiModel::new(config)?),
        other => bail!("Unknown llm provider: {}", other),
    };
    let throttle = Throttle::new(
        config.max_concurrent,
        Duration::from_millis(config.min_interval_ms),
    );
    Ok(Arc::new(Throttled::new(inner, throttle)))
}
