//! Typed errors for the external-service seams.
//!
//! Every collaborator (Drive, Docs, Gemini, OpenAI, Qdrant, Telegram) reports
//! failures as a [`ServiceError`] so callers can decide between skipping,
//! retrying and aborting. The vector index bootstrap path wraps these in an
//! [`IndexError`], which is the only error allowed to abort startup.
//!
//! Application and CLI code above these seams uses `anyhow::Result`.

use reqwest::StatusCode;
use thiserror::Error;

/// Failure reported by an external service call.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Network failure, timeout or 5xx response.
    #[error("{service} unavailable: {message}")]
    Unavailable { service: String, message: String },

    /// Missing or rejected credentials (401/403, missing env var).
    #[error("{service} authentication failed: {message}")]
    Auth { service: String, message: String },

    /// HTTP 429.
    #[error("{service} rate limited: {message}")]
    RateLimited { service: String, message: String },

    /// The service answered, but the body could not be decoded.
    #[error("{service} returned a malformed response: {message}")]
    Malformed { service: String, message: String },

    /// Any other client error (4xx other than 401/403/429).
    #[error("{service} rejected the request: {message}")]
    InvalidRequest { service: String, message: String },
}

impl ServiceError {
    pub fn unavailable(service: &str, message: impl Into<String>) -> Self {
        Self::Unavailable {
            service: service.to_string(),
            message: message.into(),
        }
    }

    pub fn auth(service: &str, message: impl Into<String>) -> Self {
        Self::Auth {
            service: service.to_string(),
            message: message.into(),
        }
    }

    pub fn malformed(service: &str, message: impl Into<String>) -> Self {
        Self::Malformed {
            service: service.to_string(),
            message: message.into(),
        }
    }

    pub fn invalid(service: &str, message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            service: service.to_string(),
            message: message.into(),
        }
    }

    /// Map a non-success HTTP status and body to the matching variant.
    pub fn from_status(service: &str, status: StatusCode, body: &str) -> Self {
        let message = format!("HTTP {}: {}", status, truncate(body, 500));
        let service = service.to_string();
        match status.as_u16() {
            401 | 403 => Self::Auth { service, message },
            429 => Self::RateLimited { service, message },
            s if s >= 500 => Self::Unavailable { service, message },
            _ => Self::InvalidRequest { service, message },
        }
    }

    /// Map a transport-level `reqwest` error.
    pub fn from_reqwest(service: &str, err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::malformed(service, err.to_string())
        } else {
            Self::unavailable(service, err.to_string())
        }
    }

    /// Rate limits and outages are worth another attempt; bad requests,
    /// bad credentials and garbled bodies are not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::RateLimited { .. })
    }
}

/// Failure of a vector index operation.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("vector index unavailable: {0}")]
    Unavailable(#[from] ServiceError),

    #[error("texts and payloads differ in length ({texts} vs {payloads})")]
    LengthMismatch { texts: usize, payloads: usize },

    #[error("embedding provider returned {got} vectors for {expected} texts")]
    EmbeddingCount { expected: usize, got: usize },
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}
