//! Google OAuth access tokens.
//!
//! Two credential sources, checked in order:
//!
//! 1. A ready bearer token in the environment variable named by
//!    `google.access_token_env` (default `GOOGLE_ACCESS_TOKEN`). Used as is.
//! 2. An authorized-user token file (`google.token_file`, default
//!    `token.json`) holding `client_id`, `client_secret` and `refresh_token`,
//!    plus an optional cached `token` and `expiry`. Tokens are refreshed
//!    against the OAuth endpoint and kept in memory until 60 seconds before
//!    they expire.
//!
//! The token file is never written back.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use tokio::sync::Mutex;

use crate::config::GoogleConfig;
use crate::error::ServiceError;
use crate::http;

const SERVICE: &str = "google-oauth";
const REFRESH_MARGIN_SECS: i64 = 60;

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

/// Contents of an authorized-user token file.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthorizedUser {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    #[serde(default)]
    pub token: Option<String>,
    /// RFC 3339 expiry of `token`.
    #[serde(default)]
    pub expiry: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

impl AuthorizedUser {
    pub fn load(path: &Path) -> Result<Self, ServiceError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ServiceError::auth(
                SERVICE,
                format!("cannot read token file {}: {}", path.display(), e),
            )
        })?;
        serde_json::from_str(&content).map_err(|e| {
            ServiceError::auth(
                SERVICE,
                format!("invalid token file {}: {}", path.display(), e),
            )
        })
    }

    fn cached_token(&self) -> Option<AccessToken> {
        let token = self.token.clone()?;
        let expires_at = self
            .expiry
            .as_deref()
            .and_then(|e| DateTime::parse_from_rfc3339(e).ok())?
            .with_timezone(&Utc);
        Some(AccessToken { token, expires_at })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - ChronoDuration::seconds(REFRESH_MARGIN_SECS) > now
    }
}

enum Credentials {
    Static(String),
    Refreshable(AuthorizedUser),
}

/// Hands out bearer tokens for the Drive and Docs clients.
pub struct TokenSource {
    credentials: Credentials,
    cache: Mutex<Option<AccessToken>>,
    client: reqwest::Client,
}

impl TokenSource {
    pub fn from_config(config: &GoogleConfig) -> Result<Self, ServiceError> {
        if let Ok(token) = http::api_key_from_env(SERVICE, &config.access_token_env) {
            tracing::debug!(var = %config.access_token_env, "using static Google access token");
            return Ok(Self::fixed(token));
        }
        let user = AuthorizedUser::load(&config.token_file)?;
        Ok(Self::refreshable(user, http::client(config.timeout_secs)?))
    }

    pub fn fixed(token: impl Into<String>) -> Self {
        Self {
            credentials: Credentials::Static(token.into()),
            cache: Mutex::new(None),
            client: reqwest::Client::new(),
        }
    }

    pub fn refreshable(user: AuthorizedUser, client: reqwest::Client) -> Self {
        let cached = user.cached_token();
        Self {
            credentials: Credentials::Refreshable(user),
            cache: Mutex::new(cached),
            client,
        }
    }

    /// A bearer token valid for at least the refresh margin.
    pub async fn access_token(&self) -> Result<String, ServiceError> {
        let user = match &self.credentials {
            Credentials::Static(token) => return Ok(token.clone()),
            Credentials::Refreshable(user) => user,
        };

        let mut cache = self.cache.lock().await;
        if let Some(token) = cache.as_ref() {
            if token.is_fresh(Utc::now()) {
                return Ok(token.token.clone());
            }
        }

        let fresh = self.refresh(user).await?;
        let token = fresh.token.clone();
        *cache = Some(fresh);
        Ok(token)
    }

    async fn refresh(&self, user: &AuthorizedUser) -> Result<AccessToken, ServiceError> {
        tracing::debug!("refreshing Google access token");
        let params = [
            ("grant_type", "refresh_token"),
            ("client_id", user.client_id.as_str()),
            ("client_secret", user.client_secret.as_str()),
            ("refresh_token", user.refresh_token.as_str()),
        ];
        let json = http::send_json(SERVICE, self.client.post(&user.token_uri).form(&params))
            .await
            .map_err(|e| match e {
                ServiceError::InvalidRequest { message, .. } => ServiceError::auth(SERVICE, message),
                other => other,
            })?;
        parse_token_response(&json, Utc::now())
    }
}

pub fn parse_token_response(json: &Value, now: DateTime<Utc>) -> Result<AccessToken, ServiceError> {
    let token = json
        .get("access_token")
        .and_then(|t| t.as_str())
        .ok_or_else(|| ServiceError::malformed(SERVICE, "missing access_token"))?;
    let expires_in = json
        .get("expires_in")
        .and_then(|e| e.as_i64())
        .unwrap_or(3600);
    Ok(AccessToken {
        token: token.to_string(),
        expires_at: now + ChronoDuration::seconds(expires_in),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn freshness_honours_margin() {
        let now = Utc::now();
        let token = |secs| AccessToken {
            token: "t".into(),
            expires_at: now + ChronoDuration::seconds(secs),
        };
        assert!(token(3600).is_fresh(now));
        assert!(!token(59).is_fresh(now));
        assert!(!token(-10).is_fresh(now));
    }

    #[test]
    fn parses_refresh_response() {
        let now = Utc::now();
        let json = serde_json::json!({ "access_token": "ya29.x", "expires_in": 120, "token_type": "Bearer" });
        let token = parse_token_response(&json, now).unwrap();
        assert_eq!(token.token, "ya29.x");
        assert_eq!(token.expires_at, now + ChronoDuration::seconds(120));

        assert!(parse_token_response(&serde_json::json!({}), now).is_err());
    }

    #[test]
    fn loads_authorized_user_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"client_id":"id","client_secret":"s","refresh_token":"r","token":"cached","expiry":"2999-01-01T00:00:00Z"}}"#
        )
        .unwrap();
        let user = AuthorizedUser::load(file.path()).unwrap();
        assert_eq!(user.token_uri, "https://oauth2.googleapis.com/token");
        let cached = user.cached_token().unwrap();
        assert_eq!(cached.token, "cached");
        assert!(cached.is_fresh(Utc::now()));
    }

    #[test]
    fn missing_file_is_auth_error() {
        let err = AuthorizedUser::load(Path::new("/nonexistent/token.json")).unwrap_err();
        assert!(matches!(err, ServiceError::Auth { .. }));
    }

    #[tokio::test]
    async fn fixed_token_is_returned_verbatim() {
        let source = TokenSource::fixed("abc");
        assert_eq!(source.access_token().await.unwrap(), "abc");
    }

    #[tokio::test]
    async fn fresh_cached_token_skips_refresh() {
        let user = AuthorizedUser {
            client_id: "id".into(),
            client_secret: "s".into(),
            refresh_token: "r".into(),
            token: Some("cached".into()),
            expiry: Some("2999-01-01T00:00:00Z".into()),
            // Unreachable: any refresh attempt would fail.
            token_uri: "http://127.0.0.1:9/token".into(),
        };
        let source = TokenSource::refreshable(user, reqwest::Client::new());
        assert_eq!(source.access_token().await.unwrap(), "cached");
    }
}
