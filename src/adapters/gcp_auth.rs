//! Google Cloud service account credentials and OAuth2 access tokens.
//!
//! Tokens are obtained with the JWT-bearer grant: an RS256 assertion signed
//! with the key's `private_key` is exchanged at its `token_uri`.

use crate::utils::error::{is_retryable_status, PipelineError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::sync::Mutex;

pub const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
/// 到期前多久就換新 token
const REFRESH_MARGIN_SECS: i64 = 60;

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub private_key_id: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

impl ServiceAccountKey {
    /// Load and validate the key referenced by `GOOGLE_APPLICATION_CREDENTIALS`.
    pub fn from_file(path: &str) -> Result<Self> {
        if path.trim().is_empty() {
            return Err(PipelineError::credentials(
                "GOOGLE_APPLICATION_CREDENTIALS environment variable is not set. \
                 Please set it to the path of your Google Cloud service account JSON file.",
            ));
        }

        if !Path::new(path).is_file() {
            return Err(PipelineError::credentials(format!(
                "Credentials file not found: {}. \
                 Please check that GOOGLE_APPLICATION_CREDENTIALS points to an existing file.",
                path
            )));
        }

        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content, path)
    }

    pub fn from_json_str(content: &str, source: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(content).map_err(|e| {
            PipelineError::credentials(format!(
                "Credentials file is not valid JSON: {}. Error: {}",
                source, e
            ))
        })?;

        let has_field = |name: &str| value.get(name).and_then(|v| v.as_str()).is_some();
        if !has_field("private_key") || !has_field("client_email") {
            return Err(PipelineError::credentials(format!(
                "Invalid credentials file format: {}. The file must be a valid service account \
                 JSON with 'private_key' and 'client_email' fields.",
                source
            )));
        }

        Ok(serde_json::from_value(value)?)
    }
}

fn corrupted_key_error(source: &str, cause: &str) -> PipelineError {
    PipelineError::credentials(format!(
        "Invalid or corrupted Google Cloud credentials file: {}\n\
         The private key in your service account JSON file cannot be parsed ({}).\n\
         This usually means:\n  \
         1. The credentials file is corrupted or incomplete\n  \
         2. The private_key field is truncated or malformed\n  \
         3. The file was edited incorrectly\n\n\
         Please download a fresh service account key from Google Cloud Console:\n  \
         https://console.cloud.google.com/iam-admin/serviceaccounts\n\
         Then set GOOGLE_APPLICATION_CREDENTIALS to the path of the new file.",
        source, cause
    ))
}

/// Source of bearer tokens for Google APIs.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn access_token(&self) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

pub struct ServiceAccountTokenProvider {
    key: ServiceAccountKey,
    encoding_key: EncodingKey,
    client: reqwest::Client,
    cache: Mutex<Option<CachedToken>>,
}

impl ServiceAccountTokenProvider {
    /// Parses the private key up front so a corrupted key fails at startup.
    pub fn new(key: ServiceAccountKey, source: &str) -> Result<Self> {
        let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| corrupted_key_error(source, &e.to_string()))?;
        Ok(Self {
            key,
            encoding_key,
            client: reqwest::Client::new(),
            cache: Mutex::new(None),
        })
    }

    pub fn from_file(path: &str) -> Result<Self> {
        let key = ServiceAccountKey::from_file(path)?;
        Self::new(key, path)
    }

    pub fn client_email(&self) -> &str {
        &self.key.client_email
    }

    fn signed_assertion(&self, now: DateTime<Utc>) -> Result<String> {
        let claims = AssertionClaims {
            iss: &self.key.client_email,
            scope: CLOUD_PLATFORM_SCOPE,
            aud: &self.key.token_uri,
            iat: now.timestamp(),
            exp: now.timestamp() + ASSERTION_LIFETIME_SECS,
        };
        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.key.private_key_id.clone();

        jsonwebtoken::encode(&header, &claims, &self.encoding_key)
            .map_err(|e| corrupted_key_error(&self.key.client_email, &e.to_string()))
    }

    async fn fetch_token(&self) -> Result<CachedToken> {
        let now = Utc::now();
        let assertion = self.signed_assertion(now)?;

        tracing::debug!("Requesting access token for {}", self.key.client_email);
        let response = self
            .client
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;

        let status = response.status();
        if is_retryable_status(status.as_u16()) {
            // 暫時性錯誤保留 HTTP 狀態，交由呼叫端重試
            if let Err(e) = response.error_for_status_ref() {
                return Err(e.into());
            }
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::credentials(format!(
                "Token exchange for {} failed with HTTP {}: {}",
                self.key.client_email, status, body
            )));
        }

        let token: TokenResponse = response.json().await?;
        let lifetime = token.expires_in.unwrap_or(ASSERTION_LIFETIME_SECS);
        Ok(CachedToken {
            token: token.access_token,
            expires_at: now + Duration::seconds(lifetime),
        })
    }
}

#[async_trait]
impl TokenProvider for ServiceAccountTokenProvider {
    async fn access_token(&self) -> Result<String> {
        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.as_ref() {
            if cached.expires_at - Duration::seconds(REFRESH_MARGIN_SECS) > Utc::now() {
                return Ok(cached.token.clone());
            }
        }

        let fresh = self.fetch_token().await?;
        let token = fresh.token.clone();
        *cache = Some(fresh);
        Ok(token)
    }
}
