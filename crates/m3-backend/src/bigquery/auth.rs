//! Ambient Google credentials.

use crate::error::BackendError;
use async_trait::async_trait;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Supplies OAuth2 access tokens for BigQuery calls.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn access_token(&self) -> Result<String, BackendError>;
}

/// A fixed token. Used by tests and by callers that manage tokens themselves.
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn access_token(&self) -> Result<String, BackendError> {
        Ok(self.token.clone())
    }
}

/// Tokens tend to live an hour; refresh well before that.
const TOKEN_TTL: Duration = Duration::from_secs(45 * 60);

/// `GOOGLE_OAUTH_ACCESS_TOKEN`, else `gcloud auth application-default
/// print-access-token`, cached for a while.
pub struct AmbientTokenProvider {
    cached: Mutex<Option<(String, Instant)>>,
}

impl AmbientTokenProvider {
    pub fn new() -> Self {
        Self {
            cached: Mutex::new(None),
        }
    }

    async fn fetch() -> Result<String, BackendError> {
        if let Ok(token) = std::env::var("GOOGLE_OAUTH_ACCESS_TOKEN") {
            if !token.trim().is_empty() {
                return Ok(token.trim().to_string());
            }
        }

        let output = tokio::process::Command::new("gcloud")
            .args(["auth", "application-default", "print-access-token"])
            .output()
            .await
            .map_err(|e| {
                BackendError::BackendUnavailable(format!(
                    "no Google credentials: set GOOGLE_OAUTH_ACCESS_TOKEN or install gcloud ({e})"
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BackendError::BackendUnavailable(format!(
                "gcloud could not provide application-default credentials: {}",
                stderr.lines().next().unwrap_or("unknown error")
            )));
        }

        let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if token.is_empty() {
            return Err(BackendError::BackendUnavailable(
                "gcloud returned an empty access token".to_string(),
            ));
        }
        Ok(token)
    }
}

impl Default for AmbientTokenProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenProvider for AmbientTokenProvider {
    async fn access_token(&self) -> Result<String, BackendError> {
        let mut cached = self.cached.lock().await;
        if let Some((token, fetched_at)) = cached.as_ref() {
            if fetched_at.elapsed() < TOKEN_TTL {
                return Ok(token.clone());
            }
        }
        let token = Self::fetch().await?;
        tracing::debug!("Refreshed Google access token");
        *cached = Some((token.clone(), Instant::now()));
        Ok(token)
    }
}
