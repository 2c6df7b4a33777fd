//! Auth gate in front of the gateway.
//!
//! The gateway knows nothing about tokens. [`GatedGateway`] asks an
//! [`AuthGate`] for an [`Identity`] before each call and passes only the
//! subject on, so any gate can wrap the same gateway.
//!
//! [`ScopedTokenGate`] implements the usual bearer flow:
//!
//! 1. Extract the bearer token from the call context
//! 2. Verify it with a [`TokenVerifier`] (static tokens here; OAuth2/JWT
//!    verification plugs in through the same trait)
//! 3. Check the required scopes
//! 4. Apply a fixed-window rate limit per subject

use crate::gateway::{QueryGateway, ToolResponse};
use async_trait::async_trait;
use m3_audit::{AuditEvent, AuditEventType};
use m3_core::{AuthConfig, StaticToken};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;

/// What the gate sees about a call.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    pub tool: String,
    /// Raw credential, with or without a `Bearer ` prefix.
    pub authorization: Option<String>,
}

impl CallContext {
    pub fn new(tool: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            authorization: None,
        }
    }

    pub fn with_authorization(mut self, authorization: Option<String>) -> Self {
        self.authorization = authorization;
        self
    }

    /// The token without its scheme, if any was supplied.
    pub fn bearer_token(&self) -> Option<&str> {
        let raw = self.authorization.as_deref()?.trim();
        let token = match raw.split_once(char::is_whitespace) {
            Some((scheme, rest)) if scheme.eq_ignore_ascii_case("bearer") => rest.trim(),
            _ if raw.eq_ignore_ascii_case("bearer") => "",
            _ => raw,
        };
        (!token.is_empty()).then_some(token)
    }
}

/// An authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub subject: String,
    pub scopes: Vec<String>,
}

impl Identity {
    pub fn new(subject: impl Into<String>, scopes: Vec<String>) -> Self {
        Self {
            subject: subject.into(),
            scopes,
        }
    }

    /// The unauthenticated caller of the local stdio transport.
    pub fn local() -> Self {
        Self::new("local", Vec::new())
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }
}

/// Why the gate refused a call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthDenied {
    #[error("missing bearer token")]
    MissingToken,

    #[error("invalid or expired token")]
    InvalidToken,

    #[error("missing required scopes: {}", .missing.join(", "))]
    InsufficientScope { subject: String, missing: Vec<String> },

    #[error("rate limit exceeded; retry in {retry_after_secs}s")]
    RateLimited { subject: String, retry_after_secs: u64 },
}

impl AuthDenied {
    /// Stable machine label.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingToken => "missing_token",
            Self::InvalidToken => "invalid_token",
            Self::InsufficientScope { .. } => "insufficient_scope",
            Self::RateLimited { .. } => "rate_limited",
        }
    }

    /// Subject of the refused call, once the token was verified.
    pub fn subject(&self) -> Option<&str> {
        match self {
            Self::InsufficientScope { subject, .. } | Self::RateLimited { subject, .. } => {
                Some(subject)
            }
            Self::MissingToken | Self::InvalidToken => None,
        }
    }
}

/// Decides whether a call may run.
#[async_trait]
pub trait AuthGate: Send + Sync {
    async fn authorize(&self, ctx: &CallContext) -> Result<Identity, AuthDenied>;
}

/// Admits every call as [`Identity::local`].
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

#[async_trait]
impl AuthGate for AllowAll {
    async fn authorize(&self, _ctx: &CallContext) -> Result<Identity, AuthDenied> {
        Ok(Identity::local())
    }
}

/// Turns a bearer token into an identity.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<Identity, AuthDenied>;
}

/// Pre-shared tokens from the configuration file.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenVerifier {
    tokens: Vec<StaticToken>,
}

impl StaticTokenVerifier {
    pub fn new(tokens: Vec<StaticToken>) -> Self {
        Self { tokens }
    }
}

#[async_trait]
impl TokenVerifier for StaticTokenVerifier {
    async fn verify(&self, token: &str) -> Result<Identity, AuthDenied> {
        self.tokens
            .iter()
            .find(|candidate| candidate.token == token)
            .map(|found| Identity::new(found.subject.clone(), found.scopes.clone()))
            .ok_or(AuthDenied::InvalidToken)
    }
}

/// Fixed-window request counter per subject.
///
/// A window opens on a subject's first request and admits `max_requests`
/// calls until `window` has elapsed.
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    windows: Mutex<HashMap<String, Window>>,
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn check(&self, subject: &str) -> Result<(), AuthDenied> {
        self.check_at(subject, Instant::now())
    }

    pub(crate) fn check_at(&self, subject: &str, now: Instant) -> Result<(), AuthDenied> {
        let mut windows = self.windows.lock().unwrap_or_else(|p| p.into_inner());
        let current = windows.entry(subject.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });

        let elapsed = now.duration_since(current.started);
        if elapsed >= self.window {
            *current = Window {
                started: now,
                count: 0,
            };
        }

        if current.count >= self.max_requests {
            let remaining = self.window.saturating_sub(now.duration_since(current.started));
            return Err(AuthDenied::RateLimited {
                subject: subject.to_string(),
                retry_after_secs: remaining.as_secs().max(1),
            });
        }
        current.count += 1;
        Ok(())
    }
}

/// Bearer token, then scopes, then rate limit.
pub struct ScopedTokenGate<V: TokenVerifier> {
    verifier: V,
    required_scopes: Vec<String>,
    limiter: Option<RateLimiter>,
}

impl<V: TokenVerifier> ScopedTokenGate<V> {
    pub fn new(verifier: V, required_scopes: Vec<String>) -> Self {
        Self {
            verifier,
            required_scopes,
            limiter: None,
        }
    }

    pub fn with_rate_limit(mut self, max_requests: u32, window: Duration) -> Self {
        self.limiter = Some(RateLimiter::new(max_requests, window));
        self
    }

    pub fn from_config(verifier: V, config: &AuthConfig) -> Self {
        let gate = Self::new(verifier, config.required_scopes.clone());
        match config.rate_limit_requests {
            Some(requests) => gate.with_rate_limit(
                requests,
                Duration::from_secs(config.rate_limit_window_secs.max(1)),
            ),
            None => gate,
        }
    }
}

#[async_trait]
impl<V: TokenVerifier> AuthGate for ScopedTokenGate<V> {
    async fn authorize(&self, ctx: &CallContext) -> Result<Identity, AuthDenied> {
        let token = ctx.bearer_token().ok_or(AuthDenied::MissingToken)?;
        let identity = self.verifier.verify(token).await?;

        let missing: Vec<String> = self
            .required_scopes
            .iter()
            .filter(|scope| !identity.has_scope(scope))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(AuthDenied::InsufficientScope {
                subject: identity.subject,
                missing,
            });
        }

        if let Some(limiter) = &self.limiter {
            limiter.check(&identity.subject)?;
        }
        Ok(identity)
    }
}

/// The gate selected by configuration.
pub fn gate_from_config(config: &AuthConfig) -> Arc<dyn AuthGate> {
    if !config.enabled {
        return Arc::new(AllowAll);
    }
    if config.tokens.is_empty() {
        tracing::warn!("Auth is enabled but no tokens are configured; every call will be refused");
    }
    tracing::info!(
        required_scopes = ?config.required_scopes,
        rate_limit = ?config.rate_limit_requests,
        "Auth gate enabled"
    );
    Arc::new(ScopedTokenGate::from_config(
        StaticTokenVerifier::new(config.tokens.clone()),
        config,
    ))
}

/// A [`QueryGateway`] behind an [`AuthGate`].
#[derive(Clone)]
pub struct GatedGateway {
    gateway: Arc<QueryGateway>,
    gate: Arc<dyn AuthGate>,
}

impl GatedGateway {
    pub fn new(gateway: Arc<QueryGateway>, gate: Arc<dyn AuthGate>) -> Self {
        Self { gateway, gate }
    }

    /// No authentication: every call runs as `local`.
    pub fn open(gateway: Arc<QueryGateway>) -> Self {
        Self::new(gateway, Arc::new(AllowAll))
    }

    pub fn gateway(&self) -> &QueryGateway {
        &self.gateway
    }

    /// Authorize, then run the tool named in `ctx`.
    pub async fn call(
        &self,
        ctx: &CallContext,
        arguments: Value,
    ) -> Result<ToolResponse, AuthDenied> {
        match self.gate.authorize(ctx).await {
            Ok(identity) => Ok(self
                .gateway
                .call(&ctx.tool, arguments, &identity.subject)
                .await),
            Err(denied) => {
                let subject = denied.subject().unwrap_or("unknown");
                tracing::warn!(
                    tool = %ctx.tool,
                    subject = %subject,
                    reason = denied.code(),
                    "Call refused by auth gate"
                );
                self.gateway
                    .audit()
                    .record(
                        AuditEvent::builder(AuditEventType::AuthDenied, subject, &ctx.tool)
                            .reason(denied.to_string())
                            .build(),
                    )
                    .await;
                Err(denied)
            }
        }
    }
}
