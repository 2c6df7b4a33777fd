//! Auth gate configuration.

use serde::{Deserialize, Serialize};

/// Bearer-token gate in front of the query tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Off by default: the stdio transport is local and unauthenticated.
    #[serde(default)]
    pub enabled: bool,

    /// Scopes every token must carry.
    #[serde(default = "default_required_scopes")]
    pub required_scopes: Vec<String>,

    /// Calls allowed per subject per window. `None` disables rate limiting.
    #[serde(default = "default_rate_limit_requests")]
    pub rate_limit_requests: Option<u32>,

    #[serde(default = "default_rate_limit_window_secs")]
    pub rate_limit_window_secs: u64,

    /// Static tokens accepted by the built-in verifier.
    #[serde(default)]
    pub tokens: Vec<StaticToken>,
}

/// A pre-shared bearer token and what it grants.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StaticToken {
    pub token: String,
    pub subject: String,
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            required_scopes: default_required_scopes(),
            rate_limit_requests: default_rate_limit_requests(),
            rate_limit_window_secs: default_rate_limit_window_secs(),
            tokens: Vec::new(),
        }
    }
}

fn default_required_scopes() -> Vec<String> {
    vec!["read:mimic-data".to_string()]
}

fn default_rate_limit_requests() -> Option<u32> {
    Some(100)
}

fn default_rate_limit_window_secs() -> u64 {
    60
}
