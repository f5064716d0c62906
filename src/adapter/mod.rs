//! Target adapter contract and connection configuration.
//!
//! The adapter is the engine's only door to the system under test: one
//! `send` per item attempt, failure categories mapped onto the engine's
//! error taxonomy, retries concentrated behind the contract.

pub mod error;
pub mod http;

pub use error::AdapterError;
pub use http::HttpTargetAdapter;

use std::collections::HashMap;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::model::TestInput;

// =============================================================================
// Contract
// =============================================================================

/// Format the target's reply arrived in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyFormat {
    Text,
    Json,
    Markdown,
}

/// One reply from the system under test.
#[derive(Debug, Clone)]
pub struct TargetReply {
    pub content: String,
    pub format: ReplyFormat,
    pub latency_ms: u64,
    pub metadata: HashMap<String, String>,
}

/// Lightweight probe of the target, used by detection collaborators.
#[derive(Debug, Clone, Default)]
pub struct TargetProbe {
    pub reachable: bool,
    pub response_format: Option<ReplyFormat>,
    pub detected_provider: Option<String>,
    pub headers: HashMap<String, String>,
}

/// Connection to an opaque text-generating service.
#[async_trait]
pub trait TargetAdapter: Send + Sync {
    /// Verify the target is reachable. Failure maps to
    /// [`AdapterError::Connection`].
    async fn connect(&self) -> Result<(), AdapterError>;

    /// Deliver one input and return the reply. Exactly one logical attempt
    /// per call from the engine's point of view; transport retries are the
    /// adapter's own business.
    async fn send(&self, input: &TestInput) -> Result<TargetReply, AdapterError>;

    /// Inspect the endpoint without running a test.
    async fn inspect(&self) -> Result<TargetProbe, AdapterError>;

    /// Release any held resources. Default: nothing to do.
    async fn disconnect(&self) {}
}

// =============================================================================
// Configuration
// =============================================================================

fn default_timeout_secs() -> u64 {
    120
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_base_delay_ms() -> u64 {
    1_000
}

/// Connection settings for an HTTP target. Every string value undergoes
/// `${VAR}` environment-variable expansion at adapter construction, so
/// configs can be committed without secrets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Bearer token; sent as an `Authorization` header when present.
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
}

impl TargetConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: HashMap::new(),
            auth_token: None,
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
        }
    }
}

static ENV_VAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("static pattern"));

/// Expand `${VAR}` references against the process environment. An
/// unresolved variable is a configuration error, not an empty string.
pub fn expand_env(value: &str) -> Result<String, AdapterError> {
    let mut out = String::with_capacity(value.len());
    let mut last = 0;
    for caps in ENV_VAR.captures_iter(value) {
        let whole = caps.get(0).ok_or_else(|| {
            AdapterError::Config("malformed environment reference".to_string())
        })?;
        let name = &caps[1];
        let resolved = std::env::var(name).map_err(|_| {
            AdapterError::Config(format!("environment variable {name} is not set"))
        })?;
        out.push_str(&value[last..whole.start()]);
        out.push_str(&resolved);
        last = whole.end();
    }
    out.push_str(&value[last..]);
    Ok(out)
}
