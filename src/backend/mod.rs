//! Execution backend contract.
//!
//! A backend turns one test item plus the target capability into a scored
//! verdict. The engine stays backend-agnostic: anything implementing
//! [`ExecutionBackend`] can be plugged into the executor, which health
//! checks the set up front and falls back per item.

pub mod builtin;
pub mod subprocess;

pub use builtin::BuiltinBackend;
pub use subprocess::{SubprocessBackend, SubprocessConfig};

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::adapter::{AdapterError, TargetAdapter};
use crate::model::{Dimension, TestItem};

/// Id of the evaluator-driven backend that ships with the engine.
pub const BUILTIN_BACKEND_ID: &str = "built-in";

/// Feature flags a backend declares up front.
#[derive(Debug, Clone, Copy, Default)]
pub struct BackendCapabilities {
    pub supports_replications: bool,
    pub supports_streaming: bool,
    pub supports_multimodal: bool,
    pub supports_multi_turn: bool,
}

/// Result of a backend health check.
#[derive(Debug, Clone)]
pub struct BackendHealth {
    pub available: bool,
    pub version: Option<String>,
    pub error: Option<String>,
}

impl BackendHealth {
    pub fn up(version: impl Into<String>) -> Self {
        Self {
            available: true,
            version: Some(version.into()),
            error: None,
        }
    }

    pub fn down(error: impl Into<String>) -> Self {
        Self {
            available: false,
            version: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("adapter error: {0}")]
    Adapter(#[from] AdapterError),

    #[error("subprocess exited with status {status}: {stderr_tail}")]
    Subprocess { status: i32, stderr_tail: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed backend output: {0}")]
    Output(String),
}

/// Outcome of executing one item through one backend.
#[derive(Debug, Clone, Serialize)]
pub struct TestResult {
    pub item_id: String,
    pub backend_id: String,
    pub passed: bool,
    /// Fraction of evaluators (or the external tool's own score) in [0, 1].
    pub score: f64,
    pub metrics: HashMap<String, f64>,
    pub raw_output: String,
    pub duration_ms: u64,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl std::fmt::Debug for dyn ExecutionBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionBackend")
            .field("id", &self.id())
            .field("name", &self.name())
            .finish()
    }
}

/// Pluggable item execution strategy.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Stable identifier used by `preferred_backends` and results.
    fn id(&self) -> &str;

    /// Human-readable name.
    fn name(&self) -> &str;

    /// Dimensions this backend knows how to exercise.
    fn supported_dimensions(&self) -> &[Dimension];

    fn capabilities(&self) -> BackendCapabilities;

    async fn healthcheck(&self) -> BackendHealth;

    /// Execute one item against the target and judge the reply.
    async fn execute(
        &self,
        item: &TestItem,
        adapter: &dyn TargetAdapter,
    ) -> Result<TestResult, BackendError>;
}
