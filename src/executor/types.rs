//! Plan, configuration, and result types for the executor.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::backend::TestResult;
use crate::cat::convergence::ConvergenceConfig;
use crate::cat::estimator::EstimatorConfig;
use crate::cat::session::{DimensionEstimate, SessionError};
use crate::model::{Dimension, TestItem};

use super::noise::NoiseConfig;

/// The set of items a run will draw from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub items: Vec<TestItem>,
}

impl ExecutionPlan {
    pub fn new(items: Vec<TestItem>) -> Self {
        Self { items }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Dimensions present in the plan, in first-seen order. The executor
    /// processes them in exactly this order.
    pub fn dimensions(&self) -> Vec<Dimension> {
        let mut seen = Vec::new();
        for item in &self.items {
            if !seen.contains(&item.dimension) {
                seen.push(item.dimension);
            }
        }
        seen
    }
}

/// How a run consumes the plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStrategy {
    /// Per-dimension CAT loop, stopping at convergence.
    Adaptive,
    /// Every item once; the model is fit afterwards.
    Exhaustive,
}

impl fmt::Display for ExecutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionStrategy::Adaptive => f.write_str("adaptive"),
            ExecutionStrategy::Exhaustive => f.write_str("exhaustive"),
        }
    }
}

/// All executor tunables in one explicit record.
#[derive(Debug, Clone, Default)]
pub struct ExecutorConfig {
    pub convergence: ConvergenceConfig,
    pub noise: NoiseConfig,
    pub estimator: EstimatorConfig,
}

/// Bookkeeping attached to a finished run.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionMetadata {
    pub strategy: ExecutionStrategy,
    /// Backend ids that produced at least one result, in first-use order.
    pub backends_used: Vec<String>,
}

/// Everything a run produced; collaborators persist and report from this.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResults {
    pub evaluation_id: Uuid,
    pub test_results: Vec<TestResult>,
    pub irt_estimates: Vec<DimensionEstimate>,
    pub metadata: ExecutionMetadata,
}

#[derive(Debug, Error)]
pub enum ExecutorError {
    /// Missing required inputs; surfaced before any work begins.
    #[error("configuration error: {0}")]
    Config(String),

    /// Every configured backend failed its health check.
    #[error("no execution backends are available")]
    NoBackendAvailable,

    /// Should not occur once the run-level health gate passed.
    #[error("no backend available for item {item_id}")]
    NoBackendForItem { item_id: String },

    #[error("session error: {0}")]
    Session(#[from] SessionError),
}
