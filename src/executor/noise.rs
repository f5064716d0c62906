//! Replication-based noise isolation.
//!
//! The estimator wants one binary response per item, but a noisy target
//! can flip verdicts run to run. The isolator executes an item several
//! times, reports the coefficient of variation over the scores, flags
//! noisy items, and hands back a single representative outcome (the
//! median by score, robust to outliers) with all replications preserved
//! in metadata.

use std::cmp::Ordering;

use serde::Serialize;
use tracing::warn;

use crate::adapter::TargetAdapter;
use crate::backend::{BackendError, ExecutionBackend, TestResult};
use crate::model::{TestInput, TestItem};

/// Replication settings.
#[derive(Debug, Clone)]
pub struct NoiseConfig {
    /// Times each item is executed. 1 disables isolation.
    pub replications: usize,
    /// Coefficient-of-variation level above which an item is flagged noisy.
    pub cv_threshold: f64,
    /// Requests sent during warm-up before measurement begins.
    pub warmup_requests: usize,
}

impl Default for NoiseConfig {
    fn default() -> Self {
        Self {
            replications: 1,
            cv_threshold: 0.15,
            warmup_requests: 3,
        }
    }
}

/// Score dispersion over one item's replications.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct NoiseStats {
    pub replications: usize,
    pub mean_score: f64,
    /// Population coefficient of variation; 0 when the mean is 0.
    pub cv: f64,
    pub flagged: bool,
}

impl NoiseStats {
    fn single(score: f64) -> Self {
        Self {
            replications: 1,
            mean_score: score,
            cv: 0.0,
            flagged: false,
        }
    }
}

/// Warm-up plus replicated execution over one backend.
#[derive(Debug, Clone)]
pub struct NoiseIsolator {
    config: NoiseConfig,
}

impl NoiseIsolator {
    pub fn new(config: NoiseConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &NoiseConfig {
        &self.config
    }

    /// Prime server-side caches and connection pools: send the reference
    /// input `warmup_requests` times, discarding replies. Errors are never
    /// fatal here; a cold target that fails warm-up may still test fine.
    pub async fn warm_up<F>(
        &self,
        adapter: &dyn TargetAdapter,
        reference: &TestInput,
        mut progress: F,
    ) where
        F: FnMut(usize, usize),
    {
        let total = self.config.warmup_requests;
        for current in 1..=total {
            if let Err(err) = adapter.send(reference).await {
                warn!(error = %err, current, total, "warm-up request failed");
            }
            progress(current, total);
        }
    }

    /// Execute `item` `replications` times sequentially and pick the
    /// representative outcome. With one replication the single result
    /// passes straight through (cv 0, no flag).
    pub async fn run_replicated(
        &self,
        backend: &dyn ExecutionBackend,
        item: &TestItem,
        adapter: &dyn TargetAdapter,
    ) -> Result<(TestResult, NoiseStats), BackendError> {
        let n = self.config.replications;
        if n <= 1 {
            let result = backend.execute(item, adapter).await?;
            let stats = NoiseStats::single(result.score);
            return Ok((result, stats));
        }

        let mut runs = Vec::with_capacity(n);
        for _ in 0..n {
            runs.push(backend.execute(item, adapter).await?);
        }

        let scores: Vec<f64> = runs.iter().map(|r| r.score).collect();
        let mean = scores.iter().sum::<f64>() / n as f64;
        let variance = scores
            .iter()
            .map(|s| {
                let dev = s - mean;
                dev * dev
            })
            .sum::<f64>()
            / n as f64;
        let cv = if mean > 0.0 { variance.sqrt() / mean } else { 0.0 };
        let flagged = cv > self.config.cv_threshold;

        // Representative: upper median by score.
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&a, &b| scores[a].partial_cmp(&scores[b]).unwrap_or(Ordering::Equal));
        let representative = order[n / 2];

        let replication_log: Vec<serde_json::Value> = runs
            .iter()
            .map(|r| {
                serde_json::json!({
                    "score": r.score,
                    "passed": r.passed,
                    "duration_ms": r.duration_ms,
                })
            })
            .collect();

        let mut result = runs.remove(representative);
        result.metadata.insert(
            "replications".to_string(),
            serde_json::Value::Array(replication_log),
        );

        Ok((
            result,
            NoiseStats {
                replications: n,
                mean_score: mean,
                cv,
                flagged,
            },
        ))
    }
}
