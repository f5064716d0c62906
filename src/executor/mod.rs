//! Adaptive and exhaustive execution over a test plan.
//!
//! Wires together:
//! - CatSession (per-dimension ability state)
//! - select_next (maximum-information item choice)
//! - NoiseIsolator (warm-up + replications)
//! - ExecutionBackend implementations over a TargetAdapter
//! - convergence::check (multi-criterion stopping)
//!
//! Core adaptive loop, per dimension:
//! 1. Ask the convergence controller; stop and announce the reason.
//! 2. Ask the selector for the most informative remaining item.
//! 3. Pick a backend (item preference → built-in → any available).
//! 4. Execute through the noise isolator; a backend failure becomes a
//!    failed response, never an aborted dimension.
//! 5. Fold the binary response into the session and announce the new
//!    ability estimate.
//!
//! The engine is deliberately serial: one request in flight, one dimension
//! at a time, so the estimator always sees a fixed history and a
//! rate-limited target is never hammered.

pub mod events;
pub mod noise;
pub mod types;

use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::adapter::TargetAdapter;
use crate::backend::{BackendError, ExecutionBackend, TestResult, BUILTIN_BACKEND_ID};
use crate::cat::convergence;
use crate::cat::selector::select_next;
use crate::cat::session::{CatSession, DimensionEstimate};
use crate::model::TestItem;

use events::{EventBus, ExecutorEvent};
use noise::{NoiseIsolator, NoiseStats};
use types::{
    ExecutionMetadata, ExecutionPlan, ExecutionResults, ExecutionStrategy, ExecutorConfig,
    ExecutorError,
};

/// Orchestrates CAT sessions over a plan against one target.
pub struct AdaptiveExecutor {
    adapter: Arc<dyn TargetAdapter>,
    backends: Vec<Arc<dyn ExecutionBackend>>,
    config: ExecutorConfig,
    bus: EventBus,
}

impl std::fmt::Debug for AdaptiveExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdaptiveExecutor")
            .field("backends", &self.backends.len())
            .field("config", &self.config)
            .finish()
    }
}

impl AdaptiveExecutor {
    pub fn new(
        adapter: Arc<dyn TargetAdapter>,
        backends: Vec<Arc<dyn ExecutionBackend>>,
        config: ExecutorConfig,
    ) -> Result<Self, ExecutorError> {
        if backends.is_empty() {
            return Err(ExecutorError::Config(
                "at least one execution backend is required".to_string(),
            ));
        }
        Ok(Self {
            adapter,
            backends,
            config,
            bus: EventBus::new(),
        })
    }

    /// Subscribe to run events before calling `run_*`. Subscribers fire
    /// synchronously and must not call back into the executor.
    pub fn events_mut(&mut self) -> &mut EventBus {
        &mut self.bus
    }

    pub async fn run(
        &self,
        plan: &ExecutionPlan,
        strategy: ExecutionStrategy,
    ) -> Result<ExecutionResults, ExecutorError> {
        match strategy {
            ExecutionStrategy::Adaptive => self.run_adaptive(plan, None).await,
            ExecutionStrategy::Exhaustive => self.run_exhaustive(plan).await,
        }
    }

    /// Per-dimension CAT loop. An optional cancel flag is checked at the
    /// top of every iteration; cancellation finalizes the results gathered
    /// so far instead of discarding them.
    pub async fn run_adaptive(
        &self,
        plan: &ExecutionPlan,
        cancel: Option<&AtomicBool>,
    ) -> Result<ExecutionResults, ExecutorError> {
        let evaluation_id = Uuid::new_v4();
        let available = self.available_backends().await;
        if available.is_empty() {
            return Err(ExecutorError::NoBackendAvailable);
        }

        self.bus.emit(&ExecutorEvent::Started {
            evaluation_id,
            plan: plan.clone(),
        });

        let isolator = NoiseIsolator::new(self.config.noise.clone());
        if let Some(first) = plan.items.first() {
            isolator
                .warm_up(self.adapter.as_ref(), &first.input, |current, total| {
                    self.bus
                        .emit(&ExecutorEvent::WarmupProgress { current, total });
                })
                .await;
        }

        let mut test_results: Vec<TestResult> = Vec::new();
        let mut estimates: Vec<DimensionEstimate> = Vec::new();
        let mut backends_used: Vec<String> = Vec::new();
        let mut cancelled = false;

        for dimension in plan.dimensions() {
            let pool: Vec<&TestItem> = plan
                .items
                .iter()
                .filter(|item| item.dimension == dimension)
                .collect();

            let mut session = CatSession::new(dimension, self.config.estimator.clone());

            loop {
                if cancel.map(|flag| flag.load(AtomicOrdering::Relaxed)) == Some(true) {
                    debug!(%dimension, "cancellation requested; finalizing partial results");
                    cancelled = true;
                    break;
                }

                if let Some(reason) =
                    convergence::check(&session.snapshot(), &self.config.convergence)
                {
                    session.mark_converged();
                    self.bus.emit(&ExecutorEvent::DimensionConverged {
                        dimension,
                        theta: session.theta(),
                        se: session.se(),
                        reason: reason.to_string(),
                    });
                    break;
                }

                let Some(item) = select_next(
                    session.theta(),
                    pool.iter().copied(),
                    session.administered(),
                    dimension,
                ) else {
                    break;
                };

                self.bus.emit(&ExecutorEvent::TestStarted {
                    item_id: item.id.clone(),
                    dimension,
                });

                let backend = choose_backend(item, &available)?;
                let (mut result, stats) = match isolator
                    .run_replicated(backend.as_ref(), item, self.adapter.as_ref())
                    .await
                {
                    Ok(pair) => pair,
                    Err(err) => {
                        warn!(item_id = %item.id, backend = backend.id(), error = %err, "backend execution failed");
                        (failed_result(item, backend.id(), &err), NoiseStats {
                            replications: 0,
                            mean_score: 0.0,
                            cv: 0.0,
                            flagged: false,
                        })
                    }
                };
                stamp_noise(&mut result, &stats);

                let passed = result.passed;
                let est = session.record_response(item, passed)?;
                self.bus.emit(&ExecutorEvent::TestCompleted {
                    item_id: item.id.clone(),
                    passed,
                    theta: est.theta,
                    se: est.se,
                    dimension,
                });
                self.bus.emit(&ExecutorEvent::IrtUpdated {
                    dimension,
                    theta: est.theta,
                    se: est.se,
                    n_tests: session.n_responses(),
                });

                note_backend(&mut backends_used, &result.backend_id);
                test_results.push(result);
            }

            estimates.push(session.result());
            if cancelled {
                break;
            }
        }

        let results = ExecutionResults {
            evaluation_id,
            test_results,
            irt_estimates: estimates,
            metadata: ExecutionMetadata {
                strategy: ExecutionStrategy::Adaptive,
                backends_used,
            },
        };
        self.bus.emit(&ExecutorEvent::Completed {
            results: results.clone(),
        });
        Ok(results)
    }

    /// Run every item once, then fit one session per dimension by
    /// replaying the recorded responses in execution order. No convergence
    /// checks gate execution.
    pub async fn run_exhaustive(
        &self,
        plan: &ExecutionPlan,
    ) -> Result<ExecutionResults, ExecutorError> {
        let evaluation_id = Uuid::new_v4();
        let available = self.available_backends().await;
        if available.is_empty() {
            return Err(ExecutorError::NoBackendAvailable);
        }

        self.bus.emit(&ExecutorEvent::Started {
            evaluation_id,
            plan: plan.clone(),
        });

        let mut test_results: Vec<TestResult> = Vec::new();
        let mut outcomes: Vec<(&TestItem, bool)> = Vec::new();
        let mut backends_used: Vec<String> = Vec::new();

        for item in &plan.items {
            self.bus.emit(&ExecutorEvent::TestStarted {
                item_id: item.id.clone(),
                dimension: item.dimension,
            });

            let backend = choose_backend(item, &available)?;
            let result = match backend.execute(item, self.adapter.as_ref()).await {
                Ok(result) => result,
                Err(err) => {
                    warn!(item_id = %item.id, backend = backend.id(), error = %err, "backend execution failed");
                    failed_result(item, backend.id(), &err)
                }
            };

            outcomes.push((item, result.passed));
            note_backend(&mut backends_used, &result.backend_id);
            test_results.push(result);
        }

        let mut estimates: Vec<DimensionEstimate> = Vec::new();
        for dimension in plan.dimensions() {
            let mut session = CatSession::new(dimension, self.config.estimator.clone());
            for (item, passed) in outcomes.iter().filter(|(i, _)| i.dimension == dimension) {
                let est = session.record_response(item, *passed)?;
                self.bus.emit(&ExecutorEvent::TestCompleted {
                    item_id: item.id.clone(),
                    passed: *passed,
                    theta: est.theta,
                    se: est.se,
                    dimension,
                });
                self.bus.emit(&ExecutorEvent::IrtUpdated {
                    dimension,
                    theta: est.theta,
                    se: est.se,
                    n_tests: session.n_responses(),
                });
            }
            estimates.push(session.result());
        }

        let results = ExecutionResults {
            evaluation_id,
            test_results,
            irt_estimates: estimates,
            metadata: ExecutionMetadata {
                strategy: ExecutionStrategy::Exhaustive,
                backends_used,
            },
        };
        self.bus.emit(&ExecutorEvent::Completed {
            results: results.clone(),
        });
        Ok(results)
    }

    async fn available_backends(&self) -> Vec<Arc<dyn ExecutionBackend>> {
        let mut available = Vec::new();
        for backend in &self.backends {
            let health = backend.healthcheck().await;
            if health.available {
                available.push(backend.clone());
            } else {
                warn!(
                    backend = backend.id(),
                    error = health.error.as_deref().unwrap_or("unknown"),
                    "backend failed health check"
                );
            }
        }
        available
    }
}

/// Backend choice for one item: first available preferred backend, then
/// the built-in backend, then anything still standing.
fn choose_backend<'a>(
    item: &TestItem,
    available: &'a [Arc<dyn ExecutionBackend>],
) -> Result<&'a Arc<dyn ExecutionBackend>, ExecutorError> {
    for preferred in &item.preferred_backends {
        if let Some(backend) = available.iter().find(|b| b.id() == preferred) {
            return Ok(backend);
        }
    }
    if let Some(backend) = available.iter().find(|b| b.id() == BUILTIN_BACKEND_ID) {
        return Ok(backend);
    }
    available
        .first()
        .ok_or_else(|| ExecutorError::NoBackendForItem {
            item_id: item.id.clone(),
        })
}

/// A backend failure counts as a failed response for the item; the
/// dimension proceeds. The error rides along for the reporter.
fn failed_result(item: &TestItem, backend_id: &str, err: &BackendError) -> TestResult {
    let mut metadata = std::collections::HashMap::new();
    metadata.insert("error".to_string(), serde_json::json!(true));
    metadata.insert("error_detail".to_string(), serde_json::json!(err.to_string()));
    TestResult {
        item_id: item.id.clone(),
        backend_id: backend_id.to_string(),
        passed: false,
        score: 0.0,
        metrics: std::collections::HashMap::new(),
        raw_output: String::new(),
        duration_ms: 0,
        metadata,
    }
}

fn note_backend(used: &mut Vec<String>, backend_id: &str) {
    if !used.iter().any(|id| id == backend_id) {
        used.push(backend_id.to_string());
    }
}

fn stamp_noise(result: &mut TestResult, stats: &NoiseStats) {
    result
        .metadata
        .insert("noise_cv".to_string(), serde_json::json!(stats.cv));
    result
        .metadata
        .insert("noise_flag".to_string(), serde_json::json!(stats.flagged));
    result.metadata.insert(
        "noise_replications".to_string(),
        serde_json::json!(stats.replications),
    );
}
