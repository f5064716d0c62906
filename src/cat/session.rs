//! Per-dimension CAT session state.
//!
//! A session owns its mutable state and is only ever driven from one task:
//! items are administered strictly one at a time, so the estimator always
//! sees a fixed history. The item pool itself stays outside the session and
//! read-only.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::cat::estimator::{estimate, AbilityEstimate, EstimatorConfig};
use crate::cat::irt::normalized_score;
use crate::model::{Dimension, ItemParams, TestItem};

/// Two-sided 95% normal quantile for confidence intervals.
const CI_Z: f64 = 1.96;

/// One administered item outcome, with ability/SE snapshots for
/// traceability.
#[derive(Debug, Clone, Serialize)]
pub struct RecordedResponse {
    pub item_id: String,
    pub passed: bool,
    pub timestamp: DateTime<Utc>,
    /// Ability estimate after this response was folded in.
    pub theta: f64,
    /// Standard error after this response was folded in.
    pub se: f64,
}

/// Read-only view of session state consumed by the convergence controller.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub dimension: Dimension,
    pub theta: f64,
    pub se: f64,
    pub n_responses: usize,
    pub elapsed: Duration,
    /// Ability estimates in administration order, one per response.
    pub theta_history: Vec<f64>,
    pub converged_at: Option<usize>,
}

/// Per-dimension summary produced when a session stops.
#[derive(Debug, Clone, Serialize)]
pub struct DimensionEstimate {
    pub dimension: Dimension,
    pub theta: f64,
    pub se: f64,
    pub ci_lower: f64,
    pub ci_upper: f64,
    pub n_tests: usize,
    pub normalized_score: f64,
    pub converged_at: Option<usize>,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("item {item_id} is {item_dimension}, session measures {session_dimension}")]
    DimensionMismatch {
        item_id: String,
        item_dimension: Dimension,
        session_dimension: Dimension,
    },
    #[error("item {0} was already administered in this session")]
    DuplicateItem(String),
}

/// Mutable adaptive-testing state for one dimension.
#[derive(Debug)]
pub struct CatSession {
    dimension: Dimension,
    theta: f64,
    se: f64,
    responses: Vec<RecordedResponse>,
    administered: HashSet<String>,
    administered_params: Vec<ItemParams>,
    outcomes: Vec<bool>,
    started: Instant,
    converged_at: Option<usize>,
    estimator: EstimatorConfig,
}

impl CatSession {
    pub fn new(dimension: Dimension, estimator: EstimatorConfig) -> Self {
        Self {
            dimension,
            theta: 0.0,
            se: f64::INFINITY,
            responses: Vec::new(),
            administered: HashSet::new(),
            administered_params: Vec::new(),
            outcomes: Vec::new(),
            started: Instant::now(),
            converged_at: None,
            estimator,
        }
    }

    pub fn dimension(&self) -> Dimension {
        self.dimension
    }

    pub fn theta(&self) -> f64 {
        self.theta
    }

    pub fn se(&self) -> f64 {
        self.se
    }

    pub fn n_responses(&self) -> usize {
        self.responses.len()
    }

    pub fn administered(&self) -> &HashSet<String> {
        &self.administered
    }

    pub fn responses(&self) -> &[RecordedResponse] {
        &self.responses
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn converged_at(&self) -> Option<usize> {
        self.converged_at
    }

    /// Fold one pass/fail outcome into the session and refresh the ability
    /// estimate over the full history. Each item may be recorded once.
    pub fn record_response(
        &mut self,
        item: &TestItem,
        passed: bool,
    ) -> Result<AbilityEstimate, SessionError> {
        if item.dimension != self.dimension {
            return Err(SessionError::DimensionMismatch {
                item_id: item.id.clone(),
                item_dimension: item.dimension,
                session_dimension: self.dimension,
            });
        }
        if !self.administered.insert(item.id.clone()) {
            return Err(SessionError::DuplicateItem(item.id.clone()));
        }

        self.administered_params.push(item.params);
        self.outcomes.push(passed);

        let est = estimate(&self.administered_params, &self.outcomes, &self.estimator);
        self.theta = est.theta;
        self.se = est.se;
        self.responses.push(RecordedResponse {
            item_id: item.id.clone(),
            passed,
            timestamp: Utc::now(),
            theta: self.theta,
            se: self.se,
        });
        Ok(est)
    }

    /// Record that convergence was first detected at the current response
    /// count. Idempotent; the index never moves once set.
    pub fn mark_converged(&mut self) {
        if self.converged_at.is_none() {
            self.converged_at = Some(self.responses.len());
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            dimension: self.dimension,
            theta: self.theta,
            se: self.se,
            n_responses: self.responses.len(),
            elapsed: self.elapsed(),
            theta_history: self.responses.iter().map(|r| r.theta).collect(),
            converged_at: self.converged_at,
        }
    }

    /// Final per-dimension summary: point estimate, 95% CI, normalized
    /// score and bookkeeping counters.
    pub fn result(&self) -> DimensionEstimate {
        DimensionEstimate {
            dimension: self.dimension,
            theta: self.theta,
            se: self.se,
            ci_lower: self.theta - CI_Z * self.se,
            ci_upper: self.theta + CI_Z * self.se,
            n_tests: self.responses.len(),
            normalized_score: normalized_score(self.theta),
            converged_at: self.converged_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ItemParams;

    fn item(id: &str, difficulty: f64) -> TestItem {
        TestItem::new(
            id,
            Dimension::Robustness,
            ItemParams::new(2.0, difficulty, 0.0),
        )
    }

    #[test]
    fn responses_and_administered_stay_in_lockstep() {
        let mut session = CatSession::new(Dimension::Robustness, EstimatorConfig::default());
        for (i, difficulty) in [-1.0, 0.0, 1.0].iter().enumerate() {
            session
                .record_response(&item(&format!("r-{i}"), *difficulty), i % 2 == 0)
                .unwrap();
            assert_eq!(session.n_responses(), session.administered().len());
        }
    }

    #[test]
    fn estimates_are_finite_after_first_response() {
        let mut session = CatSession::new(Dimension::Robustness, EstimatorConfig::default());
        assert!(session.se().is_infinite());
        session.record_response(&item("r-0", 0.0), true).unwrap();
        assert!(session.theta().is_finite());
        assert!(session.se().is_finite());
        assert!(session.theta().abs() <= 4.0);
    }

    #[test]
    fn rejects_duplicate_items() {
        let mut session = CatSession::new(Dimension::Robustness, EstimatorConfig::default());
        let it = item("dup", 0.0);
        session.record_response(&it, true).unwrap();
        let err = session.record_response(&it, false).unwrap_err();
        assert!(matches!(err, SessionError::DuplicateItem(_)));
        assert_eq!(session.n_responses(), 1);
    }

    #[test]
    fn rejects_items_from_other_dimensions() {
        let mut session = CatSession::new(Dimension::Robustness, EstimatorConfig::default());
        let foreign = TestItem::new("x", Dimension::Security, ItemParams::default());
        let err = session.record_response(&foreign, true).unwrap_err();
        assert!(matches!(err, SessionError::DimensionMismatch { .. }));
    }

    #[test]
    fn converged_index_is_sticky() {
        let mut session = CatSession::new(Dimension::Robustness, EstimatorConfig::default());
        session.record_response(&item("a", 0.0), true).unwrap();
        session.mark_converged();
        assert_eq!(session.converged_at(), Some(1));
        // The caller may explicitly continue; the index must not move.
        session.record_response(&item("b", 0.5), false).unwrap();
        session.mark_converged();
        assert_eq!(session.converged_at(), Some(1));
    }

    #[test]
    fn result_carries_symmetric_confidence_interval() {
        let mut session = CatSession::new(Dimension::Robustness, EstimatorConfig::default());
        for (i, d) in [-1.5, -0.5, 0.5, 1.5].iter().enumerate() {
            session
                .record_response(&item(&format!("i-{i}"), *d), i < 2)
                .unwrap();
        }
        let result = session.result();
        assert_eq!(result.n_tests, 4);
        let half_width = CI_Z * result.se;
        assert!((result.ci_upper - result.theta - half_width).abs() < 1e-12);
        assert!((result.theta - result.ci_lower - half_width).abs() < 1e-12);
        assert!((0.0..=100.0).contains(&result.normalized_score));
    }
}
