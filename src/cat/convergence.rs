//! Multi-criterion stopping rule for a CAT session.
//!
//! The controller is pure: given a session snapshot and a config it either
//! names the first matching stop criterion or none. Criteria are checked in
//! a fixed priority order: precision, then item budget, then wall clock,
//! then stability.

use std::fmt;
use std::time::Duration;

use crate::cat::session::SessionSnapshot;

/// Stopping thresholds for one dimension.
#[derive(Debug, Clone)]
pub struct ConvergenceConfig {
    /// Stop once the standard error drops below this.
    pub se_threshold: f64,
    /// Hard cap on administered items.
    pub max_tests: usize,
    /// Wall-clock budget for the session.
    pub timeout: Duration,
    /// Number of consecutive ability deltas inspected for stability.
    pub stable_window: usize,
    /// Each delta in the window must be strictly below this.
    pub stable_delta: f64,
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        Self {
            se_threshold: 0.3,
            max_tests: 100,
            timeout: Duration::from_secs(30 * 60),
            stable_window: 5,
            stable_delta: 0.1,
        }
    }
}

/// Why a session stopped. `Display` strings are stamped into events and
/// per-dimension results.
#[derive(Debug, Clone, PartialEq)]
pub enum ConvergenceReason {
    SeBelowThreshold { se: f64, threshold: f64 },
    MaxTestsReached { administered: usize, max: usize },
    TimedOut { elapsed: Duration, timeout: Duration },
    StableEstimate { window: usize, delta: f64 },
}

impl fmt::Display for ConvergenceReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConvergenceReason::SeBelowThreshold { se, threshold } => {
                write!(f, "SE below threshold ({se:.3} < {threshold:.3})")
            }
            ConvergenceReason::MaxTestsReached { administered, max } => {
                write!(f, "max tests reached ({administered} >= {max})")
            }
            ConvergenceReason::TimedOut { elapsed, timeout } => {
                write!(
                    f,
                    "Timeout after {}ms (budget {}ms)",
                    elapsed.as_millis(),
                    timeout.as_millis()
                )
            }
            ConvergenceReason::StableEstimate { window, delta } => {
                write!(
                    f,
                    "stable estimate over last {window} updates (each delta < {delta:.3})"
                )
            }
        }
    }
}

/// First matching stop criterion for the snapshot, or `None` to continue.
/// A session with no recorded responses never converges.
pub fn check(snapshot: &SessionSnapshot, config: &ConvergenceConfig) -> Option<ConvergenceReason> {
    if snapshot.theta_history.is_empty() {
        return None;
    }

    if snapshot.se < config.se_threshold {
        return Some(ConvergenceReason::SeBelowThreshold {
            se: snapshot.se,
            threshold: config.se_threshold,
        });
    }

    if snapshot.n_responses >= config.max_tests {
        return Some(ConvergenceReason::MaxTestsReached {
            administered: snapshot.n_responses,
            max: config.max_tests,
        });
    }

    if snapshot.elapsed >= config.timeout {
        return Some(ConvergenceReason::TimedOut {
            elapsed: snapshot.elapsed,
            timeout: config.timeout,
        });
    }

    if config.stable_window > 0 && snapshot.theta_history.len() > config.stable_window {
        let tail = &snapshot.theta_history[snapshot.theta_history.len() - config.stable_window - 1..];
        let stable = tail
            .windows(2)
            .all(|pair| (pair[1] - pair[0]).abs() < config.stable_delta);
        if stable {
            return Some(ConvergenceReason::StableEstimate {
                window: config.stable_window,
                delta: config.stable_delta,
            });
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Dimension;

    fn snapshot(history: &[f64], se: f64, elapsed_ms: u64) -> SessionSnapshot {
        SessionSnapshot {
            dimension: Dimension::Functional,
            theta: history.last().copied().unwrap_or(0.0),
            se,
            n_responses: history.len(),
            elapsed: Duration::from_millis(elapsed_ms),
            theta_history: history.to_vec(),
            converged_at: None,
        }
    }

    #[test]
    fn empty_history_never_converges() {
        let cfg = ConvergenceConfig {
            timeout: Duration::from_millis(0),
            ..ConvergenceConfig::default()
        };
        assert!(check(&snapshot(&[], f64::INFINITY, 10_000), &cfg).is_none());
    }

    #[test]
    fn precise_estimate_stops_with_se_reason() {
        let cfg = ConvergenceConfig::default();
        let reason = check(&snapshot(&[0.4, 0.5], 0.25, 10), &cfg).unwrap();
        assert!(matches!(reason, ConvergenceReason::SeBelowThreshold { .. }));
        assert!(reason.to_string().contains("SE"));
    }

    #[test]
    fn se_criterion_outranks_budget_and_stability() {
        let cfg = ConvergenceConfig {
            max_tests: 2,
            ..ConvergenceConfig::default()
        };
        let reason = check(&snapshot(&[0.5, 0.5, 0.5], 0.1, 10), &cfg).unwrap();
        assert!(matches!(reason, ConvergenceReason::SeBelowThreshold { .. }));
    }

    #[test]
    fn item_budget_stops_the_session() {
        let cfg = ConvergenceConfig {
            max_tests: 3,
            ..ConvergenceConfig::default()
        };
        let reason = check(&snapshot(&[0.1, 0.9, 0.2], 0.8, 10), &cfg).unwrap();
        assert!(matches!(reason, ConvergenceReason::MaxTestsReached { .. }));
        assert!(reason.to_string().contains("max tests"));
    }

    #[test]
    fn expired_wall_clock_reports_timeout() {
        let cfg = ConvergenceConfig {
            timeout: Duration::from_millis(1),
            ..ConvergenceConfig::default()
        };
        let reason = check(&snapshot(&[0.4], 0.9, 50), &cfg).unwrap();
        assert!(matches!(reason, ConvergenceReason::TimedOut { .. }));
        assert!(reason.to_string().contains("Timeout"));
    }

    #[test]
    fn quiet_ability_trace_reports_stability() {
        let cfg = ConvergenceConfig {
            se_threshold: 0.01,
            ..ConvergenceConfig::default()
        };
        let history = [0.50, 0.52, 0.51, 0.53, 0.52, 0.52];
        let reason = check(&snapshot(&history, 0.6, 10), &cfg).unwrap();
        assert!(matches!(reason, ConvergenceReason::StableEstimate { .. }));
        assert!(reason.to_string().contains("stable"));
    }

    #[test]
    fn one_large_delta_inside_window_defeats_stability() {
        let cfg = ConvergenceConfig {
            se_threshold: 0.01,
            ..ConvergenceConfig::default()
        };
        let history = [0.50, 0.52, 0.80, 0.53, 0.52, 0.52];
        assert!(check(&snapshot(&history, 0.6, 10), &cfg).is_none());
    }

    #[test]
    fn stability_needs_a_full_window_of_deltas() {
        let cfg = ConvergenceConfig {
            se_threshold: 0.01,
            ..ConvergenceConfig::default()
        };
        // Five estimates give only four deltas; not enough for window 5.
        let history = [0.50, 0.52, 0.51, 0.53, 0.52];
        assert!(check(&snapshot(&history, 0.6, 10), &cfg).is_none());
    }
}
