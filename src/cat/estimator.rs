//! Ability estimation from administered items and binary responses.
//!
//! Maximum likelihood via damped Newton–Raphson is the workhorse; expected
//! a posteriori under a standard-normal prior covers the cases where MLE is
//! undefined (short or unanimous response vectors) or fails to converge.
//! Numeric pathologies never panic: the worst case degrades to the prior.

use once_cell::sync::Lazy;
use serde::Serialize;
use statrs::distribution::{Continuous, Normal};
use std::fmt;

use crate::cat::irt::{fisher_information, icc, log_likelihood, standard_error, PROB_EPSILON};
use crate::model::ItemParams;

/// Below this response count MLE is not attempted.
const MIN_MLE_RESPONSES: usize = 3;

/// Newton steps with a curvature this flat cannot be trusted.
const HESSIAN_FLOOR: f64 = 1e-10;

/// A candidate step may lower the log-likelihood by at most this much.
const STEP_TOLERANCE: f64 = -1e-10;

/// Number of step-halvings tried before giving up on improvement
/// (fractions 1, 1/2, …, 2⁻⁹).
const MAX_HALVINGS: u32 = 9;

static STD_NORMAL: Lazy<Normal> =
    Lazy::new(|| Normal::new(0.0, 1.0).expect("standard normal parameters are valid"));

// =============================================================================
// Config and result types
// =============================================================================

/// Tunables for both estimation branches.
#[derive(Debug, Clone)]
pub struct EstimatorConfig {
    /// Lower ability bound; estimates are clamped here.
    pub theta_min: f64,
    /// Upper ability bound.
    pub theta_max: f64,
    /// Newton stops once the accepted update magnitude falls below this.
    pub tolerance: f64,
    /// Hard cap on Newton iterations.
    pub max_iterations: usize,
    /// Quadrature points for the EAP grid over [theta_min, theta_max].
    pub grid_points: usize,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            theta_min: -4.0,
            theta_max: 4.0,
            tolerance: 1e-3,
            max_iterations: 100,
            grid_points: 41,
        }
    }
}

/// Which branch produced the estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EstimationMethod {
    Mle,
    Eap,
}

impl fmt::Display for EstimationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EstimationMethod::Mle => f.write_str("mle"),
            EstimationMethod::Eap => f.write_str("eap"),
        }
    }
}

/// Ability estimate with its uncertainty.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct AbilityEstimate {
    pub theta: f64,
    pub se: f64,
    pub method: EstimationMethod,
    pub converged: bool,
}

// =============================================================================
// Entry point
// =============================================================================

/// Estimate ability from an administered set and its binary responses.
///
/// Selection rule: fewer than 3 responses, or a unanimous response vector,
/// goes straight to EAP (MLE would diverge). Otherwise MLE is tried and EAP
/// is the fallback when it fails its convergence criterion. The returned
/// `method` reflects what was actually used.
pub fn estimate(items: &[ItemParams], responses: &[bool], config: &EstimatorConfig) -> AbilityEstimate {
    let n = responses.len().min(items.len());
    let items = &items[..n];
    let responses = &responses[..n];

    let unanimous = responses.iter().all(|&r| r == responses[0]);
    if n < MIN_MLE_RESPONSES || (n > 0 && unanimous) {
        return eap(items, responses, config);
    }

    match mle(items, responses, config) {
        Some(est) if est.converged => est,
        _ => eap(items, responses, config),
    }
}

// =============================================================================
// MLE: Newton–Raphson with step-halving
// =============================================================================

fn mle(items: &[ItemParams], responses: &[bool], config: &EstimatorConfig) -> Option<AbilityEstimate> {
    let mut theta = 0.0_f64;
    let mut ll = log_likelihood(theta, items, responses);
    let mut converged = false;

    for _ in 0..config.max_iterations {
        let mut gradient = 0.0;
        let mut hessian = 0.0;
        for (params, &passed) in items.iter().zip(responses.iter()) {
            let p = icc(theta, params).clamp(PROB_EPSILON, 1.0 - PROB_EPSILON);
            let p_star = (p - params.guessing) / (1.0 - params.guessing);
            let response = if passed { 1.0 } else { 0.0 };
            gradient += params.discrimination * (p_star / p) * (response - p);
            hessian -= fisher_information(theta, params);
        }

        if hessian.abs() < HESSIAN_FLOOR {
            return None;
        }
        let full_step = -gradient / hessian;
        if !full_step.is_finite() {
            return None;
        }

        // Accept the largest fraction of the Newton step that does not
        // lower the log-likelihood beyond tolerance; if every halving
        // fails, take the last one anyway so the iteration moves.
        let mut fraction = 1.0_f64;
        let mut accepted: Option<(f64, f64)> = None;
        let mut last_candidate = (theta, ll);
        for _ in 0..=MAX_HALVINGS {
            let candidate = (theta + fraction * full_step).clamp(config.theta_min, config.theta_max);
            let candidate_ll = log_likelihood(candidate, items, responses);
            last_candidate = (candidate, candidate_ll);
            if candidate_ll - ll >= STEP_TOLERANCE {
                accepted = Some((candidate, candidate_ll));
                break;
            }
            fraction *= 0.5;
        }
        let (next_theta, next_ll) = accepted.unwrap_or(last_candidate);

        let update = (next_theta - theta).abs();
        theta = next_theta;
        ll = next_ll;
        if update < config.tolerance {
            converged = true;
            break;
        }
    }

    let se = standard_error(theta, items.iter());
    if !theta.is_finite() || !se.is_finite() {
        return None;
    }

    Some(AbilityEstimate {
        theta,
        se,
        method: EstimationMethod::Mle,
        converged,
    })
}

// =============================================================================
// EAP: fixed-grid posterior mean under a standard-normal prior
// =============================================================================

fn eap(items: &[ItemParams], responses: &[bool], config: &EstimatorConfig) -> AbilityEstimate {
    let points = config.grid_points.max(2);
    let step = (config.theta_max - config.theta_min) / (points - 1) as f64;

    // Shift log-likelihoods by their maximum before exponentiating; the
    // shift cancels in the normalization and keeps long response vectors
    // out of the underflow regime.
    let mut grid = Vec::with_capacity(points);
    let mut max_ll = f64::NEG_INFINITY;
    for i in 0..points {
        let theta_i = config.theta_min + step * i as f64;
        let ll = log_likelihood(theta_i, items, responses);
        if ll > max_ll {
            max_ll = ll;
        }
        grid.push((theta_i, ll));
    }
    if !max_ll.is_finite() {
        max_ll = 0.0;
    }

    let mut weight_sum = 0.0;
    let mut mean_acc = 0.0;
    let mut weights = Vec::with_capacity(points);
    for &(theta_i, ll) in &grid {
        let weight = (ll - max_ll).exp() * STD_NORMAL.pdf(theta_i) * step;
        weights.push(weight);
        weight_sum += weight;
        mean_acc += theta_i * weight;
    }

    if !(weight_sum.is_finite() && weight_sum > 0.0) {
        // Fully degenerate likelihood: report the prior.
        return AbilityEstimate {
            theta: 0.0,
            se: 1.0,
            method: EstimationMethod::Eap,
            converged: true,
        };
    }

    let mean = mean_acc / weight_sum;
    let mut var_acc = 0.0;
    for (&(theta_i, _), &weight) in grid.iter().zip(weights.iter()) {
        let dev = theta_i - mean;
        var_acc += dev * dev * weight;
    }
    let variance = (var_acc / weight_sum).max(0.0);

    AbilityEstimate {
        theta: mean.clamp(config.theta_min, config.theta_max),
        se: variance.sqrt(),
        method: EstimationMethod::Eap,
        converged: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spread_pool(n: usize, alpha: f64) -> Vec<ItemParams> {
        (0..n)
            .map(|i| {
                let beta = -2.0 + 4.0 * i as f64 / (n - 1) as f64;
                ItemParams::new(alpha, beta, 0.0)
            })
            .collect()
    }

    #[test]
    fn short_history_uses_eap() {
        let pool = spread_pool(10, 2.0);
        let est = estimate(&pool[..2], &[true, false], &EstimatorConfig::default());
        assert_eq!(est.method, EstimationMethod::Eap);
        assert!(est.converged);
        assert!(est.theta.is_finite() && est.se.is_finite());
    }

    #[test]
    fn unanimous_history_uses_eap_with_matching_sign() {
        let pool = spread_pool(6, 2.0);
        let cfg = EstimatorConfig::default();

        let up = estimate(&pool, &[true; 6], &cfg);
        assert_eq!(up.method, EstimationMethod::Eap);
        assert!(up.theta > 0.0);

        let down = estimate(&pool, &[false; 6], &cfg);
        assert_eq!(down.method, EstimationMethod::Eap);
        assert!(down.theta < 0.0);
    }

    #[test]
    fn mixed_history_uses_mle() {
        let pool = spread_pool(10, 2.0);
        let responses = [
            true, false, true, false, true, false, true, false, true, false,
        ];
        let est = estimate(&pool, &responses, &EstimatorConfig::default());
        assert_eq!(est.method, EstimationMethod::Mle);
        assert!(est.converged);
        assert!(est.theta.abs() < 1.5);
        assert!(est.se.is_finite());
    }

    #[test]
    fn mle_estimate_tracks_easy_pass_hard_fail_pattern() {
        let pool = spread_pool(10, 2.0);
        // Passed everything below β ≈ 0.7, failed the rest: ability near 1.
        let responses: Vec<bool> = pool.iter().map(|p| p.difficulty < 0.7).collect();
        let est = estimate(&pool, &responses, &EstimatorConfig::default());
        assert_eq!(est.method, EstimationMethod::Mle);
        assert!((0.0..2.0).contains(&est.theta), "theta = {}", est.theta);
    }

    #[test]
    fn estimates_stay_inside_bounds() {
        let pool = spread_pool(10, 2.5);
        let cfg = EstimatorConfig::default();
        let est = estimate(&pool, &[true; 10], &cfg);
        assert!(est.theta <= cfg.theta_max && est.theta >= cfg.theta_min);
    }

    #[test]
    fn degenerate_items_fall_back_without_panicking() {
        // Zero discrimination carries zero information everywhere, so MLE
        // has a flat likelihood; the estimator must degrade, not panic.
        let pool = vec![ItemParams::new(0.0, 0.0, 0.0); 5];
        let est = estimate(&pool, &[true, false, true, false, true], &EstimatorConfig::default());
        assert_eq!(est.method, EstimationMethod::Eap);
        assert!(est.theta.abs() < 1e-6);
        assert!(est.se.is_finite());
    }

    #[test]
    fn empty_history_reports_prior_mean() {
        let est = estimate(&[], &[], &EstimatorConfig::default());
        assert_eq!(est.method, EstimationMethod::Eap);
        assert!(est.theta.abs() < 1e-9);
        // Grid-truncated standard normal: SE just under 1.
        assert!((0.9..=1.0).contains(&est.se));
    }
}
