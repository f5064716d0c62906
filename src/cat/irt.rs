//! Math kernels for the three-parameter logistic (3-PL) IRT model.
//!
//! Everything here is pure and synchronous. Callers hold the item
//! parameters; ability state lives in the session.

use crate::model::ItemParams;

/// Exponent clamp keeping `exp` finite for any input.
pub(crate) const MAX_EXPONENT: f64 = 500.0;

/// Probability floor/ceiling applied before logarithms.
pub(crate) const PROB_EPSILON: f64 = 1e-10;

/// Conventional scaling constant aligning the logistic with the
/// normal-ogive metric. Fixed; changing it would silently rescale every
/// reported score.
const SCALE_D: f64 = 1.7;

/// Item characteristic curve: `P(θ) = γ + (1 − γ)·σ(α(θ − β))`.
///
/// Saturates at 1 for large positive exponents and at γ for large negative
/// ones; the result is in `[γ, 1]` for all finite inputs.
pub fn icc(theta: f64, params: &ItemParams) -> f64 {
    let exponent = (params.discrimination * (theta - params.difficulty))
        .clamp(-MAX_EXPONENT, MAX_EXPONENT);
    let sigma = 1.0 / (1.0 + (-exponent).exp());
    params.guessing + (1.0 - params.guessing) * sigma
}

/// Expected Fisher information of one item at θ:
/// `I = α²·(P*²/P)·(1 − P)` with `P* = (P − γ)/(1 − γ)`.
///
/// Guessing dilutes information; at the numerical corners (`P ≤ γ` or
/// `P ≥ 1`) the item carries none.
pub fn fisher_information(theta: f64, params: &ItemParams) -> f64 {
    let p = icc(theta, params);
    if p <= params.guessing || p >= 1.0 {
        return 0.0;
    }
    let p_star = (p - params.guessing) / (1.0 - params.guessing);
    let alpha = params.discrimination;
    alpha * alpha * (p_star * p_star / p) * (1.0 - p)
}

/// Sum of per-item Fisher informations at θ.
pub fn total_information<'a, I>(theta: f64, items: I) -> f64
where
    I: IntoIterator<Item = &'a ItemParams>,
{
    items
        .into_iter()
        .map(|params| fisher_information(theta, params))
        .sum()
}

/// Standard error at θ for an administered set: `1/√I_total`, or `+∞`
/// when the set carries no information.
pub fn standard_error<'a, I>(theta: f64, items: I) -> f64
where
    I: IntoIterator<Item = &'a ItemParams>,
{
    let info = total_information(theta, items);
    if info > 0.0 {
        1.0 / info.sqrt()
    } else {
        f64::INFINITY
    }
}

/// Monotone mapping from ability to a 0–100 score: `100/(1 + e^(−1.7θ))`.
pub fn normalized_score(theta: f64) -> f64 {
    let exponent = (-SCALE_D * theta).clamp(-MAX_EXPONENT, MAX_EXPONENT);
    100.0 / (1.0 + exponent.exp())
}

/// Log-likelihood of a binary response vector at θ. Each probability is
/// clamped into `[1e-10, 1 − 1e-10]` before taking logarithms.
pub fn log_likelihood(theta: f64, items: &[ItemParams], responses: &[bool]) -> f64 {
    items
        .iter()
        .zip(responses.iter())
        .map(|(params, &passed)| {
            let p = icc(theta, params).clamp(PROB_EPSILON, 1.0 - PROB_EPSILON);
            if passed {
                p.ln()
            } else {
                (1.0 - p).ln()
            }
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(a: f64, b: f64, g: f64) -> ItemParams {
        ItemParams::new(a, b, g)
    }

    #[test]
    fn icc_bounded_between_guessing_and_one() {
        let p = params(2.0, 0.5, 0.2);
        for theta in [-1e6, -8.0, -1.0, 0.0, 0.5, 1.0, 8.0, 1e6] {
            let prob = icc(theta, &p);
            assert!(
                (p.guessing..=1.0).contains(&prob),
                "icc({theta}) = {prob} out of [γ, 1]"
            );
            assert!(prob.is_finite());
        }
    }

    #[test]
    fn icc_at_difficulty_is_midpoint_of_guessing_and_one() {
        for g in [0.0, 0.1, 0.25] {
            let p = params(1.3, -0.7, g);
            let prob = icc(p.difficulty, &p);
            assert!((prob - (1.0 + g) / 2.0).abs() < 1e-12);
        }
    }

    #[test]
    fn icc_saturates_without_overflow() {
        let p = params(3.0, 0.0, 0.15);
        assert!((icc(1e9, &p) - 1.0).abs() < 1e-9);
        assert!((icc(-1e9, &p) - p.guessing).abs() < 1e-9);
    }

    #[test]
    fn information_collapses_to_two_parameter_form_without_guessing() {
        let p = params(1.8, 0.4, 0.0);
        for theta in [-2.0, 0.0, 0.4, 1.5] {
            let prob = icc(theta, &p);
            let expected = p.discrimination * p.discrimination * prob * (1.0 - prob);
            assert!((fisher_information(theta, &p) - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn information_zero_at_numerical_corners() {
        let p = params(2.0, 0.0, 0.3);
        // Far below difficulty the curve sits on the guessing floor.
        assert_eq!(fisher_information(-1e6, &p), 0.0);
        assert_eq!(fisher_information(1e6, &p), 0.0);
    }

    #[test]
    fn total_information_monotone_in_set_inclusion() {
        let pool = [
            params(1.0, -1.0, 0.0),
            params(1.5, 0.0, 0.1),
            params(2.0, 1.0, 0.0),
        ];
        let theta = 0.3;
        let mut last = 0.0;
        for n in 1..=pool.len() {
            let info = total_information(theta, pool[..n].iter());
            assert!(info >= last);
            last = info;
        }
        // SE therefore non-increasing as items are added.
        assert!(standard_error(theta, pool[..1].iter()) >= standard_error(theta, pool.iter()));
    }

    #[test]
    fn standard_error_infinite_without_information() {
        assert!(standard_error(0.0, std::iter::empty::<&ItemParams>()).is_infinite());
    }

    #[test]
    fn normalized_score_anchors() {
        assert!((normalized_score(0.0) - 50.0).abs() < 1e-12);
        assert!((normalized_score(-1e9)).abs() < 1e-9);
        assert!((normalized_score(1e9) - 100.0).abs() < 1e-9);
        let mut last = normalized_score(-4.0);
        for i in 1..=80 {
            let score = normalized_score(-4.0 + 0.1 * i as f64);
            assert!(score > last, "normalized score not strictly increasing");
            last = score;
        }
    }

    #[test]
    fn log_likelihood_finite_for_degenerate_probabilities() {
        // An impossibly easy item that was failed: the clamp keeps ln finite.
        let items = [params(5.0, -50.0, 0.0)];
        let ll = log_likelihood(4.0, &items, &[false]);
        assert!(ll.is_finite());
        assert!(ll < 0.0);
    }
}
