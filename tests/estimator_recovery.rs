//! Simulated acceptance study: the CAT loop must recover known abilities.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use caliper_harness::cat::irt::icc;
use caliper_harness::cat::{check, select_next};
use caliper_harness::{
    CatSession, ConvergenceConfig, Dimension, EstimatorConfig, ItemParams, TestItem,
};

fn simulation_pool() -> Vec<TestItem> {
    (0..50)
        .map(|i| {
            let beta = -3.0 + 6.0 * i as f64 / 49.0;
            TestItem::new(
                format!("sim-{i}"),
                Dimension::Functional,
                ItemParams::new(1.8, beta, 0.0),
            )
        })
        .collect()
}

fn pearson(xs: &[f64], ys: &[f64]) -> f64 {
    let n = xs.len() as f64;
    let mean_x = xs.iter().sum::<f64>() / n;
    let mean_y = ys.iter().sum::<f64>() / n;
    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (x, y) in xs.iter().zip(ys.iter()) {
        let dx = x - mean_x;
        let dy = y - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }
    cov / (var_x.sqrt() * var_y.sqrt())
}

fn rmse(xs: &[f64], ys: &[f64]) -> f64 {
    let n = xs.len() as f64;
    let sum: f64 = xs
        .iter()
        .zip(ys.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum();
    (sum / n).sqrt()
}

#[test]
fn cat_loop_recovers_simulated_abilities() {
    let pool = simulation_pool();
    // Precision target or budget; the stability shortcut stays out of the
    // way so every run earns its stop.
    let convergence = ConvergenceConfig {
        se_threshold: 0.3,
        max_tests: 50,
        stable_window: 0,
        ..ConvergenceConfig::default()
    };

    let mut rng = StdRng::seed_from_u64(7);
    let mut truths = Vec::with_capacity(100);
    let mut estimates = Vec::with_capacity(100);

    for k in 0..100 {
        let truth = -3.0 + 6.0 * k as f64 / 99.0;
        let mut session = CatSession::new(Dimension::Functional, EstimatorConfig::default());

        loop {
            if check(&session.snapshot(), &convergence).is_some() {
                break;
            }
            let Some(item) = select_next(
                session.theta(),
                &pool,
                session.administered(),
                Dimension::Functional,
            ) else {
                break;
            };
            let passed = rng.gen_bool(icc(truth, &item.params));
            session.record_response(item, passed).unwrap();
        }

        truths.push(truth);
        estimates.push(session.theta());
    }

    let r = pearson(&truths, &estimates);
    let err = rmse(&truths, &estimates);
    assert!(r > 0.95, "true-vs-estimated correlation too low: {r:.4}");
    assert!(err < 0.5, "true-vs-estimated RMSE too high: {err:.4}");
}

#[test]
fn precise_sessions_use_fewer_items_than_the_pool() {
    // Mid-range abilities should converge on SE well before exhausting 50
    // items; that economy is the whole point of adaptive testing.
    let pool = simulation_pool();
    let convergence = ConvergenceConfig {
        se_threshold: 0.3,
        max_tests: 50,
        stable_window: 0,
        ..ConvergenceConfig::default()
    };

    let mut rng = StdRng::seed_from_u64(11);
    let truth = 0.25;
    let mut session = CatSession::new(Dimension::Functional, EstimatorConfig::default());
    loop {
        if check(&session.snapshot(), &convergence).is_some() {
            break;
        }
        let Some(item) = select_next(
            session.theta(),
            &pool,
            session.administered(),
            Dimension::Functional,
        ) else {
            break;
        };
        let passed = rng.gen_bool(icc(truth, &item.params));
        session.record_response(item, passed).unwrap();
    }

    assert!(session.se() <= 0.35, "se = {}", session.se());
    assert!(
        session.n_responses() < 30,
        "used {} items",
        session.n_responses()
    );
}
