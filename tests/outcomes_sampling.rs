//! End-to-end check of Outcomes sampling statistics over many draws.
//!
//! Builds the four-bucket distribution from the spec's own worked example directly against
//! the value model (no AST/interpreter involved — `Outcomes::sample` is the unit under test),
//! then samples it 10,000 times with a fixed seed and checks the empirical success fraction
//! and mean latency land where the worked example says they should.

use std::time::Duration;

use meshsim::{Outcomes, Value};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

fn bucket(weight: f64, success: bool, latency_ms: u64) -> (f64, Value) {
    (weight, Value::with_time(meshsim::ValueKind::Bool(success), Duration::from_millis(latency_ms)))
}

#[test]
fn ten_thousand_draws_match_the_worked_distribution() {
    let mut outcomes = Outcomes::new();
    let (w, v) = bucket(0.85, true, 75);
    outcomes.add(w, v);
    let (w, v) = bucket(0.05, true, 100);
    outcomes.add(w, v);
    let (w, v) = bucket(0.05, true, 150);
    outcomes.add(w, v);
    let (w, v) = bucket(0.05, false, 50);
    outcomes.add(w, v);

    let mut rng = ChaCha8Rng::seed_from_u64(7);
    let n = 10_000;
    let mut successes = 0u32;
    let mut total_latency = Duration::ZERO;
    for _ in 0..n {
        let (sampled, sample_time) = outcomes.sample(&mut rng).unwrap();
        if sampled.get_bool().unwrap() {
            successes += 1;
        }
        total_latency += sample_time + sampled.time;
    }

    let success_fraction = successes as f64 / n as f64;
    assert!((success_fraction - 0.95).abs() < 0.01, "success fraction {success_fraction} not within 0.01 of 0.95");

    let mean_latency_ms = total_latency.as_secs_f64() * 1000.0 / n as f64;
    assert!((80.0..=95.0).contains(&mean_latency_ms), "mean latency {mean_latency_ms}ms not in [80, 95]");
}

#[test]
fn empty_outcomes_is_rejected() {
    let outcomes = Outcomes::new();
    let mut rng = ChaCha8Rng::seed_from_u64(1);
    assert!(outcomes.sample(&mut rng).is_err());
}
