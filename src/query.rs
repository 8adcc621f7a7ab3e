//! Active query selection.
//!
//! Candidate control pairs are drawn uniformly from the control box and scored
//! against posterior reward samples with the chosen criterion. The answer
//! model is logistic: `P(A | w) = 1 / (1 + exp(−w · (φ_A − φ_B)))`.

use std::fmt;
use std::str::FromStr;

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::CONTROL_DIM;
use crate::error::{ensure, AlignError, Result};
use crate::sim::driver::FeatureSimulator;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Criterion {
    /// Maximise mutual information between the answer and the reward.
    Information,
    /// Maximise the minimum expected volume removed.
    Volume,
    /// First random candidate.
    Random,
}

impl FromStr for Criterion {
    type Err = AlignError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "information" => Ok(Criterion::Information),
            "volume" => Ok(Criterion::Volume),
            "random" => Ok(Criterion::Random),
            other => Err(AlignError::Precondition(format!(
                "criterion {other:?} must be one of \"information\", \"volume\" or \"random\""
            ))),
        }
    }
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Criterion::Information => "information",
            Criterion::Volume => "volume",
            Criterion::Random => "random",
        };
        write!(f, "{name}")
    }
}

/// A chosen pair of control sequences and their features.
#[derive(Clone, Debug)]
pub struct Query {
    pub controls_a: Array2<f64>,
    pub controls_b: Array2<f64>,
    pub phi_a: Array1<f64>,
    pub phi_b: Array1<f64>,
    pub score: f64,
}

fn answer_probabilities(w_samples: ArrayView2<f64>, diff: ArrayView1<f64>) -> Array1<f64> {
    w_samples.dot(&diff).mapv(|v| 1.0 / (1.0 + (-v).exp()))
}

/// `min(E[1 − p], E[p])` over reward samples.
pub fn volume_removed(w_samples: ArrayView2<f64>, diff: ArrayView1<f64>) -> f64 {
    let p = answer_probabilities(w_samples, diff);
    let mean = p.mean().unwrap_or(0.5);
    mean.min(1.0 - mean)
}

/// Sample estimate of I(answer; w) in bits.
pub fn information_gain(w_samples: ArrayView2<f64>, diff: ArrayView1<f64>) -> f64 {
    let p = answer_probabilities(w_samples, diff);
    let m = p.len() as f64;
    if m == 0.0 {
        return 0.0;
    }
    let p_a = p.sum();
    let p_b = m - p_a;

    p.iter()
        .map(|&pi| {
            let mut acc = 0.0;
            if pi > 0.0 {
                acc += pi * (m * pi / p_a).log2();
            }
            if pi < 1.0 {
                acc += (1.0 - pi) * (m * (1.0 - pi) / p_b).log2();
            }
            acc
        })
        .sum::<f64>()
        / m
}

/// Uniform (H, 2) controls in [−1, 1].
pub fn random_controls<R: Rng + ?Sized>(horizon: usize, rng: &mut R) -> Array2<f64> {
    Array2::from_shape_fn((horizon, CONTROL_DIM), |_| rng.gen_range(-1.0..=1.0))
}

/// Choose the best of `n_candidates` random control pairs under `criterion`.
///
/// `w_samples` is (m, d) with `d = sim.num_features()`; it is unused by
/// `Criterion::Random` but still validated.
pub fn select_query<S: FeatureSimulator + ?Sized, R: Rng + ?Sized>(
    sim: &mut S,
    w_samples: ArrayView2<f64>,
    criterion: Criterion,
    horizon: usize,
    n_candidates: usize,
    rng: &mut R,
) -> Result<Query> {
    let d = sim.num_features();
    if w_samples.ncols() != d {
        return Err(AlignError::shape("w_samples", format!("(m, {d})"), format!("{:?}", w_samples.dim())));
    }
    ensure!(n_candidates > 0, "query selection needs at least one candidate");
    ensure!(
        criterion == Criterion::Random || w_samples.nrows() > 0,
        "{criterion} selection needs reward samples"
    );

    let n_draws = if criterion == Criterion::Random { 1 } else { n_candidates };
    let mut best: Option<Query> = None;
    for _ in 0..n_draws {
        let controls_a = random_controls(horizon, rng);
        let controls_b = random_controls(horizon, rng);
        sim.feed(controls_a.view())?;
        let phi_a = sim.get_features()?;
        sim.feed(controls_b.view())?;
        let phi_b = sim.get_features()?;

        let diff = &phi_a - &phi_b;
        let score = match criterion {
            Criterion::Information => information_gain(w_samples, diff.view()),
            Criterion::Volume => volume_removed(w_samples, diff.view()),
            Criterion::Random => 0.0,
        };
        if best.as_ref().map_or(true, |b| score > b.score) {
            best = Some(Query {
                controls_a,
                controls_b,
                phi_a,
                phi_b,
                score,
            });
        }
    }

    let query = best.ok_or_else(|| AlignError::Precondition("no query candidates".into()))?;
    tracing::debug!(%criterion, score = query.score, "selected query");
    Ok(query)
}
