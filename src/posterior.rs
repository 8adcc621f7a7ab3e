//! Reward posterior sampling from labelled feature-difference pairs.
//!
//! The filter pipeline treats the sampler as a black box behind
//! `PosteriorSampler`. `MetropolisSampler` is a random-walk Metropolis chain
//! on the unit sphere with a uniform prior and a logistic preference
//! likelihood.

use std::fmt;
use std::str::FromStr;

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, ArrayView3, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::error::{ensure, AlignError, Result};

/// How a human may answer a query.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueryType {
    /// Must pick A or B.
    Strict,
    /// May also answer "about equal".
    Weak,
}

impl FromStr for QueryType {
    type Err = AlignError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "strict" => Ok(QueryType::Strict),
            "weak" => Ok(QueryType::Weak),
            other => Err(AlignError::Precondition(format!(
                "query type {other:?} must be either \"strict\" or \"weak\""
            ))),
        }
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryType::Strict => write!(f, "strict"),
            QueryType::Weak => write!(f, "weak"),
        }
    }
}

/// Side information returned with a batch of samples.
#[derive(Clone, Debug, Default)]
pub struct SampleMeta {
    pub acceptance_rate: f64,
    pub n_observations: usize,
}

/// Draws reward vectors given preference observations.
pub trait PosteriorSampler {
    fn dim(&self) -> usize;

    /// Forget every observation.
    fn reset(&mut self);

    fn feed(&mut self, phi_a: ArrayView1<f64>, phi_b: ArrayView1<f64>, preference: f64) -> Result<()>;

    /// Draw `n_samples` unit-norm rewards as an (n, dim) array.
    fn sample_given_delta(&mut self, n_samples: usize, query_type: QueryType, delta: f64) -> Result<(Array2<f64>, SampleMeta)>;
}

#[derive(Clone, Debug)]
pub struct SamplerConfig {
    /// Steps discarded before collecting.
    pub burn_in: usize,

    /// Steps between collected samples.
    pub thin: usize,

    /// Proposal standard deviation.
    pub step_size: f64,

    pub seed: u64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            burn_in: 500,
            thin: 5,
            step_size: 0.1,
            seed: 0x5eed,
        }
    }
}

pub struct MetropolisSampler {
    dim: usize,
    config: SamplerConfig,
    diffs: Vec<Array1<f64>>,
    prefs: Vec<f64>,
    rng: StdRng,
}

impl MetropolisSampler {
    pub fn new(dim: usize, config: SamplerConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            dim,
            config,
            diffs: Vec::new(),
            prefs: Vec::new(),
            rng,
        }
    }

    fn log_likelihood(&self, w: &Array1<f64>, query_type: QueryType, delta: f64) -> f64 {
        self.diffs
            .iter()
            .zip(&self.prefs)
            .map(|(d, &s)| {
                let v = w.dot(d);
                match query_type {
                    QueryType::Strict => -softplus(-s * v),
                    QueryType::Weak if s == 0.0 => {
                        (2.0 * delta).exp_m1().ln() - softplus(delta - v) - softplus(delta + v)
                    }
                    QueryType::Weak => -softplus(delta - s * v),
                }
            })
            .sum()
    }

    fn random_unit(&mut self, normal: &Normal<f64>) -> Array1<f64> {
        loop {
            let v = Array1::from_shape_fn(self.dim, |_| normal.sample(&mut self.rng));
            let norm = v.dot(&v).sqrt();
            if norm > 1e-12 {
                return v / norm;
            }
        }
    }
}

/// ln(1 + eˣ) without overflow.
fn softplus(x: f64) -> f64 {
    x.max(0.0) + (-x.abs()).exp().ln_1p()
}

impl PosteriorSampler for MetropolisSampler {
    fn dim(&self) -> usize {
        self.dim
    }

    fn reset(&mut self) {
        self.diffs.clear();
        self.prefs.clear();
    }

    fn feed(&mut self, phi_a: ArrayView1<f64>, phi_b: ArrayView1<f64>, preference: f64) -> Result<()> {
        if phi_a.len() != self.dim || phi_b.len() != self.dim {
            return Err(AlignError::shape(
                "sampler observation",
                format!("({},)", self.dim),
                format!("({},) / ({},)", phi_a.len(), phi_b.len()),
            ));
        }
        ensure!(
            preference == 1.0 || preference == -1.0 || preference == 0.0,
            "preference must be -1, 0 or 1, got {preference}"
        );
        self.diffs.push(&phi_a - &phi_b);
        self.prefs.push(preference);
        Ok(())
    }

    fn sample_given_delta(&mut self, n_samples: usize, query_type: QueryType, delta: f64) -> Result<(Array2<f64>, SampleMeta)> {
        match query_type {
            QueryType::Strict => ensure!(
                self.prefs.iter().all(|&p| p != 0.0),
                "\"about equal\" answers need weak queries"
            ),
            QueryType::Weak => ensure!(delta > 0.0, "weak queries need delta > 0, got {delta}"),
        }
        let proposal = Normal::new(0.0, self.config.step_size).map_err(|e| AlignError::Precondition(e.to_string()))?;
        let unit = Normal::new(0.0, 1.0).map_err(|e| AlignError::Precondition(e.to_string()))?;

        let mut w = self.random_unit(&unit);
        let mut ll = self.log_likelihood(&w, query_type, delta);
        let thin = self.config.thin.max(1);
        let total_steps = self.config.burn_in + n_samples * thin;

        let mut samples = Array2::zeros((n_samples, self.dim));
        let mut accepted = 0usize;
        let mut collected = 0usize;
        for step in 0..total_steps {
            let noise = Array1::from_shape_fn(self.dim, |_| proposal.sample(&mut self.rng));
            let candidate = &w + &noise;
            let norm = candidate.dot(&candidate).sqrt();
            if norm > 1e-12 {
                let candidate = candidate / norm;
                let cand_ll = self.log_likelihood(&candidate, query_type, delta);
                let u: f64 = self.rng.gen();
                if u.ln() < cand_ll - ll {
                    w = candidate;
                    ll = cand_ll;
                    accepted += 1;
                }
            }
            if step >= self.config.burn_in && (step - self.config.burn_in) % thin == thin - 1 && collected < n_samples {
                samples.row_mut(collected).assign(&w);
                collected += 1;
            }
        }

        let meta = SampleMeta {
            acceptance_rate: accepted as f64 / total_steps.max(1) as f64,
            n_observations: self.diffs.len(),
        };
        tracing::debug!(n_samples, acceptance = meta.acceptance_rate, "posterior sampled");
        Ok((samples, meta))
    }
}

/// Reset `sampler`, feed every labelled pair, and draw `n_samples` rewards.
pub fn sample_rewards<S: PosteriorSampler + ?Sized>(
    sampler: &mut S,
    a_phis: ArrayView2<f64>,
    b_phis: ArrayView2<f64>,
    preferences: ArrayView1<f64>,
    n_samples: usize,
    query_type: QueryType,
    delta: f64,
) -> Result<Array2<f64>> {
    if a_phis.dim() != b_phis.dim() || a_phis.nrows() != preferences.len() {
        return Err(AlignError::shape(
            "labelled pairs",
            format!("{:?} x2 with ({},) preferences", a_phis.dim(), a_phis.nrows()),
            format!("{:?} / {:?} / ({},)", a_phis.dim(), b_phis.dim(), preferences.len()),
        ));
    }
    sampler.reset();
    for ((a, b), &p) in a_phis.outer_iter().zip(b_phis.outer_iter()).zip(preferences.iter()) {
        sampler.feed(a, b, p)?;
    }
    let (rewards, _) = sampler.sample_given_delta(n_samples, query_type, delta)?;
    Ok(rewards)
}

/// Mean of `n_samples` posterior rewards given (n, 2, d) elicited features.
pub fn mean_reward<S: PosteriorSampler + ?Sized>(
    sampler: &mut S,
    features: ArrayView3<f64>,
    preferences: ArrayView1<f64>,
    n_samples: usize,
    query_type: QueryType,
    delta: f64,
) -> Result<Array1<f64>> {
    let d = features.shape()[2];
    let a = features.index_axis(Axis(1), 0);
    let b = features.index_axis(Axis(1), 1);
    let rewards = sample_rewards(sampler, a, b, preferences, n_samples, query_type, delta)?;
    let mean = rewards
        .mean_axis(Axis(0))
        .ok_or_else(|| AlignError::Precondition("cannot average zero samples".into()))?;
    if mean.len() != d {
        return Err(AlignError::shape("mean reward", format!("({d},)"), format!("({},)", mean.len())));
    }
    Ok(mean)
}
