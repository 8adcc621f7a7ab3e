//! The full halfspace filter: dedup → noise → epsilon gap → redundancy.

use ndarray::{Array2, ArrayView1, ArrayView2, ArrayView3, Axis};

use super::dedup::remove_duplicates;
use super::epsilon::epsilon_mask;
use super::noise::noise_mask;
use super::redundancy::{remove_redundant_constraints, REDUNDANCY_TOLERANCE};
use crate::config::AlignConfig;
use crate::error::{AlignError, Result};
use crate::normals::signed_preferences;
use crate::posterior::{sample_rewards, PosteriorSampler, QueryType};

#[derive(Clone, Debug)]
pub struct FilterConfig {
    pub query_type: QueryType,

    /// Delta handed to the posterior sampler for weak queries.
    pub equiv_probability: f64,

    pub dedup_precision: f64,
    pub noise_threshold: f64,
    pub epsilon: f64,
    pub delta: f64,

    /// Posterior samples to draw when rewards are not supplied.
    pub n_samples: Option<usize>,

    /// Never sample; use supplied rewards only.
    pub deterministic: bool,

    pub redundancy_tolerance: f64,

    pub skip_remove_duplicates: bool,
    pub skip_noise_filtering: bool,
    pub skip_epsilon_filtering: bool,
    pub skip_redundancy_filtering: bool,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self::from_align(&AlignConfig::default())
    }
}

impl FilterConfig {
    pub fn from_align(config: &AlignConfig) -> Self {
        Self {
            query_type: QueryType::Strict,
            equiv_probability: 0.0,
            dedup_precision: config.dedup_precision,
            noise_threshold: config.noise_threshold,
            epsilon: config.epsilon,
            delta: config.delta,
            n_samples: None,
            deterministic: false,
            redundancy_tolerance: REDUNDANCY_TOLERANCE,
            skip_remove_duplicates: false,
            skip_noise_filtering: false,
            skip_epsilon_filtering: false,
            skip_redundancy_filtering: false,
        }
    }
}

/// Retained normals and their indices into the original normal array.
#[derive(Clone, Debug, PartialEq)]
pub struct FilterOutput {
    pub normals: Array2<f64>,
    pub indices: Vec<usize>,
}

/// Guard against index/array desynchronisation between stages.
fn check_sync(original: ArrayView2<f64>, indices: &[usize], filtered: &Array2<f64>, stage: &str) -> Result<()> {
    if original.select(Axis(0), indices) != *filtered {
        return Err(AlignError::Precondition(format!(
            "{stage}: filtered normals differ from original normals at retained indices"
        )));
    }
    Ok(())
}

/// Filter test questions: remove duplicates, drop answers the posterior
/// treats as noise, require an epsilon value gap with confidence `1 − δ`,
/// and remove redundant questions by linear programming.
///
/// `input_features` is (n, 2, d), `normals` (n, d'), `preferences` (n,).
/// `rewards` are posterior samples; without them `sampler` is used.
pub fn filter_halfplanes(
    input_features: ArrayView3<f64>,
    normals: ArrayView2<f64>,
    preferences: ArrayView1<f64>,
    rewards: Option<ArrayView2<f64>>,
    mut sampler: Option<&mut dyn PosteriorSampler>,
    config: &FilterConfig,
) -> Result<FilterOutput> {
    let n = normals.nrows();
    if input_features.shape()[0] != n || input_features.shape()[1] != 2 || preferences.len() != n {
        return Err(AlignError::shape(
            "filter inputs",
            format!("features ({n}, 2, d), preferences ({n},)"),
            format!("features {:?}, preferences ({},)", input_features.shape(), preferences.len()),
        ));
    }
    let a_phis = input_features.index_axis(Axis(1), 0);
    let b_phis = input_features.index_axis(Axis(1), 1);

    let draw = |sampler: &mut Option<&mut dyn PosteriorSampler>, n_samples: usize| -> Result<Array2<f64>> {
        let sampler = sampler
            .as_deref_mut()
            .ok_or_else(|| AlignError::MissingInput("a posterior sampler is required to draw rewards".into()))?;
        let prefs = signed_preferences(preferences, config.query_type == QueryType::Weak)?;
        sample_rewards(sampler, a_phis, b_phis, prefs.view(), n_samples, config.query_type, config.equiv_probability)
    };

    let mut filtered = normals.to_owned();
    let mut indices: Vec<usize> = (0..n).collect();

    if !config.skip_remove_duplicates {
        (filtered, indices) = remove_duplicates(normals, config.dedup_precision);
        tracing::info!("after removing duplicates there are {} questions", indices.len());
    }
    check_sync(normals, &indices, &filtered, "deduplication")?;

    let mut rewards = rewards.map(|r| r.to_owned());

    if !config.skip_noise_filtering {
        let samples = match rewards.take() {
            Some(r) => r,
            None => {
                if config.deterministic {
                    return Err(AlignError::MissingInput("rewards must be provided in deterministic mode".into()));
                }
                let n_samples = config
                    .n_samples
                    .ok_or_else(|| AlignError::MissingInput("n_samples must be provided when rewards are not".into()))?;
                draw(&mut sampler, n_samples)?
            }
        };

        let keep = noise_mask(samples.view(), filtered.view(), config.noise_threshold)?;
        indices = indices.into_iter().zip(keep).filter_map(|(i, k)| k.then_some(i)).collect();
        filtered = normals.select(Axis(0), &indices);
        check_sync(normals, &indices, &filtered, "noise filtering")?;
        rewards = Some(samples);

        tracing::info!("after noise filtering there are {} questions", indices.len());
    }

    if !config.skip_epsilon_filtering && filtered.nrows() > 0 {
        if !config.deterministic {
            if let Some(n_samples) = config.n_samples {
                rewards = Some(draw(&mut sampler, n_samples)?);
            }
        }
        let samples = rewards
            .as_ref()
            .ok_or_else(|| AlignError::MissingInput("epsilon filtering needs rewards or n_samples".into()))?;

        let keep = epsilon_mask(samples.view(), filtered.view(), config.epsilon, config.delta)?;
        indices = indices.into_iter().zip(keep).filter_map(|(i, k)| k.then_some(i)).collect();
        filtered = normals.select(Axis(0), &indices);
        check_sync(normals, &indices, &filtered, "epsilon filtering")?;

        tracing::info!(
            epsilon = config.epsilon,
            delta = config.delta,
            "after epsilon delta filtering there are {} questions",
            indices.len()
        );
    }

    if !config.skip_redundancy_filtering && filtered.nrows() > 0 {
        let (reduced, kept) = remove_redundant_constraints(filtered.view(), config.redundancy_tolerance)?;
        indices = kept.into_iter().map(|k| indices[k]).collect();
        filtered = reduced;
        check_sync(normals, &indices, &filtered, "redundancy removal")?;

        tracing::info!("after removing redundancies there are {} questions", indices.len());
    }

    Ok(FilterOutput {
        normals: filtered,
        indices,
    })
}
