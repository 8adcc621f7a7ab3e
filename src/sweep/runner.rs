//! Sweep execution on a rayon worker pool.

use std::collections::HashMap;

use ndarray::{s, Array1, Array2, Array3};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::key::{canonical, ExperimentKey};
use super::store::ResultStore;
use crate::config::REWARD_NORM_TOLERANCE;
use crate::error::{AlignError, Result};
use crate::eval::confusion::{eval_test, ConfusionMatrix};
use crate::eval::ground_truth::{find_reward_boundary, CalibrationConfig, GroundTruth};
use crate::filter::pipeline::{filter_halfplanes, FilterConfig};
use crate::normals::assert_unit_reward;
use crate::posterior::{MetropolisSampler, SamplerConfig};

#[derive(Clone, Debug)]
pub struct SweepConfig {
    pub epsilons: Vec<f64>,
    pub deltas: Vec<f64>,
    pub n_human_samples: Vec<usize>,

    /// Ground-truth rewards per epsilon.
    pub n_rewards: usize,

    /// Posterior samples drawn by each filter run.
    pub n_model_samples: usize,

    /// Filter with supplied rewards only.
    pub deterministic: bool,

    /// Cores left free for the rest of the machine.
    pub reserve_cores: usize,

    pub seed: u64,

    pub filter: FilterConfig,
    pub calibration: CalibrationConfig,
    pub sampler: SamplerConfig,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            epsilons: vec![0.0],
            deltas: vec![crate::config::DELTA],
            n_human_samples: vec![100],
            n_rewards: 100,
            n_model_samples: 1000,
            deterministic: false,
            reserve_cores: 2,
            seed: 0,
            filter: FilterConfig::default(),
            calibration: CalibrationConfig::default(),
            sampler: SamplerConfig::default(),
        }
    }
}

impl SweepConfig {
    pub fn grid(&self) -> Vec<ExperimentKey> {
        ExperimentKey::grid(&self.epsilons, &self.deltas, &self.n_human_samples)
    }

    /// Worker count: available cores minus the reserve, at least one.
    pub fn num_workers(&self) -> usize {
        let cpus = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        cpus.saturating_sub(self.reserve_cores).max(1)
    }
}

/// Read-only arrays every task filters from.
#[derive(Clone, Debug)]
pub struct SweepInputs {
    pub true_reward: Array1<f64>,
    /// (n, 2, d)
    pub input_features: Array3<f64>,
    /// (n, d')
    pub normals: Array2<f64>,
    /// (n,)
    pub preferences: Array1<f64>,
    /// Posterior samples for deterministic runs.
    pub rewards: Option<Array2<f64>>,
}

impl SweepInputs {
    pub fn n_queries(&self) -> usize {
        self.normals.nrows()
    }

    fn check(&self) -> Result<()> {
        let n = self.normals.nrows();
        if self.input_features.shape()[0] != n || self.preferences.len() != n {
            return Err(AlignError::shape(
                "sweep inputs",
                format!("{n} queries in features, normals and preferences"),
                format!(
                    "features {:?}, normals {:?}, preferences ({},)",
                    self.input_features.dim(),
                    self.normals.dim(),
                    self.preferences.len()
                ),
            ));
        }
        if self.true_reward.len() != self.normals.ncols() {
            return Err(AlignError::shape(
                "true reward",
                format!("({},)", self.normals.ncols()),
                format!("({},)", self.true_reward.len()),
            ));
        }
        assert_unit_reward(self.true_reward.view(), REWARD_NORM_TOLERANCE)
    }
}

/// Self-contained result of one grid point.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExperimentOutcome {
    pub key: ExperimentKey,
    pub indices: Vec<usize>,
    pub confusion: ConfusionMatrix,
}

#[derive(Clone, Debug)]
pub struct TaskFailure {
    pub key: ExperimentKey,
    pub message: String,
}

#[derive(Clone, Debug, Default)]
pub struct SweepReport {
    pub outcomes: Vec<ExperimentOutcome>,
    pub failures: Vec<TaskFailure>,
}

/// Grid points not yet in `store`. Everything is pending when the store was
/// opened with overwrite.
pub fn pending_keys<V>(grid: &[ExperimentKey], store: &ResultStore<V>) -> Vec<ExperimentKey> {
    if store.overwrite() {
        return grid.to_vec();
    }
    grid.iter().filter(|k| !store.contains(k)).copied().collect()
}

fn run_task(
    key: ExperimentKey,
    position: usize,
    inputs: &SweepInputs,
    ground_truth: &GroundTruth,
    config: &SweepConfig,
) -> Result<ExperimentOutcome> {
    let n = key.n_human_samples;
    if n > inputs.n_queries() {
        return Err(AlignError::Precondition(format!(
            "{key} asks for {n} queries but only {} exist",
            inputs.n_queries()
        )));
    }

    let features = inputs.input_features.slice(s![..n, .., ..]);
    let normals = inputs.normals.slice(s![..n, ..]);
    let preferences = inputs.preferences.slice(s![..n]);

    let filter = FilterConfig {
        epsilon: key.epsilon,
        delta: key.delta,
        n_samples: Some(config.n_model_samples),
        deterministic: config.deterministic,
        ..config.filter.clone()
    };
    let mut sampler = MetropolisSampler::new(
        features.shape()[2],
        SamplerConfig {
            seed: config.sampler.seed.wrapping_add(position as u64),
            ..config.sampler.clone()
        },
    );

    let out = filter_halfplanes(
        features,
        normals,
        preferences,
        inputs.rewards.as_ref().map(|r| r.view()),
        Some(&mut sampler),
        &filter,
    )?;
    let confusion = eval_test(out.normals.view(), ground_truth)?;

    tracing::info!(
        %key,
        kept = out.indices.len(),
        accuracy = confusion.accuracy(),
        "experiment finished"
    );
    Ok(ExperimentOutcome {
        key,
        indices: out.indices,
        confusion,
    })
}

type TruthMap = HashMap<u64, std::result::Result<GroundTruth, String>>;

/// One calibration per distinct epsilon, keyed the way `ExperimentKey` compares.
fn calibrate_epsilons(inputs: &SweepInputs, keys: &[ExperimentKey], config: &SweepConfig) -> TruthMap {
    let calibration = CalibrationConfig {
        n_rewards: config.n_rewards,
        seed: config.seed,
        ..config.calibration.clone()
    };
    let mut truths = TruthMap::new();
    for key in keys {
        truths.entry(canonical(key.epsilon)).or_insert_with(|| {
            find_reward_boundary(inputs.true_reward.view(), inputs.normals.view(), key.epsilon, &calibration)
                .map_err(|e| e.to_string())
        });
    }
    truths
}

/// Run every key on a worker pool. Ground truth is calibrated once per
/// distinct epsilon before dispatch; a calibration failure fails every key
/// sharing that epsilon.
pub fn run_sweep(inputs: &SweepInputs, keys: &[ExperimentKey], config: &SweepConfig) -> Result<SweepReport> {
    inputs.check()?;

    let truths = calibrate_epsilons(inputs, keys, config);

    let workers = config.num_workers();
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .map_err(|e| AlignError::Pool(format!("failed to build sweep thread pool: {e}")))?;
    tracing::info!(tasks = keys.len(), workers, "dispatching sweep");

    let results: Vec<(ExperimentKey, std::result::Result<ExperimentOutcome, String>)> = pool.install(|| {
        keys.par_iter()
            .enumerate()
            .map(|(position, &key)| {
                let result = match truths.get(&canonical(key.epsilon)) {
                    Some(Ok(gt)) => run_task(key, position, inputs, gt, config).map_err(|e| e.to_string()),
                    Some(Err(msg)) => Err(format!("ground truth: {msg}")),
                    None => Err("ground truth missing".to_string()),
                };
                (key, result)
            })
            .collect()
    });

    let mut report = SweepReport::default();
    for (key, result) in results {
        match result {
            Ok(outcome) => report.outcomes.push(outcome),
            Err(message) => {
                tracing::warn!(%key, %message, "experiment failed");
                report.failures.push(TaskFailure { key, message });
            }
        }
    }
    Ok(report)
}

/// Merge successful outcomes into the stores and save them, then surface
/// any failures.
pub fn persist_report(
    report: &SweepReport,
    indices: &mut ResultStore<Vec<usize>>,
    confusion: &mut ResultStore<ConfusionMatrix>,
) -> Result<()> {
    for outcome in &report.outcomes {
        indices.insert(outcome.key, outcome.indices.clone());
        confusion.insert(outcome.key, outcome.confusion);
    }
    indices.save()?;
    confusion.save()?;
    tracing::info!(saved = report.outcomes.len(), failed = report.failures.len(), "sweep results persisted");

    match report.failures.first() {
        None => Ok(()),
        Some(first) => Err(AlignError::SweepFailed {
            failed: report.failures.len(),
            first: format!("{}: {}", first.key, first.message),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Axis};

    fn inputs() -> SweepInputs {
        let normals = array![
            [1.0, 0.2, 0.0, 0.0],
            [0.8, -0.3, 0.1, 0.0],
            [0.9, 0.0, -0.4, 0.2],
            [0.7, 0.1, 0.3, -0.5],
            [1.0, 0.2, 0.0, 0.0],
        ];
        let mut features = Array3::zeros((5, 2, 4));
        features.index_axis_mut(Axis(1), 0).assign(&normals);
        let rewards = Array2::from_shape_fn((50, 4), |(i, j)| match j {
            0 => 1.0,
            1 => 0.05 * ((i % 5) as f64 - 2.0),
            _ => 0.0,
        });
        SweepInputs {
            true_reward: array![1.0, 0.0, 0.0, 0.0],
            input_features: features,
            normals,
            preferences: Array1::ones(5),
            rewards: Some(rewards),
        }
    }

    fn config() -> SweepConfig {
        SweepConfig {
            epsilons: vec![0.0, 0.5],
            deltas: vec![0.05],
            n_human_samples: vec![2, 5],
            n_rewards: 200,
            deterministic: true,
            reserve_cores: 0,
            ..Default::default()
        }
    }

    #[test]
    fn test_num_workers_at_least_one() {
        let cfg = SweepConfig {
            reserve_cores: 10_000,
            ..Default::default()
        };
        assert_eq!(cfg.num_workers(), 1);
    }

    #[test]
    fn test_sweep_covers_grid() {
        let cfg = config();
        let keys = cfg.grid();
        let report = run_sweep(&inputs(), &keys, &cfg).unwrap();
        assert!(report.failures.is_empty(), "{:?}", report.failures);
        assert_eq!(report.outcomes.len(), 4);
        for outcome in &report.outcomes {
            assert!(outcome.indices.iter().all(|&i| i < outcome.key.n_human_samples));
            assert_eq!(outcome.confusion.total(), 200);
        }
    }

    #[test]
    fn test_oversized_key_fails_alone() {
        let cfg = config();
        let keys = vec![ExperimentKey::new(0.0, 0.05, 5), ExperimentKey::new(0.0, 0.05, 6)];
        let report = run_sweep(&inputs(), &keys, &cfg).unwrap();
        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].key, ExperimentKey::new(0.0, 0.05, 6));
    }

    #[test]
    fn test_malformed_true_reward_fails_before_dispatch() {
        let cfg = config();
        for truth in [array![f64::NAN, 0.0, 0.0, 0.0], array![0.0, 0.0, 0.0, 0.0], array![0.5, 0.5, 0.0, 0.0]] {
            let bad = SweepInputs {
                true_reward: truth,
                ..inputs()
            };
            let err = run_sweep(&bad, &cfg.grid(), &cfg).unwrap_err();
            assert!(matches!(err, AlignError::Precondition(_)), "{err:?}");
        }
    }

    #[test]
    fn test_signed_zero_epsilons_share_calibration() {
        let cfg = config();
        let keys = vec![ExperimentKey::new(0.0, 0.05, 5), ExperimentKey::new(-0.0, 0.05, 2)];
        let truths = calibrate_epsilons(&inputs(), &keys, &cfg);
        assert_eq!(truths.len(), 1);

        let report = run_sweep(&inputs(), &keys, &cfg).unwrap();
        assert!(report.failures.is_empty(), "{:?}", report.failures);
        assert_eq!(report.outcomes.len(), 2);
    }

    #[test]
    fn test_pending_keys_skip_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("indices.bin");
        let grid = ExperimentKey::grid(&[0.0], &[0.05, 0.1], &[5]);

        let mut store: ResultStore<Vec<usize>> = ResultStore::load(&path, false).unwrap();
        store.insert(grid[0], vec![0]);
        assert_eq!(pending_keys(&grid, &store), vec![grid[1]]);
        store.save().unwrap();

        let fresh: ResultStore<Vec<usize>> = ResultStore::load(&path, true).unwrap();
        assert_eq!(pending_keys(&grid, &fresh), grid);
    }

    #[test]
    fn test_failures_reported_after_persisting_successes() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config();
        let keys = vec![ExperimentKey::new(0.0, 0.05, 5), ExperimentKey::new(0.0, 0.05, 99)];
        let report = run_sweep(&inputs(), &keys, &cfg).unwrap();

        let mut indices = ResultStore::load(dir.path().join("indices.bin"), false).unwrap();
        let mut confusion = ResultStore::load(dir.path().join("confusion.bin"), false).unwrap();
        let err = persist_report(&report, &mut indices, &mut confusion).unwrap_err();
        assert!(matches!(err, AlignError::SweepFailed { failed: 1, .. }));

        let reloaded: ResultStore<Vec<usize>> = ResultStore::load(dir.path().join("indices.bin"), false).unwrap();
        assert!(reloaded.contains(&keys[0]));
        assert!(!reloaded.contains(&keys[1]));
    }
}
