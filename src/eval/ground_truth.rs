//! Ground-truth reward distribution balanced on the alignment boundary.
//!
//! Rewards are drawn from an isotropic Gaussian around the true reward and
//! projected onto the unit sphere. A reward is "aligned" when it agrees with
//! every normal the true reward satisfies by a positive margin above `epsilon`. The
//! covariance is rescaled until roughly half of the draws are aligned, so the
//! evaluation set straddles the decision boundary.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use super::satisfies_all;
use crate::config::REWARD_NORM_TOLERANCE;
use crate::error::{ensure, AlignError, Result};
use crate::normals::assert_unit_reward;

/// Redraws allowed for one sample before the mean is declared degenerate.
const MAX_REDRAWS: usize = 1000;

#[derive(Clone, Debug)]
pub struct CalibrationConfig {
    /// Reward samples drawn per calibration step.
    pub n_rewards: usize,

    /// Starting isotropic variance.
    pub initial_cov: f64,

    /// Multiplicative variance step.
    pub scale: f64,

    /// Acceptable band for the aligned fraction.
    pub lower: f64,
    pub upper: f64,

    /// Rescaling steps before giving up.
    pub max_iterations: usize,

    pub seed: u64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            n_rewards: 1000,
            initial_cov: 1.0,
            scale: 1.1,
            lower: 0.45,
            upper: 0.55,
            max_iterations: 1000,
            seed: 0,
        }
    }
}

/// Calibrated reward samples with their true alignment labels.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GroundTruth {
    pub rewards: Array2<f64>,
    pub aligned: Vec<bool>,

    /// Variance the accepted batch was drawn with.
    pub covariance: f64,

    /// Rescaling steps taken.
    pub iterations: usize,
}

impl GroundTruth {
    pub fn aligned_fraction(&self) -> f64 {
        if self.aligned.is_empty() {
            return 0.0;
        }
        self.aligned.iter().filter(|&&a| a).count() as f64 / self.aligned.len() as f64
    }
}

/// `n` draws from N(mean, cov·I), each scaled to unit L2 norm.
pub fn gaussian_rewards<R: Rng + ?Sized>(mean: ArrayView1<f64>, cov: f64, n: usize, rng: &mut R) -> Result<Array2<f64>> {
    ensure!(cov.is_finite() && cov >= 0.0, "covariance scale must be finite and non-negative, got {cov}");
    let normal = Normal::new(0.0, cov.sqrt()).map_err(|e| AlignError::Precondition(e.to_string()))?;
    let d = mean.len();

    let mut rewards = Array2::zeros((n, d));
    for mut row in rewards.axis_iter_mut(Axis(0)) {
        // a zero draw has no direction; redraw
        let direction = (0..MAX_REDRAWS).find_map(|_| {
            let draw: Array1<f64> = &mean + &Array1::from_shape_fn(d, |_| normal.sample(rng));
            let norm = draw.dot(&draw).sqrt();
            (norm > 1e-12).then(|| draw / norm)
        });
        match direction {
            Some(direction) => row.assign(&direction),
            None => {
                return Err(AlignError::Precondition(format!(
                    "no reward direction after {MAX_REDRAWS} draws around mean {mean} with covariance {cov}"
                )))
            }
        }
    }
    Ok(rewards)
}

/// Draw ground-truth rewards around `true_reward` whose aligned fraction lies
/// in `[config.lower, config.upper]`.
pub fn find_reward_boundary(
    true_reward: ArrayView1<f64>,
    normals: ArrayView2<f64>,
    epsilon: f64,
    config: &CalibrationConfig,
) -> Result<GroundTruth> {
    if normals.ncols() != true_reward.len() {
        return Err(AlignError::shape(
            "normals",
            format!("(n, {})", true_reward.len()),
            format!("{:?}", normals.dim()),
        ));
    }
    assert_unit_reward(true_reward, REWARD_NORM_TOLERANCE)?;
    ensure!(config.n_rewards > 0, "calibration needs at least one reward sample");
    ensure!(
        config.scale > 1.0 && config.lower <= config.upper,
        "calibration needs scale > 1 and lower <= upper"
    );

    let margins = normals.dot(&true_reward);
    let floor = epsilon.max(0.0);
    let keep: Vec<usize> = (0..normals.nrows()).filter(|&i| margins[i] > floor).collect();
    let restricted = normals.select(Axis(0), &keep);
    tracing::debug!(kept = keep.len(), total = normals.nrows(), "restricted normals for calibration");

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut cov = config.initial_cov;
    let mut last_fraction = f64::NAN;

    for iteration in 0..=config.max_iterations {
        let rewards = gaussian_rewards(true_reward, cov, config.n_rewards, &mut rng)?;
        let aligned = satisfies_all(rewards.view(), restricted.view())?;
        let fraction = aligned.iter().filter(|&&a| a).count() as f64 / aligned.len() as f64;
        tracing::debug!(iteration, cov, fraction, "calibration step");

        if fraction > config.upper {
            cov *= config.scale;
        } else if fraction < config.lower {
            cov /= config.scale;
        } else {
            tracing::info!(iterations = iteration, cov, fraction, "ground truth calibrated");
            return Ok(GroundTruth {
                rewards,
                aligned,
                covariance: cov,
                iterations: iteration,
            });
        }
        last_fraction = fraction;
    }

    Err(AlignError::CalibrationDiverged {
        iterations: config.max_iterations,
        last_fraction,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn normals() -> Array2<f64> {
        array![
            [1.0, 0.2, 0.0, 0.0],
            [0.8, -0.3, 0.1, 0.0],
            [0.9, 0.0, -0.4, 0.2],
            [0.7, 0.1, 0.3, -0.5],
            [-0.5, 1.0, 0.0, 0.0],
        ]
    }

    #[test]
    fn test_gaussian_rewards_unit_norm() {
        let mut rng = StdRng::seed_from_u64(3);
        let rewards = gaussian_rewards(array![1.0, 0.0, 0.0].view(), 2.0, 100, &mut rng).unwrap();
        assert_eq!(rewards.dim(), (100, 3));
        for row in rewards.outer_iter() {
            assert!((row.dot(&row).sqrt() - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_zero_cov_returns_mean_direction() {
        let mut rng = StdRng::seed_from_u64(3);
        let rewards = gaussian_rewards(array![3.0, 4.0].view(), 0.0, 5, &mut rng).unwrap();
        for row in rewards.outer_iter() {
            assert!((row[0] - 0.6).abs() < 1e-12);
            assert!((row[1] - 0.8).abs() < 1e-12);
        }
    }

    #[test]
    fn test_calibration_lands_in_band() {
        let truth = array![1.0, 0.0, 0.0, 0.0];
        let cfg = CalibrationConfig {
            seed: 11,
            ..Default::default()
        };
        let gt = find_reward_boundary(truth.view(), normals().view(), 0.0, &cfg).unwrap();
        let frac = gt.aligned_fraction();
        assert!((0.45..=0.55).contains(&frac), "aligned fraction {frac}");
        assert!(gt.iterations <= cfg.max_iterations);
        assert_eq!(gt.rewards.nrows(), cfg.n_rewards);
        assert_eq!(gt.aligned.len(), cfg.n_rewards);
    }

    #[test]
    fn test_calibration_is_reproducible() {
        let truth = array![1.0, 0.0, 0.0, 0.0];
        let cfg = CalibrationConfig {
            n_rewards: 200,
            seed: 5,
            ..Default::default()
        };
        let a = find_reward_boundary(truth.view(), normals().view(), 0.0, &cfg).unwrap();
        let b = find_reward_boundary(truth.view(), normals().view(), 0.0, &cfg).unwrap();
        assert_eq!(a.rewards, b.rewards);
        assert_eq!(a.aligned, b.aligned);
    }

    #[test]
    fn test_no_satisfied_normals_diverges() {
        // every reward is trivially aligned, so the fraction never drops
        let truth = array![1.0, 0.0];
        let normals = array![[-1.0, 0.0]];
        let cfg = CalibrationConfig {
            n_rewards: 50,
            max_iterations: 20,
            ..Default::default()
        };
        match find_reward_boundary(truth.view(), normals.view(), 0.0, &cfg) {
            Err(AlignError::CalibrationDiverged { iterations, last_fraction }) => {
                assert_eq!(iterations, 20);
                assert_eq!(last_fraction, 1.0);
            }
            other => panic!("expected divergence, got {other:?}"),
        }
    }

    #[test]
    fn test_degenerate_mean_fails() {
        let mut rng = StdRng::seed_from_u64(3);
        let err = gaussian_rewards(array![0.0, 0.0].view(), 0.0, 5, &mut rng).unwrap_err();
        assert!(matches!(err, AlignError::Precondition(_)));
        let nan = gaussian_rewards(array![f64::NAN, 0.0].view(), 1.0, 5, &mut rng).unwrap_err();
        assert!(matches!(nan, AlignError::Precondition(_)));
    }

    #[test]
    fn test_malformed_true_reward_rejected() {
        let normals = array![[1.0, 0.0, 0.0, 0.0]];
        let cfg = CalibrationConfig {
            n_rewards: 10,
            ..Default::default()
        };
        for truth in [array![f64::NAN, 0.0, 0.0, 0.0], array![0.0, 0.0, 0.0, 0.0], array![2.0, 0.0, 0.0, 0.0]] {
            let err = find_reward_boundary(truth.view(), normals.view(), 0.0, &cfg).unwrap_err();
            assert!(matches!(err, AlignError::Precondition(_)), "{truth}: {err:?}");
        }
    }

    #[test]
    fn test_negative_epsilon_ignores_violated_normals() {
        // the true reward violates the second normal
        let truth = array![1.0, 0.0];
        let normals = array![[1.0, 0.0], [-0.05, 1.0]];
        let cfg = CalibrationConfig {
            seed: 4,
            ..Default::default()
        };
        let negative = find_reward_boundary(truth.view(), normals.view(), -0.1, &cfg).unwrap();
        let zero = find_reward_boundary(truth.view(), normals.view(), 0.0, &cfg).unwrap();
        assert_eq!(negative.rewards, zero.rewards);
        assert_eq!(negative.covariance, zero.covariance);
        assert!(negative.covariance > 10.0, "covariance {}", negative.covariance);
    }

    #[test]
    fn test_dimension_mismatch() {
        let truth = array![1.0, 0.0, 0.0];
        let cfg = CalibrationConfig::default();
        assert!(find_reward_boundary(truth.view(), normals().view(), 0.0, &cfg).is_err());
    }
}
