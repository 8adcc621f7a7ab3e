//! Pass rate of perturbed rewards against a test.

use ndarray::{ArrayView1, ArrayView2};
use rand::Rng;

use super::ground_truth::gaussian_rewards;
use super::satisfies_all;
use crate::config::REWARD_NORM_TOLERANCE;
use crate::error::{ensure, Result};
use crate::normals::assert_unit_reward;

/// Fraction of `n_rewards` unit-normalized draws from N(reward, reward_noise·I)
/// that satisfy every normal.
pub fn run_test<R: Rng + ?Sized>(
    reward: ArrayView1<f64>,
    normals: ArrayView2<f64>,
    reward_noise: f64,
    n_rewards: usize,
    rng: &mut R,
) -> Result<f64> {
    assert_unit_reward(reward, REWARD_NORM_TOLERANCE)?;
    ensure!(n_rewards > 0, "pass rate needs at least one reward");
    let rewards = gaussian_rewards(reward, reward_noise, n_rewards, rng)?;
    let passed = satisfies_all(rewards.view(), normals)?;
    let rate = passed.iter().filter(|&&p| p).count() as f64 / n_rewards as f64;
    tracing::debug!(reward_noise, rate, "pass rate");
    Ok(rate)
}
