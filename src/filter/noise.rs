//! Posterior-noise filtering.

use ndarray::ArrayView2;

use super::agreement;
use crate::error::Result;

/// Keep-mask: a normal survives if more than `threshold` of the posterior
/// samples agree with it (`w · n > 0`).
pub fn noise_mask(rewards: ArrayView2<f64>, normals: ArrayView2<f64>, threshold: f64) -> Result<Vec<bool>> {
    Ok(agreement(rewards, normals, 0.0)?
        .iter()
        .map(|&frac| frac > threshold)
        .collect())
}
