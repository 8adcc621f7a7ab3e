//! Halfspace filtering: reduce raw preference normals to a small test.
//!
//! Four ordered, independently skippable stages:
//! 1. duplicate removal (cosine distance)
//! 2. posterior-noise filtering
//! 3. epsilon-gap filtering
//! 4. LP redundancy removal
//!
//! Every stage tracks indices into the original normal set.

pub mod dedup;
pub mod epsilon;
pub mod lp;
pub mod noise;
pub mod pipeline;
pub mod redundancy;

use ndarray::{Array1, ArrayView2, Axis};

use crate::error::{AlignError, Result};

/// Per-normal fraction of reward samples with `w · n > margin`.
pub fn agreement(rewards: ArrayView2<f64>, normals: ArrayView2<f64>, margin: f64) -> Result<Array1<f64>> {
    if rewards.ncols() != normals.ncols() {
        return Err(AlignError::shape(
            "reward samples",
            format!("(m, {})", normals.ncols()),
            format!("{:?}", rewards.dim()),
        ));
    }
    if rewards.nrows() == 0 {
        return Err(AlignError::MissingInput("no reward samples to score normals against".into()));
    }
    // (m, k): opinion of every sample on every normal
    let opinions = rewards.dot(&normals.t());
    Ok(opinions
        .mapv(|v| if v > margin { 1.0 } else { 0.0 })
        .mean_axis(Axis(0))
        .unwrap_or_else(|| Array1::zeros(normals.nrows())))
}
