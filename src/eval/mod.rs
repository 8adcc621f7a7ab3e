//! Ground-truth calibration and test evaluation.
//!
//! A test (a filtered set of normals) is scored against reward samples whose
//! true alignment is known, giving a confusion matrix of predicted versus
//! actual alignment.

pub mod confusion;
pub mod ground_truth;
pub mod pass_rate;

use ndarray::{ArrayView2, Axis};

use crate::error::{AlignError, Result};

/// For every reward row, whether it satisfies every normal strictly.
///
/// An empty constraint set accepts everything.
pub fn satisfies_all(rewards: ArrayView2<f64>, normals: ArrayView2<f64>) -> Result<Vec<bool>> {
    if rewards.ncols() != normals.ncols() {
        return Err(AlignError::shape(
            "rewards",
            format!("(m, {})", normals.ncols()),
            format!("{:?}", rewards.dim()),
        ));
    }
    if normals.nrows() == 0 {
        return Ok(vec![true; rewards.nrows()]);
    }
    let opinions = rewards.dot(&normals.t());
    Ok(opinions
        .axis_iter(Axis(0))
        .map(|row| row.iter().all(|&v| v > 0.0))
        .collect())
}
