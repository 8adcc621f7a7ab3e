//! Confusion matrix of predicted versus ground-truth alignment.

use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};

use super::ground_truth::GroundTruth;
use super::satisfies_all;
use crate::error::{AlignError, Result};

/// 2×2 tally with label order `[false, true]` on both axes.
///
/// `counts[truth][predicted]`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub counts: [[usize; 2]; 2],
}

impl ConfusionMatrix {
    pub fn from_labels(truth: &[bool], predicted: &[bool]) -> Result<Self> {
        if truth.len() != predicted.len() {
            return Err(AlignError::shape(
                "predictions",
                format!("({},)", truth.len()),
                format!("({},)", predicted.len()),
            ));
        }
        let mut counts = [[0usize; 2]; 2];
        for (&t, &p) in truth.iter().zip(predicted) {
            counts[usize::from(t)][usize::from(p)] += 1;
        }
        Ok(Self { counts })
    }

    pub fn true_negatives(&self) -> usize {
        self.counts[0][0]
    }

    pub fn false_positives(&self) -> usize {
        self.counts[0][1]
    }

    pub fn false_negatives(&self) -> usize {
        self.counts[1][0]
    }

    pub fn true_positives(&self) -> usize {
        self.counts[1][1]
    }

    pub fn total(&self) -> usize {
        self.counts.iter().flatten().sum()
    }

    pub fn accuracy(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        (self.true_negatives() + self.true_positives()) as f64 / total as f64
    }
}

/// Predict alignment: a reward passes the test when it agrees with every
/// test normal. An empty test accepts every reward.
pub fn predict_aligned(rewards: ArrayView2<f64>, test: ArrayView2<f64>) -> Result<Vec<bool>> {
    satisfies_all(rewards, test)
}

/// Score a filtered test against calibrated ground truth.
pub fn eval_test(test: ArrayView2<f64>, ground_truth: &GroundTruth) -> Result<ConfusionMatrix> {
    let predicted = predict_aligned(ground_truth.rewards.view(), test)?;
    ConfusionMatrix::from_labels(&ground_truth.aligned, &predicted)
}
