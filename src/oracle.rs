//! Preference feedback sources.
//!
//! A `PreferenceOracle` answers "which of these two trajectories is better?"
//! from their feature vectors. `SimulatedOracle` answers with a known reward.

use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::error::{AlignError, Result};
use crate::posterior::QueryType;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Preference {
    A,
    B,
    /// "About equal"; only meaningful for weak queries.
    Equivalent,
}

impl Preference {
    /// Numeric label: +1 for A, −1 for B, 0 for equivalent.
    pub fn value(self) -> f64 {
        match self {
            Preference::A => 1.0,
            Preference::B => -1.0,
            Preference::Equivalent => 0.0,
        }
    }

    pub fn from_value(v: f64) -> Result<Self> {
        match v {
            v if v == 1.0 => Ok(Preference::A),
            v if v == -1.0 => Ok(Preference::B),
            v if v == 0.0 => Ok(Preference::Equivalent),
            other => Err(AlignError::Precondition(format!("preference label {other} is not -1, 0 or 1"))),
        }
    }
}

pub trait PreferenceOracle {
    fn ask(&mut self, phi_a: ArrayView1<f64>, phi_b: ArrayView1<f64>) -> Result<Preference>;
}

/// Answers queries from a known reward.
#[derive(Clone, Debug)]
pub struct SimulatedOracle {
    pub true_reward: Array1<f64>,
    pub query_type: QueryType,
    asked: usize,
}

impl SimulatedOracle {
    pub fn new(true_reward: Array1<f64>, query_type: QueryType) -> Self {
        Self {
            true_reward,
            query_type,
            asked: 0,
        }
    }

    pub fn asked(&self) -> usize {
        self.asked
    }
}

impl PreferenceOracle for SimulatedOracle {
    fn ask(&mut self, phi_a: ArrayView1<f64>, phi_b: ArrayView1<f64>) -> Result<Preference> {
        if phi_a.len() != self.true_reward.len() || phi_b.len() != self.true_reward.len() {
            return Err(AlignError::shape(
                "query features",
                format!("({},)", self.true_reward.len()),
                format!("({},) / ({},)", phi_a.len(), phi_b.len()),
            ));
        }
        match self.query_type {
            QueryType::Strict => {
                self.asked += 1;
                let gap = self.true_reward.dot(&(&phi_a - &phi_b));
                Ok(if gap > 0.0 { Preference::A } else { Preference::B })
            }
            QueryType::Weak => Err(AlignError::Unimplemented("simulated feedback for weak queries".into())),
        }
    }
}
