use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// One filtering/evaluation configuration.
///
/// Floats compare and hash by bit pattern so keys are usable in maps.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ExperimentKey {
    pub epsilon: f64,
    pub delta: f64,
    pub n_human_samples: usize,
}

impl ExperimentKey {
    pub fn new(epsilon: f64, delta: f64, n_human_samples: usize) -> Self {
        Self {
            epsilon,
            delta,
            n_human_samples,
        }
    }

    fn bits(&self) -> (u64, u64, usize) {
        (canonical(self.epsilon), canonical(self.delta), self.n_human_samples)
    }

    /// Cartesian product in (epsilon, delta, n) order.
    pub fn grid(epsilons: &[f64], deltas: &[f64], n_human_samples: &[usize]) -> Vec<ExperimentKey> {
        let mut keys = Vec::with_capacity(epsilons.len() * deltas.len() * n_human_samples.len());
        for &epsilon in epsilons {
            for &delta in deltas {
                for &n in n_human_samples {
                    keys.push(ExperimentKey::new(epsilon, delta, n));
                }
            }
        }
        keys
    }
}

/// Bit pattern with `-0.0` folded into `0.0` and every NaN into one value.
pub(crate) fn canonical(v: f64) -> u64 {
    if v == 0.0 {
        0
    } else if v.is_nan() {
        f64::NAN.to_bits()
    } else {
        v.to_bits()
    }
}

impl PartialEq for ExperimentKey {
    fn eq(&self, other: &Self) -> bool {
        self.bits() == other.bits()
    }
}

impl Eq for ExperimentKey {}

impl Hash for ExperimentKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bits().hash(state);
    }
}

impl fmt::Display for ExperimentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(eps={}, delta={}, n={})", self.epsilon, self.delta, self.n_human_samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_grid_order_and_size() {
        let keys = ExperimentKey::grid(&[0.0, 0.5], &[0.05, 0.1], &[10, 20, 30]);
        assert_eq!(keys.len(), 12);
        assert_eq!(keys[0], ExperimentKey::new(0.0, 0.05, 10));
        assert_eq!(keys[1], ExperimentKey::new(0.0, 0.05, 20));
        assert_eq!(keys[11], ExperimentKey::new(0.5, 0.1, 30));
    }

    #[test]
    fn test_keys_hash_by_value() {
        let mut set = HashSet::new();
        set.insert(ExperimentKey::new(0.0, 0.05, 10));
        assert!(set.contains(&ExperimentKey::new(-0.0, 0.05, 10)));
        assert!(!set.contains(&ExperimentKey::new(0.0, 0.05, 11)));
        assert!(!set.contains(&ExperimentKey::new(1e-12, 0.05, 10)));
    }
}
