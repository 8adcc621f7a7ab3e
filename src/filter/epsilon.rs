//! Epsilon-gap filtering.
//!
//! A normal survives if, with posterior probability greater than `1 − δ`,
//! the preferred trajectory leads by more than `ε` (`w · n > ε`).

use ndarray::ArrayView2;

use super::agreement;
use crate::error::Result;

pub fn epsilon_mask(rewards: ArrayView2<f64>, normals: ArrayView2<f64>, epsilon: f64, delta: f64) -> Result<Vec<bool>> {
    Ok(agreement(rewards, normals, epsilon)?
        .iter()
        .map(|&frac| frac > 1.0 - delta)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, Array2};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};

    #[test]
    fn test_gap_required() {
        let rewards = Array2::from_shape_vec((2, 2), vec![1.0, 0.0, 0.8, 0.6]).unwrap();
        let normals = Array2::from_shape_vec((2, 2), vec![0.5, 0.0, 0.2, 0.0]).unwrap();
        // opinions: [0.5, 0.4] and [0.2, 0.16]
        assert_eq!(epsilon_mask(rewards.view(), normals.view(), 0.3, 0.05).unwrap(), vec![true, false]);
        assert_eq!(epsilon_mask(rewards.view(), normals.view(), 0.1, 0.05).unwrap(), vec![true, true]);
    }

    #[test]
    fn test_larger_epsilon_never_keeps_more() {
        let mut rng = StdRng::seed_from_u64(7);
        let normal = Normal::new(0.0, 1.0).unwrap();
        let rewards = Array2::from_shape_fn((200, 4), |_| normal.sample(&mut rng));
        let normals = Array2::from_shape_fn((30, 4), |_| normal.sample(&mut rng));
        let eps: Array1<f64> = Array1::linspace(-1.0, 2.0, 16);

        let mut last = usize::MAX;
        for &e in eps.iter() {
            let kept = epsilon_mask(rewards.view(), normals.view(), e, 0.4)
                .unwrap()
                .into_iter()
                .filter(|&k| k)
                .count();
            assert!(kept <= last);
            last = kept;
        }
    }
}
