//! Numeric gradients of a scalar objective over a control matrix.
//!
//! Each entry is probed along its basis tangent with a central difference:
//!   ∂f/∂x_ij ≈ (f(x + ε e_ij) − f(x − ε e_ij)) / 2ε

use ndarray::{Array2, ArrayView2};

/// Central-difference gradient of `f` at `x`.
pub fn central_difference<F>(mut f: F, x: &Array2<f64>, epsilon: f64) -> Array2<f64>
where
    F: FnMut(ArrayView2<f64>) -> f64,
{
    let mut probe = x.clone();
    let mut grad = Array2::zeros(x.dim());
    for (idx, g) in grad.indexed_iter_mut() {
        let orig = probe[idx];
        probe[idx] = orig + epsilon;
        let up = f(probe.view());
        probe[idx] = orig - epsilon;
        let down = f(probe.view());
        probe[idx] = orig;
        *g = (up - down) / (2.0 * epsilon);
    }
    grad
}
