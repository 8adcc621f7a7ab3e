//! Dense tableau simplex for small linear programs.
//!
//! Solves `max c·x  s.t.  A x ≤ b, x ≥ 0` with `b ≥ 0`, so the slack basis is
//! feasible at the origin and a single phase suffices. Bland's rule picks the
//! entering and leaving variables, which rules out cycling on the highly
//! degenerate programs produced by homogeneous halfspaces.

use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2};

use crate::error::{AlignError, Result};

const PIVOT_TOL: f64 = 1e-12;

/// Iteration cap; Bland's rule terminates, this guards numerical trouble.
pub const MAX_PIVOTS: usize = 50_000;

#[derive(Clone, Debug)]
pub struct LpSolution {
    pub x: Array1<f64>,
    pub objective: f64,
    pub pivots: usize,
}

pub fn maximize(c: ArrayView1<f64>, a: ArrayView2<f64>, b: ArrayView1<f64>) -> Result<LpSolution> {
    let (m, n) = a.dim();
    if c.len() != n || b.len() != m {
        return Err(AlignError::shape(
            "linear program",
            format!("c ({n},), b ({m},)"),
            format!("c ({},), b ({},)", c.len(), b.len()),
        ));
    }
    if b.iter().any(|&v| v < 0.0 || !v.is_finite()) {
        return Err(AlignError::Lp("right-hand side must be finite and non-negative".into()));
    }

    // Rows 0..m: [A | I | b]. Row m: [−c | 0 | 0].
    let width = n + m + 1;
    let rhs = n + m;
    let mut t = Array2::<f64>::zeros((m + 1, width));
    t.slice_mut(s![..m, ..n]).assign(&a);
    for i in 0..m {
        t[[i, n + i]] = 1.0;
        t[[i, rhs]] = b[i];
    }
    t.slice_mut(s![m, ..n]).assign(&c.mapv(|v| -v));
    let mut basis: Vec<usize> = (n..n + m).collect();

    let mut pivots = 0;
    loop {
        let Some(enter) = (0..rhs).find(|&j| t[[m, j]] < -PIVOT_TOL) else {
            break;
        };

        let mut leave: Option<(usize, f64)> = None;
        for i in 0..m {
            let coef = t[[i, enter]];
            if coef > PIVOT_TOL {
                let ratio = t[[i, rhs]] / coef;
                leave = match leave {
                    None => Some((i, ratio)),
                    Some((_, best)) if ratio < best - PIVOT_TOL => Some((i, ratio)),
                    Some((l, best)) if (ratio - best).abs() <= PIVOT_TOL && basis[i] < basis[l] => Some((i, ratio)),
                    keep => keep,
                };
            }
        }
        let Some((row, _)) = leave else {
            return Err(AlignError::Lp("objective is unbounded".into()));
        };

        pivot(&mut t, row, enter);
        basis[row] = enter;
        pivots += 1;
        if pivots > MAX_PIVOTS {
            return Err(AlignError::Lp(format!("no optimum after {MAX_PIVOTS} pivots")));
        }
    }

    let mut x = Array1::zeros(n);
    for (i, &var) in basis.iter().enumerate() {
        if var < n {
            x[var] = t[[i, rhs]];
        }
    }
    Ok(LpSolution {
        x,
        objective: t[[m, rhs]],
        pivots,
    })
}

fn pivot(t: &mut Array2<f64>, row: usize, col: usize) {
    let p = t[[row, col]];
    t.row_mut(row).mapv_inplace(|v| v / p);
    let pivot_row = t.row(row).to_owned();
    for i in 0..t.nrows() {
        if i != row {
            let factor = t[[i, col]];
            if factor != 0.0 {
                t.row_mut(i).scaled_add(-factor, &pivot_row);
            }
        }
    }
}
