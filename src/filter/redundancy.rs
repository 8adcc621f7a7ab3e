//! LP-based removal of redundant homogeneous halfspaces `n_i · w ≥ 0`.
//!
//! Constraint i is redundant when the remaining kept constraints already
//! imply it: `max −n̂_i · w` over the box `|w_k| ≤ 1` intersected with the
//! others is at most `tolerance`, where `n̂_i` is `n_i` scaled to unit length. Constraints are tested in order, and a
//! constraint found redundant is dropped before testing the next one, so of
//! several equivalent constraints only the last survives.

use ndarray::{Array1, Array2, ArrayView2, Axis};

use super::lp::maximize;
use crate::error::Result;

/// Default optimum below which a constraint counts as implied.
pub const REDUNDANCY_TOLERANCE: f64 = 1e-7;

/// Remove redundant halfspaces, returning the kept rows and their indices.
pub fn remove_redundant_constraints(normals: ArrayView2<f64>, tolerance: f64) -> Result<(Array2<f64>, Vec<usize>)> {
    let k = normals.nrows();
    let mut kept = vec![true; k];

    for i in 0..k {
        let others: Vec<usize> = (0..k).filter(|&j| j != i && kept[j]).collect();
        let violation = max_violation(normals, i, &others)?;
        if violation <= tolerance {
            kept[i] = false;
            tracing::debug!(constraint = i, violation, "redundant halfspace");
        }
    }

    let indices: Vec<usize> = (0..k).filter(|&i| kept[i]).collect();
    Ok((normals.select(Axis(0), &indices), indices))
}

/// How far `n̂_target · w` can go below zero while every `n_j · w ≥ 0`
/// (j in `others`) and `w` stays in the unit box. A zero normal constrains
/// nothing and reports no violation.
fn max_violation(normals: ArrayView2<f64>, target: usize, others: &[usize]) -> Result<f64> {
    let d = normals.ncols();
    let target_row = normals.row(target);
    let norm = target_row.dot(&target_row).sqrt();
    if norm == 0.0 {
        return Ok(0.0);
    }

    // w = u − v with u, v ≥ 0
    let n_vars = 2 * d;
    let n_rows = others.len() + 2 * d;

    let mut a = Array2::<f64>::zeros((n_rows, n_vars));
    let b = Array1::<f64>::from_shape_fn(n_rows, |r| if r < others.len() { 0.0 } else { 1.0 });

    // −n_j · (u − v) ≤ 0
    for (r, &j) in others.iter().enumerate() {
        for c in 0..d {
            a[[r, c]] = -normals[[j, c]];
            a[[r, d + c]] = normals[[j, c]];
        }
    }
    // u_c − v_c ≤ 1 and v_c − u_c ≤ 1
    for c in 0..d {
        let r = others.len() + 2 * c;
        a[[r, c]] = 1.0;
        a[[r, d + c]] = -1.0;
        a[[r + 1, c]] = -1.0;
        a[[r + 1, d + c]] = 1.0;
    }

    let mut obj = Array1::<f64>::zeros(n_vars);
    for c in 0..d {
        obj[c] = -target_row[c] / norm;
        obj[d + c] = target_row[c] / norm;
    }

    Ok(maximize(obj.view(), a.view(), b.view())?.objective)
}
