//! Order-preserving duplicate removal by cosine distance.

use ndarray::{Array2, ArrayView1, ArrayView2, Axis};

/// `1 − u·v / (|u| |v|)`; NaN when either vector is zero.
pub fn cosine_distance(u: ArrayView1<f64>, v: ArrayView1<f64>) -> f64 {
    let denom = u.dot(&u).sqrt() * v.dot(&v).sqrt();
    1.0 - u.dot(&v) / denom
}

/// Drop every normal whose cosine distance to an already accepted normal is
/// below `precision`. First occurrence wins. O(k²) in accepted normals.
///
/// Zero normals have an undefined distance and are never treated as duplicates.
pub fn remove_duplicates(normals: ArrayView2<f64>, precision: f64) -> (Array2<f64>, Vec<usize>) {
    let mut indices: Vec<usize> = Vec::new();
    for (i, normal) in normals.outer_iter().enumerate() {
        let duplicate = indices
            .iter()
            .any(|&j| cosine_distance(normal, normals.row(j)) < precision);
        if !duplicate {
            indices.push(i);
        }
    }
    (normals.select(Axis(0), &indices), indices)
}
