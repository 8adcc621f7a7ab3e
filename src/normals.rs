//! Halfspace normals from labelled trajectory pairs.
//!
//! A normal is `phi_A − phi_B` multiplied by the preference sign, so that
//! `w · n > 0` iff reward `w` agrees with the label.

use ndarray::{concatenate, s, Array1, Array2, Array3, ArrayView1, ArrayView2, ArrayView3, ArrayView4, Axis};

use crate::error::{ensure, AlignError, Result};
use crate::sim::driver::FeatureSimulator;

/// Check that `normals` is (n, n_reward_features + use_equiv).
pub fn assert_normals(normals: ArrayView2<f64>, use_equiv: bool, n_reward_features: usize) -> Result<()> {
    let dim = crate::config::reward_dim(n_reward_features, use_equiv);
    if normals.ncols() != dim {
        return Err(AlignError::shape("normals", format!("(n, {dim})"), format!("{:?}", normals.dim())));
    }
    Ok(())
}

/// Same check for arrays whose rank is only known at runtime.
pub fn assert_normals_dyn(shape: &[usize], use_equiv: bool, n_reward_features: usize) -> Result<()> {
    let dim = crate::config::reward_dim(n_reward_features, use_equiv);
    if shape.len() != 2 || shape[1] != dim {
        return Err(AlignError::shape("normals", format!("(n, {dim})"), format!("{shape:?}")));
    }
    Ok(())
}

/// Check that `reward` is finite, the right length and unit norm (within `eps`).
pub fn assert_reward(reward: ArrayView1<f64>, use_equiv: bool, n_reward_features: usize, eps: f64) -> Result<()> {
    let dim = crate::config::reward_dim(n_reward_features, use_equiv);
    if reward.len() != dim {
        return Err(AlignError::shape("reward", format!("({dim},)"), format!("({},)", reward.len())));
    }
    assert_unit_reward(reward, eps)
}

/// Check that `reward` is finite and unit norm (within `eps`), whatever its length.
pub fn assert_unit_reward(reward: ArrayView1<f64>, eps: f64) -> Result<()> {
    ensure!(reward.iter().all(|v| v.is_finite()), "reward has non-finite entries");
    let norm = reward.dot(&reward).sqrt();
    ensure!((norm - 1.0).abs() < eps, "reward norm {norm} is not 1");
    Ok(())
}

/// Scale each row to unit L2 norm.
pub fn normalize(vectors: ArrayView2<f64>) -> Array2<f64> {
    let mut out = vectors.to_owned();
    for mut row in out.outer_iter_mut() {
        let norm = row.dot(&row).sqrt();
        row /= norm;
    }
    out
}

/// Normalise a preference array to the encoding `orient_normals` multiplies by.
///
/// Outside equivalence mode an all-{0, 1} array is mapped to {−1, +1};
/// afterwards every entry must be ±1. In equivalence mode entries must be in
/// {−1, 0, +1} and are left as-is.
pub fn signed_preferences(preferences: ArrayView1<f64>, use_equiv: bool) -> Result<Array1<f64>> {
    if use_equiv {
        ensure!(
            preferences.iter().all(|&p| p == 1.0 || p == 0.0 || p == -1.0),
            "equivalence-mode preferences must be -1, 0 or 1"
        );
        return Ok(preferences.to_owned());
    }
    let prefs = if preferences.iter().all(|&p| p == 0.0 || p == 1.0) {
        preferences.mapv(|p| p * 2.0 - 1.0)
    } else {
        preferences.to_owned()
    };
    ensure!(
        prefs.iter().all(|&p| p == 1.0 || p == -1.0),
        "preferences must be 0/1 or -1/+1 encoded"
    );
    Ok(prefs)
}

/// Orient normals so the preferred trajectory comes first.
pub fn orient_normals(
    normals: ArrayView2<f64>,
    preferences: ArrayView1<f64>,
    use_equiv: bool,
    n_reward_features: usize,
) -> Result<Array2<f64>> {
    assert_normals(normals, use_equiv, n_reward_features)?;
    if preferences.len() != normals.nrows() {
        return Err(AlignError::shape(
            "preferences",
            format!("({},)", normals.nrows()),
            format!("({},)", preferences.len()),
        ));
    }
    let prefs = signed_preferences(preferences, use_equiv)?;

    let mut oriented = normals.to_owned();
    for (mut row, &p) in oriented.outer_iter_mut().zip(prefs.iter()) {
        row *= p;
    }

    assert_normals(oriented.view(), use_equiv, n_reward_features)?;
    Ok(oriented)
}

/// Raw (unoriented) normals `phi_A − phi_B` from stacked (n, 2, d) features.
pub fn normals_from_features(features: ArrayView3<f64>) -> Result<Array2<f64>> {
    if features.shape()[1] != 2 {
        return Err(AlignError::shape("input features", "(n, 2, d)", format!("{:?}", features.dim())));
    }
    Ok(&features.slice(s![.., 0, ..]) - &features.slice(s![.., 1, ..]))
}

/// Replay (n, 2, H, 2) control pairs through `sim` and return the stacked
/// (n, 2, d) features and the raw normals.
pub fn make_normals<S: FeatureSimulator + ?Sized>(
    inputs: ArrayView4<f64>,
    sim: &mut S,
    use_equiv: bool,
) -> Result<(Array3<f64>, Array2<f64>)> {
    let (n, pair, _, control_dim) = inputs.dim();
    if pair != 2 || control_dim != crate::config::CONTROL_DIM {
        return Err(AlignError::shape("inputs", "(n, 2, H, 2)", format!("{:?}", inputs.dim())));
    }
    let d = sim.num_features();

    let mut features = Array3::zeros((n, 2, d));
    for (i, query) in inputs.outer_iter().enumerate() {
        for (j, controls) in query.outer_iter().enumerate() {
            sim.feed(controls)?;
            let phi = sim.get_features()?;
            features.slice_mut(s![i, j, ..]).assign(&phi);
        }
    }

    let normals = normals_from_features(features.view())?;
    assert_normals(normals.view(), false, d)?;
    if use_equiv {
        tracing::debug!("equivalence mode: normals are lifted by add_equiv_constraints");
    }
    Ok((features, normals))
}

/// Lift d-dimensional normals to the equivalence-mode space (d + 1).
///
/// The extra coordinate multiplies a constant margin in the lifted reward.
/// A strict label `s` yields `[s·d, −1]` (preferred side wins by at least the
/// margin). An equivalent label (0) yields `[d, 1]` and `[−d, 1]`, which keep
/// `w · d` within `±margin`. Returns the lifted rows and the query index each
/// row came from.
pub fn add_equiv_constraints(normals: ArrayView2<f64>, preferences: ArrayView1<f64>) -> Result<(Array2<f64>, Vec<usize>)> {
    if preferences.len() != normals.nrows() {
        return Err(AlignError::shape(
            "preferences",
            format!("({},)", normals.nrows()),
            format!("({},)", preferences.len()),
        ));
    }
    let prefs = signed_preferences(preferences, true)?;
    let d = normals.ncols();

    let mut rows: Vec<Array1<f64>> = Vec::new();
    let mut sources = Vec::new();
    for (i, (normal, &p)) in normals.outer_iter().zip(prefs.iter()).enumerate() {
        let lift = |sign: f64, offset: f64| {
            let mut row = Array1::zeros(d + 1);
            row.slice_mut(s![..d]).assign(&(&normal * sign));
            row[d] = offset;
            row
        };
        if p == 0.0 {
            rows.push(lift(1.0, 1.0));
            rows.push(lift(-1.0, 1.0));
            sources.extend([i, i]);
        } else {
            rows.push(lift(p, -1.0));
            sources.push(i);
        }
    }

    let views: Vec<_> = rows.iter().map(|r| r.view().insert_axis(Axis(0))).collect();
    let lifted = if views.is_empty() {
        Array2::zeros((0, d + 1))
    } else {
        concatenate(Axis(0), &views).map_err(|e| AlignError::Precondition(e.to_string()))?
    };
    Ok((lifted, sources))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CONTROL_DIM, HORIZON, N_REWARD_FEATURES};
    use crate::sim::driver::DriverSim;
    use ndarray::{array, Array4};

    #[test]
    fn test_assert_normals_width() {
        let n = Array2::<f64>::zeros((3, 4));
        assert!(assert_normals(n.view(), false, 4).is_ok());
        assert!(assert_normals(n.view(), true, 4).is_err());
        let m = Array2::<f64>::zeros((3, 5));
        assert!(assert_normals(m.view(), true, 4).is_ok());
    }

    #[test]
    fn test_assert_normals_dyn_rank() {
        assert!(assert_normals_dyn(&[3, 4], false, 4).is_ok());
        assert!(assert_normals_dyn(&[3, 4, 1], false, 4).is_err());
        assert!(assert_normals_dyn(&[4], false, 4).is_err());
    }

    #[test]
    fn test_assert_reward() {
        let r = array![0.6, 0.8, 0.0, 0.0];
        assert!(assert_reward(r.view(), false, 4, 1e-6).is_ok());
        let unnormalised = array![1.0, 1.0, 0.0, 0.0];
        assert!(assert_reward(unnormalised.view(), false, 4, 1e-6).is_err());
        let nan = array![f64::NAN, 1.0, 0.0, 0.0];
        assert!(assert_reward(nan.view(), false, 4, 1e-6).is_err());
        let short = array![0.6, 0.8];
        assert!(assert_reward(short.view(), false, 4, 1e-6).is_err());
    }

    #[test]
    fn test_assert_unit_reward_any_length() {
        assert!(assert_unit_reward(array![0.0, 1.0, 0.0].view(), 1e-6).is_ok());
        assert!(assert_unit_reward(array![0.0, 0.0].view(), 1e-6).is_err());
        assert!(assert_unit_reward(array![f64::NAN].view(), 1e-6).is_err());
    }

    #[test]
    fn test_normalize_rows() {
        let v = array![[3.0, 4.0], [0.0, 2.0]];
        let n = normalize(v.view());
        assert!((n[[0, 0]] - 0.6).abs() < 1e-12);
        assert!((n[[1, 1]] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_orient_zero_one_preferences() {
        let normals = array![[1.0, 0.0, 0.0, 0.0], [0.0, 1.0, 0.0, 0.0]];
        let prefs = array![1.0, 0.0];
        let oriented = orient_normals(normals.view(), prefs.view(), false, 4).unwrap();
        assert_eq!(oriented, array![[1.0, 0.0, 0.0, 0.0], [0.0, -1.0, 0.0, 0.0]]);
    }

    #[test]
    fn test_orient_twice_matches_squared_preferences() {
        let normals = array![[1.0, -2.0, 0.5, 0.0], [0.3, 0.1, -0.7, 2.0], [0.0, 0.0, 1.0, 1.0]];
        let prefs = array![1.0, -1.0, -1.0];
        let once = orient_normals(normals.view(), prefs.view(), false, 4).unwrap();
        let twice = orient_normals(once.view(), prefs.view(), false, 4).unwrap();
        let squared = &prefs * &prefs;
        let direct = orient_normals(normals.view(), squared.view(), false, 4).unwrap();
        assert_eq!(twice, direct);
    }

    #[test]
    fn test_orient_rejects_mismatch_and_bad_values() {
        let normals = Array2::<f64>::ones((2, 4));
        assert!(orient_normals(normals.view(), array![1.0].view(), false, 4).is_err());
        assert!(orient_normals(normals.view(), array![1.0, 0.5].view(), false, 4).is_err());
        // 0 is only legal in equivalence mode
        assert!(orient_normals(normals.view(), array![1.0, -1.0].view(), false, 4).is_ok());
        let wide = Array2::<f64>::ones((2, 5));
        assert!(orient_normals(wide.view(), array![0.0, -1.0].view(), true, 4).is_ok());
        assert!(orient_normals(normals.view(), array![0.0, -1.0].view(), false, 4).is_err());
    }

    #[test]
    fn test_equiv_preference_not_rescaled() {
        let wide = Array2::<f64>::ones((2, 5));
        let oriented = orient_normals(wide.view(), array![0.0, 1.0].view(), true, 4).unwrap();
        assert_eq!(oriented.row(0).sum(), 0.0);
        assert_eq!(oriented.row(1).sum(), 5.0);
    }

    #[test]
    fn test_normals_from_features() {
        let f = array![[[1.0, 2.0], [0.5, 3.0]]];
        let n = normals_from_features(f.view()).unwrap();
        assert_eq!(n, array![[0.5, -1.0]]);
    }

    #[test]
    fn test_make_normals_through_simulator() {
        let mut inputs = Array4::zeros((2, 2, HORIZON, CONTROL_DIM));
        // second query: A accelerates, B coasts
        inputs.slice_mut(s![1, 0, .., 1]).fill(1.0);
        let mut sim = DriverSim::default();
        let (features, normals) = make_normals(inputs.view(), &mut sim, false).unwrap();
        assert_eq!(features.dim(), (2, 2, N_REWARD_FEATURES));
        assert_eq!(normals.dim(), (2, N_REWARD_FEATURES));
        // identical controls give a zero normal
        assert!(normals.row(0).iter().all(|v| v.abs() < 1e-12));
        // accelerating toward v = 1 lowers the speed penalty
        assert!(normals[[1, 1]] < 0.0);
    }

    #[test]
    fn test_add_equiv_constraints_brackets() {
        let normals = array![[1.0, 2.0], [3.0, -1.0]];
        let prefs = array![0.0, -1.0];
        let (lifted, sources) = add_equiv_constraints(normals.view(), prefs.view()).unwrap();
        assert_eq!(sources, vec![0, 0, 1]);
        assert_eq!(lifted, array![[1.0, 2.0, 1.0], [-1.0, -2.0, 1.0], [-3.0, 1.0, -1.0]]);

        // w = (w_d, margin): an equivalent pair is satisfied iff |w_d · d| < margin
        let w_inside = array![0.1, 0.0, 0.5];
        let w_outside = array![1.0, 0.0, 0.5];
        assert!(lifted.row(0).dot(&w_inside) > 0.0 && lifted.row(1).dot(&w_inside) > 0.0);
        assert!(lifted.row(0).dot(&w_outside) > 0.0 && lifted.row(1).dot(&w_outside) < 0.0);
    }
}
