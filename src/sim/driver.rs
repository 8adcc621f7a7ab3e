//! Three-lane highway world with a reward-driven main car and a planned
//! other car.
//!
//! Features of a rollout (all normalised by empirical scales):
//! 1. lane keeping        exp(−30 · min_lane (x − c)²)
//! 2. speed keeping       (v − 1)²
//! 3. heading             sin θ
//! 4. collision avoidance exp(−(7 Δx² + 3 Δy²))

use std::f64::consts::FRAC_PI_2;

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

use super::car::{CarState, Dynamics, LegacyDynamics};
use crate::config::{CONTROL_DIM, HORIZON, N_REWARD_FEATURES};
use crate::error::{AlignError, Result};

/// Lane centre x-coordinates.
pub const LANE_CENTERS: [f64; 3] = [-0.17, 0.0, 0.17];

/// Per-feature normalisers so each feature has roughly unit scale.
pub const FEATURE_SCALES: [f64; N_REWARD_FEATURES] = [0.15343634, 0.42202643, 0.06112367, 0.15258019];

/// Raw per-step features of the main car given the other car.
pub fn step_features(main: &CarState, other: &CarState) -> [f64; N_REWARD_FEATURES] {
    let lane_dist = LANE_CENTERS
        .iter()
        .map(|c| (main.x - c).powi(2))
        .fold(f64::INFINITY, f64::min);
    let dx = main.x - other.x;
    let dy = main.y - other.y;

    [
        (-30.0 * lane_dist).exp() / FEATURE_SCALES[0],
        (main.speed - 1.0).powi(2) / FEATURE_SCALES[1],
        main.heading.sin() / FEATURE_SCALES[2],
        (-(7.0 * dx * dx + 3.0 * dy * dy)).exp() / FEATURE_SCALES[3],
    ]
}

/// Per-step reward `w · features(main, other)`. The action is ignored.
pub fn step_reward(weights: ArrayView1<f64>, main: &CarState, other: &CarState, _action: Option<[f64; 2]>) -> f64 {
    step_features(main, other)
        .iter()
        .zip(weights.iter())
        .map(|(f, w)| f * w)
        .sum()
}

/// World layout, initial states and the other car's fixed plan.
#[derive(Clone, Debug)]
pub struct ThreeLaneWorld {
    pub dynamics: LegacyDynamics,
    pub main_init: CarState,
    pub other_init: CarState,
    /// (H, 2) controls the other car follows regardless of the main car.
    pub other_plan: Array2<f64>,
}

impl Default for ThreeLaneWorld {
    fn default() -> Self {
        Self {
            dynamics: LegacyDynamics::default(),
            main_init: CarState::new(0.0, -0.3, FRAC_PI_2, 0.4),
            other_init: CarState::new(0.17, 0.0, FRAC_PI_2, 0.41),
            other_plan: Array2::from_shape_fn((HORIZON, CONTROL_DIM), |(_, j)| if j == 1 { 0.41 } else { 0.0 }),
        }
    }
}

impl ThreeLaneWorld {
    pub fn horizon(&self) -> usize {
        self.other_plan.nrows()
    }

    /// Roll both cars forward and return the summed per-step features.
    ///
    /// Features are taken after each step. `controls` must be (H, 2); callers
    /// validate shape before entering hot loops.
    pub fn feature_sums(
        &self,
        main_init: &CarState,
        other_init: &CarState,
        controls: ArrayView2<f64>,
    ) -> [f64; N_REWARD_FEATURES] {
        let mut main = *main_init;
        let mut other = *other_init;
        let mut sums = [0.0; N_REWARD_FEATURES];
        for (u, v) in controls.outer_iter().zip(self.other_plan.outer_iter()) {
            main = self.dynamics.step(&main, [u[0], u[1]]);
            other = self.dynamics.step(&other, [v[0], v[1]]);
            for (s, f) in sums.iter_mut().zip(step_features(&main, &other)) {
                *s += f;
            }
        }
        sums
    }

    /// Cumulative reward of the main car under `weights`.
    pub fn cumulative_reward(
        &self,
        weights: ArrayView1<f64>,
        main_init: &CarState,
        other_init: &CarState,
        controls: ArrayView2<f64>,
    ) -> f64 {
        self.feature_sums(main_init, other_init, controls)
            .iter()
            .zip(weights.iter())
            .map(|(f, w)| f * w)
            .sum()
    }

    pub fn check_controls(&self, controls: ArrayView2<f64>) -> Result<()> {
        let expected = (self.horizon(), CONTROL_DIM);
        if controls.dim() != expected {
            return Err(AlignError::shape("control sequence", format!("{expected:?}"), format!("{:?}", controls.dim())));
        }
        Ok(())
    }
}

/// Simulator that replays a control sequence and reports its features.
pub trait FeatureSimulator {
    fn num_features(&self) -> usize;

    /// Load a control sequence for the main car.
    fn feed(&mut self, controls: ArrayView2<f64>) -> Result<()>;

    /// Features of the most recently fed rollout.
    fn get_features(&self) -> Result<Array1<f64>>;
}

/// Default driver simulation over a `ThreeLaneWorld`.
#[derive(Clone, Debug, Default)]
pub struct DriverSim {
    pub world: ThreeLaneWorld,
    fed: Option<Array2<f64>>,
}

impl DriverSim {
    pub fn new(world: ThreeLaneWorld) -> Self {
        Self { world, fed: None }
    }
}

impl FeatureSimulator for DriverSim {
    fn num_features(&self) -> usize {
        N_REWARD_FEATURES
    }

    fn feed(&mut self, controls: ArrayView2<f64>) -> Result<()> {
        self.world.check_controls(controls)?;
        self.fed = Some(controls.to_owned());
        Ok(())
    }

    fn get_features(&self) -> Result<Array1<f64>> {
        let controls = self
            .fed
            .as_ref()
            .ok_or_else(|| AlignError::MissingInput("get_features called before feed".into()))?;
        let sums = self
            .world
            .feature_sums(&self.world.main_init, &self.world.other_init, controls.view());
        let h = self.world.horizon() as f64;
        Ok(Array1::from_iter(sums.iter().map(|s| s / h)))
    }
}
