//! # prefhull
//!
//! Preference halfspace tests for a simulated driving agent.
//!
//! Pairwise preferences between trajectories become halfspace constraints
//! `w · n > 0` on an unknown linear reward `w`. The constraints are reduced to
//! a small, denoised, non-redundant test and used to decide whether a
//! candidate reward behaves like the true one.
//!
//! ## Pipeline
//!
//! 1. **Simulation**: car dynamics, a three-lane world, trajectory features
//! 2. **Trajectory optimisation**: multi-start gradient search with a plan cache
//! 3. **Normals**: oriented feature differences from labelled pairs
//! 4. **Filtering**: dedup, posterior-noise, epsilon-gap, LP redundancy
//! 5. **Evaluation**: calibrated ground truth and a confusion matrix
//! 6. **Sweep**: parallel grid over (epsilon, delta, n_human_samples)

pub mod error;
pub mod eval;
pub mod filter;
pub mod io;
pub mod normals;
pub mod oracle;
pub mod posterior;
pub mod query;
pub mod sim;
pub mod sweep;
pub mod traj;

pub use error::{AlignError, Result};

/// Crate-wide constants and the shared configuration object.
pub mod config {
    /// Planning horizon (timesteps per control sequence).
    pub const HORIZON: usize = 50;

    /// Car state dimension: x, y, heading, speed.
    pub const STATE_DIM: usize = 4;

    /// Control dimension: steering, acceleration.
    pub const CONTROL_DIM: usize = 2;

    /// Number of reward features produced by the driver simulation.
    pub const N_REWARD_FEATURES: usize = 4;

    /// Number of hand-seeded initial control sequences.
    pub const N_BUILTIN_SEEDS: usize = 3;

    /// Default cosine-distance threshold for duplicate normals.
    pub const DEDUP_PRECISION: f64 = 1e-4;

    /// Default posterior agreement a normal needs to survive noise filtering.
    pub const NOISE_THRESHOLD: f64 = 0.7;

    /// Default value gap.
    pub const EPSILON: f64 = 0.0;

    /// Default posterior failure probability for the epsilon-gap stage.
    pub const DELTA: f64 = 0.05;

    /// Allowed deviation of a reward's L2 norm from 1.
    pub const REWARD_NORM_TOLERANCE: f64 = 1e-6;

    /// Normal/reward dimension for a given mode.
    /// Equivalence mode adds one constant-offset dimension.
    pub fn reward_dim(n_reward_features: usize, use_equiv: bool) -> usize {
        n_reward_features + usize::from(use_equiv)
    }

    /// Shared configuration passed into each component at construction.
    #[derive(Clone, Debug, PartialEq)]
    pub struct AlignConfig {
        /// Planning horizon (default 50).
        pub horizon: usize,

        /// Number of built-in seed control sequences to use, 1..=3 (default 3).
        pub n_seed_controls: usize,

        /// Cosine-distance threshold below which a normal is a duplicate (default 1e-4).
        pub dedup_precision: f64,

        /// Required fraction of agreeing posterior samples (default 0.7).
        pub noise_threshold: f64,

        /// Minimum value gap (default 0.0).
        pub epsilon: f64,

        /// Posterior failure probability (default 0.05).
        pub delta: f64,
    }

    impl Default for AlignConfig {
        fn default() -> Self {
            Self {
                horizon: HORIZON,
                n_seed_controls: N_BUILTIN_SEEDS,
                dedup_precision: DEDUP_PRECISION,
                noise_threshold: NOISE_THRESHOLD,
                epsilon: EPSILON,
                delta: DELTA,
            }
        }
    }
}
