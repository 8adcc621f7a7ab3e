//! Multi-start trajectory optimiser.
//!
//! For each seed control sequence, run a fixed number of gradient steps on
//! the loss `-Σ_t r(s_t)` (main car against the other car's fixed plan),
//! recompute the loss, and keep the lowest. Ties go to the first seed.

use ndarray::{stack, Array2, Array3, ArrayView1, ArrayView2, Axis};

use super::cache::{CacheStats, EvictionPolicy, PlanCache, PlanKey};
use super::gradient::central_difference;
use crate::config::{AlignConfig, CONTROL_DIM, N_BUILTIN_SEEDS, N_REWARD_FEATURES, STATE_DIM};
use crate::error::{ensure, AlignError, Result};
use crate::sim::car::CarState;
use crate::sim::driver::ThreeLaneWorld;

/// Steering magnitude of the "veer" seeds.
const VEER: f64 = 5.0 * 0.13;

/// Optimiser configuration.
#[derive(Clone, Debug)]
pub struct OptimizerConfig {
    /// Planning horizon; must match the world's other-car plan.
    pub horizon: usize,

    /// Gradient steps per seed.
    pub n_planner_iters: usize,

    /// SGD step size.
    pub learning_rate: f64,

    /// Central-difference probe size.
    pub fd_epsilon: f64,

    /// How many of the built-in seeds (straight, left, right) to use.
    pub n_seed_controls: usize,

    /// Log which seed produced the winning plan.
    pub log_best_init: bool,

    /// Plan cache bound.
    pub eviction: EvictionPolicy,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            horizon: crate::config::HORIZON,
            n_planner_iters: 10,
            learning_rate: 0.1,
            fd_epsilon: 1e-4,
            n_seed_controls: N_BUILTIN_SEEDS,
            log_best_init: false,
            eviction: EvictionPolicy::Unbounded,
        }
    }
}

impl OptimizerConfig {
    pub fn from_align(config: &AlignConfig, n_planner_iters: usize) -> Self {
        Self {
            horizon: config.horizon,
            n_seed_controls: config.n_seed_controls,
            n_planner_iters,
            ..Default::default()
        }
    }
}

/// Finds reward-maximising control sequences in a `ThreeLaneWorld`.
pub struct TrajOptimizer {
    world: ThreeLaneWorld,
    config: OptimizerConfig,
    init_controls: Vec<Array2<f64>>,
    cache: PlanCache,
    loss_evaluations: u64,
}

impl TrajOptimizer {
    pub fn new(config: OptimizerConfig, extra_seeds: Option<&Array3<f64>>) -> Result<Self> {
        Self::with_world(ThreeLaneWorld::default(), config, extra_seeds)
    }

    pub fn with_world(world: ThreeLaneWorld, config: OptimizerConfig, extra_seeds: Option<&Array3<f64>>) -> Result<Self> {
        let h = config.horizon;
        ensure!(
            world.horizon() == h,
            "world plan length {} does not match horizon {}",
            world.horizon(),
            h
        );
        ensure!(
            (1..=N_BUILTIN_SEEDS).contains(&config.n_seed_controls),
            "n_seed_controls must be in 1..={}, got {}",
            N_BUILTIN_SEEDS,
            config.n_seed_controls
        );

        let mut init_controls: Vec<Array2<f64>> = [0.0, -VEER, VEER]
            .iter()
            .take(config.n_seed_controls)
            .map(|&steer| Array2::from_shape_fn((h, CONTROL_DIM), |(_, j)| if j == 0 { steer } else { 0.0 }))
            .collect();

        if let Some(extra) = extra_seeds {
            let (_, rows, cols) = extra.dim();
            if rows != h || cols != CONTROL_DIM {
                return Err(AlignError::shape(
                    "extra seed controls",
                    format!("(k, {h}, {CONTROL_DIM})"),
                    format!("{:?}", extra.dim()),
                ));
            }
            init_controls.extend(extra.outer_iter().map(|c| c.to_owned()));
        }

        let cache = PlanCache::new(config.eviction);
        Ok(Self {
            world,
            config,
            init_controls,
            cache,
            loss_evaluations: 0,
        })
    }

    pub fn world(&self) -> &ThreeLaneWorld {
        &self.world
    }

    pub fn n_seeds(&self) -> usize {
        self.init_controls.len()
    }

    pub fn cache_stats(&self) -> &CacheStats {
        &self.cache.stats
    }

    /// Total rollouts scored by the loss so far.
    pub fn loss_evaluations(&self) -> u64 {
        self.loss_evaluations
    }

    /// Default (main, other) start states stacked as a (2, 4) array.
    pub fn default_start_state(&self) -> Array2<f64> {
        stack![Axis(0), self.world.main_init.to_array(), self.world.other_init.to_array()]
    }

    /// Find the best control sequence for `reward` from `start_state`
    /// (a (2, 4) array of main and other car states, default world starts if
    /// `None`). Returns the plan and its loss.
    pub fn make_opt_traj(
        &mut self,
        reward: ArrayView1<f64>,
        start_state: Option<ArrayView2<f64>>,
        memorize: bool,
    ) -> Result<(Array2<f64>, f64)> {
        if reward.len() != N_REWARD_FEATURES {
            return Err(AlignError::shape("reward", format!("({N_REWARD_FEATURES},)"), format!("({},)", reward.len())));
        }
        let start = match start_state {
            Some(s) => {
                if s.dim() != (2, STATE_DIM) {
                    return Err(AlignError::shape("start state", format!("(2, {STATE_DIM})"), format!("{:?}", s.dim())));
                }
                s.to_owned()
            }
            None => self.default_start_state(),
        };

        let key = PlanKey::new(reward, start.view());
        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit);
        }

        let main_init = CarState::from_view(start.row(0))?;
        let other_init = CarState::from_view(start.row(1))?;

        let world = &self.world;
        let mut evaluations = 0u64;
        let mut loss = |controls: ArrayView2<f64>| {
            evaluations += 1;
            -world.cumulative_reward(reward, &main_init, &other_init, controls)
        };

        let mut best: Option<(usize, Array2<f64>, f64)> = None;
        let mut last: Option<(usize, Array2<f64>, f64)> = None;
        for (i, seed) in self.init_controls.iter().enumerate() {
            let mut controls = seed.clone();
            for _ in 0..self.config.n_planner_iters {
                let grad = central_difference(&mut loss, &controls, self.config.fd_epsilon);
                controls.scaled_add(-self.config.learning_rate, &grad);
            }
            let current = loss(controls.view());

            let improves = match &best {
                Some((_, _, best_loss)) => current < *best_loss,
                None => current < f64::INFINITY,
            };
            if improves {
                best = Some((i, controls.clone(), current));
            }
            last = Some((i, controls, current));
        }
        self.loss_evaluations += evaluations;

        let (best_init, plan, best_loss) = best
            .or(last)
            .ok_or_else(|| AlignError::Precondition("seed control bank is empty".into()))?;

        if self.config.log_best_init {
            tracing::info!(best_init, loss = best_loss, "best trajectory found");
        }

        if memorize {
            self.cache.insert(key, plan.clone(), best_loss);
        }

        Ok((plan, best_loss))
    }
}
