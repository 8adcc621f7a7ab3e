//! Car state and the kinematic step function.
//!
//! State is (x, y, heading, speed); control is (steer, accel):
//!   x' = x + dt · v · cos θ
//!   y' = y + dt · v · sin θ
//!   θ' = θ + dt · v · u₀
//!   v' = v + dt · (u₁ − friction · v)

use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::config::STATE_DIM;
use crate::error::{AlignError, Result};

/// Instantaneous configuration of one car.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CarState {
    pub x: f64,
    pub y: f64,
    pub heading: f64,
    pub speed: f64,
}

impl CarState {
    pub const fn new(x: f64, y: f64, heading: f64, speed: f64) -> Self {
        Self { x, y, heading, speed }
    }

    /// Build from a length-4 array view.
    pub fn from_view(v: ArrayView1<f64>) -> Result<Self> {
        if v.len() != STATE_DIM {
            return Err(AlignError::shape("car state", format!("({STATE_DIM},)"), format!("({},)", v.len())));
        }
        Ok(Self::new(v[0], v[1], v[2], v[3]))
    }

    pub fn to_array(&self) -> Array1<f64> {
        Array1::from_vec(vec![self.x, self.y, self.heading, self.speed])
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.heading.is_finite() && self.speed.is_finite()
    }
}

/// Pure, deterministic one-step transition.
pub trait Dynamics: Send + Sync {
    fn step(&self, state: &CarState, control: [f64; 2]) -> CarState;
}

/// Point-mass car model with linear speed friction.
#[derive(Clone, Debug)]
pub struct LegacyDynamics {
    /// Integration timestep.
    pub dt: f64,

    /// Speed friction coefficient.
    pub friction: f64,
}

impl Default for LegacyDynamics {
    fn default() -> Self {
        Self {
            dt: 0.1,
            friction: 1.0,
        }
    }
}

impl Dynamics for LegacyDynamics {
    fn step(&self, s: &CarState, u: [f64; 2]) -> CarState {
        CarState {
            x: s.x + self.dt * s.speed * s.heading.cos(),
            y: s.y + self.dt * s.speed * s.heading.sin(),
            heading: s.heading + self.dt * s.speed * u[0],
            speed: s.speed + self.dt * (u[1] - self.friction * s.speed),
        }
    }
}
