//! Trajectory optimisation for the main car.
//!
//! Multi-start gradient descent over a (H, 2) control matrix, scored by the
//! negative cumulative reward, with results memoised per (reward, start-state).

pub mod cache;
pub mod gradient;
pub mod optimizer;
