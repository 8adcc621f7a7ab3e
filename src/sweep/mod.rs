//! Parallel experiment sweep over (epsilon, delta, n_human_samples).
//!
//! Each grid point filters the first `n` queries and scores the resulting
//! test against calibrated ground truth. Workers return self-contained
//! outcomes; results are merged into persisted stores on one thread.

pub mod key;
pub mod runner;
pub mod store;
