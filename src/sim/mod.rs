//! Driving simulation: the collaborator that turns control sequences into
//! states, per-step rewards, and trajectory feature vectors.
//!
//! The optimiser and normal constructor only see the `Dynamics` and
//! `FeatureSimulator` traits; `LegacyDynamics` and `DriverSim` are the
//! default three-lane highway implementations.

pub mod car;
pub mod driver;
