//! Canon Interference - an action may not slow anyone else down.
//!
//! [`non_interference_ok`] is the pure predicate over per-agent TTV deltas.
//! Deltas come either from explicit forecasts or from a pluggable
//! [`TtvEstimator`]; the default [`ContentionEstimator`] charges fixed
//! penalties for shared-resource and shared-state conflicts.

#![deny(unsafe_code)]

pub mod check;
pub mod equilibrium;
pub mod estimator;

pub use check::{gate_non_interference, non_interference_ok, InterferenceViolation, NonInterferenceCheck};
pub use equilibrium::{check_multi_agent_equilibrium, EquilibriumConflict, EquilibriumReport};
pub use estimator::{forecast_deltas, AgentProfile, ContentionEstimator, TtvEstimator};
