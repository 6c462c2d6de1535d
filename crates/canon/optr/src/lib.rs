//! Canon OPTR - pick the lowest-cost admissible path.
//!
//! Each candidate is scored exactly once from features computed exactly
//! once; both are returned alongside the candidate as a [`ScoredCandidate`].
//! Gates run in a fixed order (prerequisites, authority, risk, cost,
//! success probability) and any failure makes the candidate inadmissible
//! by forcing its total to `+inf`.

#![deny(unsafe_code)]

pub mod error;
pub mod features;
pub mod gates;
pub mod resolve;
pub mod score;

pub use error::{OptrError, OptrResult};
pub use features::{FeatureFn, HeuristicFeatures, SuppliedFeatures};
pub use gates::{
    gate_authority_boundary, gate_cost_bound, gate_missing_prereqs, gate_risk_bound,
    gate_success_probability, OptrBounds,
};
pub use resolve::{resolve, OptrRequest, OptrRun, ScoredCandidate};
pub use score::{
    score_path, CandidateFeatures, OptrScore, OptrWeights, ScoreComponents, DEFAULT_WEIGHTS,
    SUCCESS_PROB_FLOOR,
};
