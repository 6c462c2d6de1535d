//! Canon Types - the shared vocabulary of the decision engine.
//!
//! Every other canon crate speaks in these types: knowledge items and their
//! promotion levels, actions and candidate paths, the closed denial taxonomy,
//! promotion decisions, and the canonical JSON + SHA-256 primitives used for
//! every hash the engine produces.

#![deny(unsafe_code)]

pub mod action;
pub mod canon;
pub mod denial;
pub mod envelope;
pub mod error;
pub mod hashing;
pub mod promotion;
pub mod time;

pub use action::{Action, CandidatePath, RiskLevel};
pub use canon::{
    CanonBody, CanonItem, CanonKind, CanonLevel, CanonSnapshot, Provenance, Severity,
};
pub use denial::{DenialReasonCode, WhyNotTrace};
pub use envelope::ConfidenceEnvelope;
pub use error::{TypesError, TypesResult};
pub use hashing::{canonical_hash, canonical_value, canonicalize, sha256_hex};
pub use promotion::{PromotionDecision, PromotionTest, PromotionTests};
pub use time::{Clock, FixedClock, SystemClock};

use serde::{Deserialize, Serialize};

/// Tenant identifier. Every ledger row, cache key and denial record is scoped by one.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(pub String);

impl TenantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TenantId {
    fn default() -> Self {
        Self("default".to_string())
    }
}

impl std::fmt::Display for TenantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
