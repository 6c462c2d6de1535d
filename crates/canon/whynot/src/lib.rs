//! Canon WhyNot - every denial, explained and provable.
//!
//! A [`WhyNotTrace`](canon_types::WhyNotTrace) is rendered into a
//! [`WhyNotPanel`] for display and sealed into a [`DeniedDecisionProof`]
//! whose hash is re-verified on read. [`DenialRecord`] is the why-not index
//! entry written next to every DECISION_DENIED ledger event.

#![deny(unsafe_code)]

pub mod panel;
pub mod proof;
pub mod record;

pub use panel::{
    describe, format_why_not_panel, severity, ActionDetails, DenialReasonView, DenialSeverity,
    MissingPrerequisite, WhyNotPanel,
};
pub use proof::{
    create_denied_decision_proof, verify_denied_decision_proof, DeniedDecisionProof,
    ProofVerification,
};
pub use record::{merge_traces, DenialKind, DenialRecord};
