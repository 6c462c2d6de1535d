//! Canon Service - the decision API.
//!
//! Every request is validated, bound to the caller's tenant, reduced to a
//! stable key and then run at most once: the gates evaluate against a single
//! canon snapshot, the outcome is chained into the ledger, and the exact
//! response bytes are cached so a retry replays them.
//!
//! Gate denials are DENY responses, never errors. [`ServiceError`] is
//! reserved for validation failures and system faults.

#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod keys;
pub mod remediation;
pub mod requests;
pub mod responses;
pub mod service;

pub use config::{EngineConfig, DEFAULT_ACTION_CLASS, NON_INTERFERENCE_ACTION_ID};
pub use error::{ServiceError, ServiceResult};
pub use remediation::{minimal_fix, NON_INTERFERENCE_FIXES};
pub use requests::{
    Actor, ActorType, Caller, CanonRef, CanonRefKind, DecideRequest, Environment, GateCheck,
    Intent, NonInterferenceRequest, PromoteRequest, PromotionCandidate, PromotionGateInput,
    ProposedAction, Proposer, ProvenanceInput, RequestContext, Target, NO_IDEMPOTENCY_KEY,
};
pub use responses::{
    CanonStoreView, CanonVersionView, DecideProof, DecideResponse, DenialBody, LedgerView,
    NonInterferenceProof, NonInterferenceResponse, PromoteProof, PromoteResponse, RecentView,
    Reply, Verdict, VerifyView, WhyNotView,
};
pub use service::DecisionService;
