//! Canon Gate - invariant registry and authority boundary.
//!
//! [`require_canon_refs`] is the single choke point every resolver passes
//! through before admitting an action. [`check_invariant`] evaluates the
//! constitutional invariants generically over a context, and
//! [`gate_invariants`] turns hard violations into a denial trace.

#![deny(unsafe_code)]

pub mod authority;
pub mod invariants;
pub mod registry;

pub use authority::{require_canon_refs, AuthorityCheck};
pub use invariants::{
    check_invariant, check_invariants, gate_invariants, InvariantCheck, InvariantContext,
    InvariantRule,
};
pub use registry::{
    constitution, INVARIANTS, INV_CANON_ONLY_EXECUTION, INV_LEDGER_APPEND_ONLY,
    INV_NON_INTERFERENCE, INV_PROMOTION_GATE, INV_TRUST_DENIAL_TRACE, INV_TS_MANDATORY,
};
