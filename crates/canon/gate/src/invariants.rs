//! Generic invariant evaluation.

use crate::registry::{
    INV_CANON_ONLY_EXECUTION, INV_LEDGER_APPEND_ONLY, INV_NON_INTERFERENCE, INV_PROMOTION_GATE,
    INV_TRUST_DENIAL_TRACE, INV_TS_MANDATORY,
};
use canon_types::{Action, CanonBody, CanonItem, DenialReasonCode, Severity, WhyNotTrace};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// Evaluator selected by invariant id.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InvariantRule {
    TimestampMandatory,
    CanonOnlyExecution,
    PromotionGate,
    NonInterference,
    TrustDenialTrace,
    LedgerAppendOnly,
    /// Promoted invariant with no built-in evaluator.
    Declarative,
}

impl InvariantRule {
    pub fn for_id(id: &str) -> Self {
        match id {
            INV_TS_MANDATORY => InvariantRule::TimestampMandatory,
            INV_CANON_ONLY_EXECUTION => InvariantRule::CanonOnlyExecution,
            INV_PROMOTION_GATE => InvariantRule::PromotionGate,
            INV_NON_INTERFERENCE => InvariantRule::NonInterference,
            INV_TRUST_DENIAL_TRACE => InvariantRule::TrustDenialTrace,
            INV_LEDGER_APPEND_ONLY => InvariantRule::LedgerAppendOnly,
            _ => InvariantRule::Declarative,
        }
    }
}

/// What an invariant may look at.
#[derive(Clone, Copy, Debug, Default)]
pub struct InvariantContext<'a> {
    pub action: Option<&'a Action>,
    /// Authoritative canon ids visible to the request.
    pub canon_ids: Option<&'a BTreeSet<String>>,
    pub proposed_change: Option<&'a CanonItem>,
    /// Acting agent and per-agent expected TTV deltas.
    pub ttv_deltas: Option<(&'a str, &'a BTreeMap<String, f64>)>,
}

impl<'a> InvariantContext<'a> {
    pub fn with_action(mut self, action: &'a Action) -> Self {
        self.action = Some(action);
        self
    }

    pub fn with_canon_ids(mut self, ids: &'a BTreeSet<String>) -> Self {
        self.canon_ids = Some(ids);
        self
    }

    pub fn with_proposed_change(mut self, item: &'a CanonItem) -> Self {
        self.proposed_change = Some(item);
        self
    }

    pub fn with_ttv_deltas(mut self, acting: &'a str, deltas: &'a BTreeMap<String, f64>) -> Self {
        self.ttv_deltas = Some((acting, deltas));
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvariantCheck {
    pub invariant_id: String,
    pub violated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason_code: Option<DenialReasonCode>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_canon_ids: Vec<String>,
}

impl InvariantCheck {
    fn holds(id: &str, message: impl Into<String>) -> Self {
        Self {
            invariant_id: id.to_string(),
            violated: false,
            reason_code: None,
            message: message.into(),
            missing_canon_ids: Vec::new(),
        }
    }

    fn violated(id: &str, code: DenialReasonCode, message: impl Into<String>) -> Self {
        Self {
            invariant_id: id.to_string(),
            violated: true,
            reason_code: Some(code),
            message: message.into(),
            missing_canon_ids: Vec::new(),
        }
    }
}

/// Evaluate one invariant against `ctx`.
pub fn check_invariant(invariant: &CanonItem, ctx: &InvariantContext<'_>) -> InvariantCheck {
    let id = invariant.id.as_str();
    match InvariantRule::for_id(id) {
        InvariantRule::TimestampMandatory => match ctx.proposed_change {
            Some(change) if !change.has_authority_metadata() => InvariantCheck::violated(
                id,
                DenialReasonCode::AuthorityBoundaryFail,
                format!(
                    "Proposed change {} lacks timestamp or provenance",
                    change.id
                ),
            ),
            _ => InvariantCheck::holds(id, "Timestamps present"),
        },
        InvariantRule::CanonOnlyExecution => match (ctx.action, ctx.canon_ids) {
            (Some(action), Some(present)) => {
                let missing: Vec<String> = action
                    .prerequisites_canon_ids
                    .iter()
                    .filter(|p| !present.contains(*p))
                    .cloned()
                    .collect();
                if missing.is_empty() {
                    InvariantCheck::holds(id, "Canon prerequisites present")
                } else {
                    let mut check = InvariantCheck::violated(
                        id,
                        DenialReasonCode::MissingCanonPrereqs,
                        format!("Missing canon prerequisites: {}", missing.join(", ")),
                    );
                    check.missing_canon_ids = missing;
                    check
                }
            }
            _ => InvariantCheck::holds(id, "No action to evaluate"),
        },
        InvariantRule::NonInterference => match ctx.ttv_deltas {
            Some((acting, deltas)) => {
                let offenders: Vec<&str> = deltas
                    .iter()
                    .filter(|(agent, delta)| agent.as_str() != acting && **delta > 0.0)
                    .map(|(agent, _)| agent.as_str())
                    .collect();
                if offenders.is_empty() {
                    InvariantCheck::holds(id, "No agent's TTV increases")
                } else {
                    InvariantCheck::violated(
                        id,
                        DenialReasonCode::NonInterferenceViolation,
                        format!("Expected TTV increases for: {}", offenders.join(", ")),
                    )
                }
            }
            None => InvariantCheck::holds(id, "No TTV forecast to evaluate"),
        },
        InvariantRule::PromotionGate
        | InvariantRule::TrustDenialTrace
        | InvariantRule::LedgerAppendOnly => {
            InvariantCheck::holds(id, "Enforced by its owning component")
        }
        InvariantRule::Declarative => InvariantCheck::holds(id, "No evaluator registered"),
    }
}

/// Evaluate every invariant; returns only the violations.
pub fn check_invariants<'i>(
    invariants: impl IntoIterator<Item = &'i CanonItem>,
    ctx: &InvariantContext<'_>,
) -> Vec<(InvariantCheck, Severity)> {
    invariants
        .into_iter()
        .filter_map(|inv| {
            let severity = match &inv.body {
                CanonBody::Invariant { severity, .. } => *severity,
                _ => return None,
            };
            let check = check_invariant(inv, ctx);
            debug!(invariant_id = %check.invariant_id, violated = check.violated, "invariant evaluated");
            check.violated.then_some((check, severity))
        })
        .collect()
}

/// Convert violations into one denial trace. Severity is recorded on the
/// log line but never softens the outcome.
pub fn gate_invariants<'i>(
    ts: DateTime<Utc>,
    action_id: &str,
    invariants: impl IntoIterator<Item = &'i CanonItem>,
    ctx: &InvariantContext<'_>,
) -> Option<WhyNotTrace> {
    let mut trace: Option<WhyNotTrace> = None;

    for (check, severity) in check_invariants(invariants, ctx) {
        warn!(
            invariant_id = %check.invariant_id,
            ?severity,
            message = %check.message,
            "invariant violated"
        );
        let code = check
            .reason_code
            .unwrap_or(DenialReasonCode::InvariantViolation);
        let next = WhyNotTrace::new(ts, action_id, code, check.message.clone())
            .with_violated_invariants([check.invariant_id.clone()])
            .with_missing_canon_ids(check.missing_canon_ids.clone());
        match trace.as_mut() {
            Some(existing) => existing.absorb(next),
            None => trace = Some(next),
        }
    }

    trace.map(|mut t| {
        t.add_reason(DenialReasonCode::InvariantViolation);
        let ids = t.violated_invariant_ids.clone();
        t.with_context(json!({ "violatedInvariants": ids }))
    })
}
