//! Stable request keys and the identifiers derived from them.
//!
//! A stable key is the canonical hash of everything that determines a
//! decision's outcome. Two requests with the same key are the same request.

use crate::requests::{
    CanonRef, DecideRequest, NonInterferenceRequest, PromoteRequest, RequestContext,
    NO_IDEMPOTENCY_KEY,
};
use canon_types::{canonical_hash, sha256_hex, TenantId, TypesResult};
use serde_json::{json, Value};
use std::collections::BTreeSet;

const POINTER_HEX_LEN: usize = 32;
const WHY_NOT_HEX_LEN: usize = 24;

fn sorted_ids(refs: &[CanonRef]) -> Vec<&str> {
    refs.iter()
        .map(|r| r.id.as_str())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Only the context fields that identify a caller session take part.
fn context_fingerprint(context: Option<&RequestContext>) -> Value {
    match context {
        Some(c) => json!({
            "sessionId": c.session_id,
            "environment": c.environment,
            "actor": c.actor,
        }),
        None => json!({ "sessionId": null, "environment": null, "actor": null }),
    }
}

fn idempotency_or_none(key: Option<&str>) -> &str {
    key.filter(|k| !k.is_empty()).unwrap_or(NO_IDEMPOTENCY_KEY)
}

pub fn decide_key(
    tenant: &TenantId,
    request: &DecideRequest,
    idempotency_key: Option<&str>,
) -> TypesResult<String> {
    canonical_hash(&json!({
        "tenantId": tenant,
        "actionId": request.action_id,
        "idempotencyKey": idempotency_or_none(idempotency_key),
        "intent": request.intent,
        "canonIds": sorted_ids(&request.canon_refs),
        "candidates": request.candidates,
        "features": request.features,
        "riskLevel": request.risk_level,
        "context": context_fingerprint(request.context.as_ref()),
    }))
}

pub fn promote_key(
    tenant: &TenantId,
    request: &PromoteRequest,
    idempotency_key: Option<&str>,
) -> TypesResult<String> {
    canonical_hash(&json!({
        "tenantId": tenant,
        "canonId": request.candidate.id,
        "idempotencyKey": idempotency_or_none(idempotency_key),
        "candidate": request.candidate,
        "provenance": request.provenance,
        "gate": request.gate,
        "context": context_fingerprint(request.context.as_ref()),
    }))
}

pub fn non_interference_key(
    tenant: &TenantId,
    request: &NonInterferenceRequest,
    idempotency_key: Option<&str>,
) -> TypesResult<String> {
    canonical_hash(&json!({
        "tenantId": tenant,
        "actionId": request.action.action_id,
        "idempotencyKey": idempotency_or_none(idempotency_key),
        "proposer": request.proposer,
        "action": request.action,
        "others": request.others,
        "canonIds": sorted_ids(&request.canon_refs),
        "context": context_fingerprint(request.context.as_ref()),
    }))
}

/// `ledger:` plus the first 32 hex chars of the stable key.
pub fn ledger_pointer(stable_key: &str) -> String {
    format!("ledger:{}", prefix(stable_key, POINTER_HEX_LEN))
}

pub fn decision_id(stable_key: &str, allowed: bool) -> String {
    let verdict = if allowed { "ALLOW" } else { "DENY" };
    sha256_hex(format!("{stable_key}:{verdict}"))
}

pub fn why_not_id(stable_key: &str) -> String {
    format!("whynot_{}", prefix(stable_key, WHY_NOT_HEX_LEN))
}

fn prefix(s: &str, n: usize) -> &str {
    s.get(..n).unwrap_or(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::requests::{CanonRefKind, Intent};

    fn request(refs: &[&str]) -> DecideRequest {
        DecideRequest {
            action_id: "deploy".into(),
            intent: Intent {
                objective: "ship".into(),
                proposed_action: "deploy v2".into(),
                target: None,
            },
            canon_refs: refs
                .iter()
                .map(|id| CanonRef {
                    kind: CanonRefKind::Invariant,
                    id: id.to_string(),
                    version: None,
                    hash: None,
                })
                .collect(),
            candidates: None,
            features: None,
            risk_level: None,
            context: None,
            idempotency_key: None,
        }
    }

    #[test]
    fn citation_order_does_not_change_the_key() {
        let tenant = TenantId::default();
        let a = decide_key(&tenant, &request(&["A", "B"]), Some("k1")).unwrap();
        let b = decide_key(&tenant, &request(&["B", "A"]), Some("k1")).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn tenant_and_idempotency_key_separate_requests() {
        let r = request(&["A"]);
        let base = decide_key(&TenantId::new("t1"), &r, Some("k1")).unwrap();
        assert_ne!(base, decide_key(&TenantId::new("t2"), &r, Some("k1")).unwrap());
        assert_ne!(base, decide_key(&TenantId::new("t1"), &r, Some("k2")).unwrap());
        assert_eq!(
            decide_key(&TenantId::new("t1"), &r, None).unwrap(),
            decide_key(&TenantId::new("t1"), &r, Some("")).unwrap()
        );
    }

    #[test]
    fn derived_identifiers() {
        let key = "a".repeat(64);
        assert_eq!(ledger_pointer(&key), format!("ledger:{}", "a".repeat(32)));
        assert_eq!(why_not_id(&key), format!("whynot_{}", "a".repeat(24)));
        assert_ne!(decision_id(&key, true), decision_id(&key, false));
        assert_eq!(decision_id(&key, true).len(), 64);
    }
}
