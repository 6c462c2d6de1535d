use canon_types::{canonical_hash, DenialReasonCode, TypesResult, WhyNotTrace};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

/// A denial sealed with a hash over its normalized fields.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeniedDecisionProof {
    pub id: String,
    pub action_id: String,
    pub ts: DateTime<Utc>,
    pub reason_codes: Vec<DenialReasonCode>,
    pub missing_canon_ids: Vec<String>,
    pub violated_invariant_ids: Vec<String>,
    pub required_canon_refs: Vec<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    pub proof_hash: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofVerification {
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

fn proof_hash(
    id: &str,
    action_id: &str,
    ts: &DateTime<Utc>,
    reason_codes: &[DenialReasonCode],
    missing_canon_ids: &[String],
    violated_invariant_ids: &[String],
    message: &str,
) -> TypesResult<String> {
    canonical_hash(&json!({
        "id": id,
        "actionId": action_id,
        "ts": ts,
        "reasonCodes": reason_codes,
        "missingCanonIds": missing_canon_ids,
        "violatedInvariantIds": violated_invariant_ids,
        "message": message,
    }))
}

pub fn create_denied_decision_proof(
    id: &str,
    trace: &WhyNotTrace,
    created_at: DateTime<Utc>,
) -> TypesResult<DeniedDecisionProof> {
    let proof_hash = proof_hash(
        id,
        &trace.action_id,
        &trace.ts,
        &trace.reason_codes,
        &trace.missing_canon_ids,
        &trace.violated_invariant_ids,
        &trace.message,
    )?;
    Ok(DeniedDecisionProof {
        id: id.to_string(),
        action_id: trace.action_id.clone(),
        ts: trace.ts,
        reason_codes: trace.reason_codes.clone(),
        missing_canon_ids: trace.missing_canon_ids.clone(),
        violated_invariant_ids: trace.violated_invariant_ids.clone(),
        required_canon_refs: trace.required_canon_refs.clone(),
        message: trace.message.clone(),
        context: trace.context.clone(),
        proof_hash,
        created_at,
    })
}

/// Recompute the hash; any difference means the record was altered.
pub fn verify_denied_decision_proof(proof: &DeniedDecisionProof) -> ProofVerification {
    let recomputed = proof_hash(
        &proof.id,
        &proof.action_id,
        &proof.ts,
        &proof.reason_codes,
        &proof.missing_canon_ids,
        &proof.violated_invariant_ids,
        &proof.message,
    );
    match recomputed {
        Ok(hash) if hash == proof.proof_hash => ProofVerification {
            valid: true,
            reason: None,
        },
        Ok(_) => {
            warn!(proof_id = %proof.id, "denied decision proof hash mismatch");
            ProofVerification {
                valid: false,
                reason: Some(
                    "Proof hash mismatch - decision data was tampered with".to_string(),
                ),
            }
        }
        Err(e) => ProofVerification {
            valid: false,
            reason: Some(format!("Proof could not be re-encoded: {e}")),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proof() -> DeniedDecisionProof {
        let trace = WhyNotTrace::new(
            Utc::now(),
            "a1",
            DenialReasonCode::MissingCanonPrereqs,
            "missing X",
        )
        .with_missing_canon_ids(["X"]);
        create_denied_decision_proof("d1", &trace, Utc::now()).unwrap()
    }

    #[test]
    fn untouched_proof_verifies() {
        assert!(verify_denied_decision_proof(&proof()).valid);
    }

    #[test]
    fn tampered_proof_fails_with_reason() {
        let mut p = proof();
        p.missing_canon_ids.clear();
        let v = verify_denied_decision_proof(&p);
        assert!(!v.valid);
        assert_eq!(
            v.reason.as_deref(),
            Some("Proof hash mismatch - decision data was tampered with")
        );
    }

    #[test]
    fn survives_json_round_trip() {
        let p = proof();
        let json = serde_json::to_string(&p).unwrap();
        let back: DeniedDecisionProof = serde_json::from_str(&json).unwrap();
        assert!(verify_denied_decision_proof(&back).valid);
    }
}
