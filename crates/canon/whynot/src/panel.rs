use canon_types::{canonical_hash, DenialReasonCode, TypesResult, WhyNotTrace};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DenialSeverity {
    High,
    Medium,
    Low,
}

pub fn severity(code: DenialReasonCode) -> DenialSeverity {
    match code {
        DenialReasonCode::InvariantViolation | DenialReasonCode::AuthorityBoundaryFail => {
            DenialSeverity::High
        }
        DenialReasonCode::MissingCanonPrereqs | DenialReasonCode::NonInterferenceViolation => {
            DenialSeverity::Medium
        }
        DenialReasonCode::RiskBoundExceeded
        | DenialReasonCode::CostBoundExceeded
        | DenialReasonCode::SuccessProbTooLow => DenialSeverity::Low,
    }
}

pub fn describe(code: DenialReasonCode) -> &'static str {
    match code {
        DenialReasonCode::MissingCanonPrereqs => {
            "Required canon knowledge has not been promoted yet"
        }
        DenialReasonCode::InvariantViolation => "The action would violate a canon invariant",
        DenialReasonCode::NonInterferenceViolation => {
            "The action would increase another agent's time-to-value"
        }
        DenialReasonCode::AuthorityBoundaryFail => {
            "The action cites canon it is not authorized by"
        }
        DenialReasonCode::RiskBoundExceeded => "Estimated risk exceeds the configured bound",
        DenialReasonCode::CostBoundExceeded => "Estimated cost exceeds the configured bound",
        DenialReasonCode::SuccessProbTooLow => {
            "Estimated success probability is below the configured floor"
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DenialReasonView {
    pub code: DenialReasonCode,
    pub description: String,
    pub severity: DenialSeverity,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingPrerequisite {
    pub id: String,
    pub title: String,
    pub why: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionDetails {
    pub action_id: String,
    pub ts: DateTime<Utc>,
    pub message: String,
}

/// Display model for a denial.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhyNotPanel {
    pub title: String,
    pub summary: String,
    pub denial_reasons: Vec<DenialReasonView>,
    pub violated_constraints: Vec<String>,
    pub missing_prerequisites: Vec<MissingPrerequisite>,
    pub action_details: ActionDetails,
    pub proof_hash: String,
}

pub fn format_why_not_panel(trace: &WhyNotTrace) -> TypesResult<WhyNotPanel> {
    let proof_hash = canonical_hash(&json!({
        "actionId": trace.action_id,
        "ts": trace.ts,
        "reasonCodes": trace.reason_codes,
        "message": trace.message,
    }))?;

    Ok(WhyNotPanel {
        title: "Action Denied".to_string(),
        summary: format!("Action {} was denied: {}", trace.action_id, trace.message),
        denial_reasons: trace
            .reason_codes
            .iter()
            .map(|code| DenialReasonView {
                code: *code,
                description: describe(*code).to_string(),
                severity: severity(*code),
            })
            .collect(),
        violated_constraints: trace
            .violated_invariant_ids
            .iter()
            .map(|id| format!("Invariant {id} would be violated"))
            .collect(),
        missing_prerequisites: trace
            .missing_canon_ids
            .iter()
            .map(|id| MissingPrerequisite {
                id: id.clone(),
                title: format!("Canon Item {id}"),
                why: "Required knowledge not yet promoted to CANON level".to_string(),
            })
            .collect(),
        action_details: ActionDetails {
            action_id: trace.action_id.clone(),
            ts: trace.ts,
            message: trace.message.clone(),
        },
        proof_hash,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trace() -> WhyNotTrace {
        WhyNotTrace::new(
            Utc::now(),
            "a1",
            DenialReasonCode::AuthorityBoundaryFail,
            "Missing canon prerequisites: X",
        )
        .with_missing_canon_ids(["X"])
        .with_violated_invariants(["INV_CANON_ONLY_EXECUTION"])
    }

    #[test]
    fn panel_maps_codes_to_severity() {
        let panel = format_why_not_panel(&trace()).unwrap();
        assert_eq!(panel.title, "Action Denied");
        assert_eq!(panel.denial_reasons[0].severity, DenialSeverity::High);
        assert_eq!(
            panel.violated_constraints,
            vec!["Invariant INV_CANON_ONLY_EXECUTION would be violated".to_string()]
        );
        assert_eq!(panel.missing_prerequisites[0].title, "Canon Item X");
    }

    #[test]
    fn proof_hash_is_stable_and_message_sensitive() {
        let t = trace();
        let a = format_why_not_panel(&t).unwrap();
        let b = format_why_not_panel(&t).unwrap();
        assert_eq!(a.proof_hash, b.proof_hash);

        let mut changed = t.clone();
        changed.message.push('!');
        assert_ne!(format_why_not_panel(&changed).unwrap().proof_hash, a.proof_hash);
    }

    #[test]
    fn every_code_has_a_severity_and_description() {
        for code in DenialReasonCode::ALL {
            assert!(!describe(code).is_empty());
            let _ = severity(code);
        }
        assert_eq!(severity(DenialReasonCode::CostBoundExceeded), DenialSeverity::Low);
        assert_eq!(
            severity(DenialReasonCode::NonInterferenceViolation),
            DenialSeverity::Medium
        );
    }
}
