//! Individual admission gates. Each returns `None` on pass.

use crate::score::CandidateFeatures;
use canon_gate::require_canon_refs;
use canon_types::{Action, CanonSnapshot, DenialReasonCode, WhyNotTrace};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeSet;

/// Optional bounds; an unset bound disables its gate.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptrBounds {
    #[serde(default)]
    pub max_risk: Option<f64>,
    #[serde(default)]
    pub max_cost: Option<f64>,
    #[serde(default)]
    pub min_success_prob: Option<f64>,
}

/// Prerequisites must exist as authoritative canon.
pub fn gate_missing_prereqs(
    ts: DateTime<Utc>,
    action: &Action,
    canon_ids_present: &BTreeSet<String>,
) -> Option<WhyNotTrace> {
    let missing: Vec<&String> = action
        .prerequisites_canon_ids
        .iter()
        .filter(|id| !canon_ids_present.contains(*id))
        .collect();
    if missing.is_empty() {
        return None;
    }
    let listed = missing
        .iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    Some(
        WhyNotTrace::new(
            ts,
            &action.id,
            DenialReasonCode::MissingCanonPrereqs,
            format!(
                "Denied: \"{}\" is too early. Missing prerequisite canon items: {}",
                action.name, listed
            ),
        )
        .with_missing_canon_ids(missing.into_iter().cloned())
        .with_required_canon_refs(action.prerequisites_canon_ids.iter().cloned()),
    )
}

/// Prerequisites must be cited, and citations must be authoritative.
pub fn gate_authority_boundary(
    ts: DateTime<Utc>,
    action: &Action,
    canon_refs_used: &BTreeSet<String>,
    snapshot: &CanonSnapshot,
) -> Option<WhyNotTrace> {
    let check = require_canon_refs(action, canon_refs_used, snapshot);
    if check.ok {
        return None;
    }
    Some(
        WhyNotTrace::new(
            ts,
            &action.id,
            DenialReasonCode::AuthorityBoundaryFail,
            check.message,
        )
        .with_missing_canon_ids(check.missing_refs)
        .with_required_canon_refs(canon_refs_used.iter().cloned())
        .with_context(json!({ "invalidRefs": check.invalid_refs })),
    )
}

pub fn gate_risk_bound(
    ts: DateTime<Utc>,
    action: &Action,
    features: &CandidateFeatures,
    max_risk: f64,
) -> Option<WhyNotTrace> {
    (features.risk > max_risk).then(|| {
        WhyNotTrace::new(
            ts,
            &action.id,
            DenialReasonCode::RiskBoundExceeded,
            format!(
                "Denied: Risk {:.2} exceeds bound {:.2}",
                features.risk, max_risk
            ),
        )
        .with_context(json!({ "risk": features.risk, "maxRisk": max_risk }))
    })
}

pub fn gate_cost_bound(
    ts: DateTime<Utc>,
    action: &Action,
    features: &CandidateFeatures,
    max_cost: f64,
) -> Option<WhyNotTrace> {
    (features.cost > max_cost).then(|| {
        WhyNotTrace::new(
            ts,
            &action.id,
            DenialReasonCode::CostBoundExceeded,
            format!(
                "Denied: Cost {:.2} exceeds bound {:.2}",
                features.cost, max_cost
            ),
        )
        .with_context(json!({ "cost": features.cost, "maxCost": max_cost }))
    })
}

pub fn gate_success_probability(
    ts: DateTime<Utc>,
    action: &Action,
    features: &CandidateFeatures,
    min_success_prob: f64,
) -> Option<WhyNotTrace> {
    (features.success_prob < min_success_prob).then(|| {
        WhyNotTrace::new(
            ts,
            &action.id,
            DenialReasonCode::SuccessProbTooLow,
            format!(
                "Denied: Success probability {:.2} is below floor {:.2}",
                features.success_prob, min_success_prob
            ),
        )
        .with_context(json!({
            "successProb": features.success_prob,
            "minSuccessProb": min_success_prob
        }))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn features(risk: f64, cost: f64, success_prob: f64) -> CandidateFeatures {
        CandidateFeatures {
            ttv: 0.0,
            cost,
            risk,
            success_prob,
        }
    }

    #[test]
    fn prereq_gate_names_missing_items() {
        let action = Action::new("a1", "ship").with_prerequisites(["X", "Y"]);
        let present: BTreeSet<String> = ["Y".to_string()].into();
        let trace = gate_missing_prereqs(Utc::now(), &action, &present).unwrap();
        assert_eq!(trace.missing_canon_ids, vec!["X".to_string()]);
        assert_eq!(
            trace.message,
            "Denied: \"ship\" is too early. Missing prerequisite canon items: X"
        );
    }

    #[test]
    fn bound_gates_format_two_decimals() {
        let action = Action::new("a1", "ship");
        let trace = gate_risk_bound(Utc::now(), &action, &features(0.756, 0.0, 1.0), 0.5).unwrap();
        assert_eq!(trace.message, "Denied: Risk 0.76 exceeds bound 0.50");
        assert_eq!(trace.context.unwrap()["maxRisk"], 0.5);

        assert!(gate_cost_bound(Utc::now(), &action, &features(0.0, 3.0, 1.0), 3.0).is_none());
        let trace = gate_cost_bound(Utc::now(), &action, &features(0.0, 3.5, 1.0), 3.0).unwrap();
        assert_eq!(trace.reason_codes, vec![DenialReasonCode::CostBoundExceeded]);
    }

    #[test]
    fn success_floor_rejects_unlikely_paths() {
        let action = Action::new("a1", "ship");
        let trace =
            gate_success_probability(Utc::now(), &action, &features(0.0, 0.0, 0.2), 0.5).unwrap();
        assert!(trace.has_reason(DenialReasonCode::SuccessProbTooLow));
    }
}
