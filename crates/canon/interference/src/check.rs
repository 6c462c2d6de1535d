use canon_gate::INV_NON_INTERFERENCE;
use canon_types::{DenialReasonCode, WhyNotTrace};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterferenceViolation {
    pub agent_id: String,
    /// Increase in expected time-to-value, milliseconds.
    pub delta_ms: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NonInterferenceCheck {
    pub ok: bool,
    pub violations: Vec<InterferenceViolation>,
}

/// `ok` is false iff some agent other than the actor has a positive delta.
pub fn non_interference_ok(
    acting_agent_id: &str,
    action_id: &str,
    deltas: &BTreeMap<String, f64>,
) -> NonInterferenceCheck {
    let violations: Vec<InterferenceViolation> = deltas
        .iter()
        .filter(|(agent, delta)| agent.as_str() != acting_agent_id && **delta > 0.0)
        .map(|(agent, delta)| InterferenceViolation {
            agent_id: agent.clone(),
            delta_ms: *delta,
        })
        .collect();
    debug!(
        acting_agent_id,
        action_id,
        violations = violations.len(),
        "non-interference evaluated"
    );
    NonInterferenceCheck {
        ok: violations.is_empty(),
        violations,
    }
}

pub fn gate_non_interference(
    ts: DateTime<Utc>,
    acting_agent_id: &str,
    action_id: &str,
    deltas: &BTreeMap<String, f64>,
) -> Option<WhyNotTrace> {
    let check = non_interference_ok(acting_agent_id, action_id, deltas);
    if check.ok {
        return None;
    }
    let agents: Vec<&str> = check.violations.iter().map(|v| v.agent_id.as_str()).collect();
    let context = json!({
        "violations": check
            .violations
            .iter()
            .map(|v| json!({ "agent": v.agent_id, "deltaMS": v.delta_ms }))
            .collect::<Vec<_>>()
    });
    Some(
        WhyNotTrace::new(
            ts,
            action_id,
            DenialReasonCode::NonInterferenceViolation,
            format!(
                "Action would increase expected time-to-value for: {}",
                agents.join(", ")
            ),
        )
        .with_violated_invariants([INV_NON_INTERFERENCE])
        .with_context(context),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn other_agent_slowdown_is_a_violation() {
        let deltas = BTreeMap::from([("me".to_string(), 0.0), ("you".to_string(), 50.0)]);
        let trace = gate_non_interference(Utc::now(), "me", "a1", &deltas).unwrap();
        assert_eq!(
            trace.reason_codes,
            vec![DenialReasonCode::NonInterferenceViolation]
        );
        assert_eq!(
            trace.violated_invariant_ids,
            vec![INV_NON_INTERFERENCE.to_string()]
        );
        let ctx = trace.context.unwrap();
        assert_eq!(ctx["violations"][0]["agent"], "you");
        assert_eq!(ctx["violations"][0]["deltaMS"], 50.0);
    }

    #[test]
    fn own_slowdown_and_speedups_are_fine() {
        let deltas = BTreeMap::from([("me".to_string(), 900.0), ("you".to_string(), -10.0)]);
        assert!(non_interference_ok("me", "a1", &deltas).ok);
        assert!(gate_non_interference(Utc::now(), "me", "a1", &deltas).is_none());
    }

    proptest! {
        #[test]
        fn ok_iff_no_other_agent_has_positive_delta(
            deltas in proptest::collection::btree_map("[a-e]", -100.0f64..100.0, 0..6),
            acting in "[a-e]",
        ) {
            let expected = !deltas.iter().any(|(a, d)| *a != acting && *d > 0.0);
            prop_assert_eq!(non_interference_ok(&acting, "x", &deltas).ok, expected);
        }
    }
}
