//! Minimal-fix hints attached to every denial.

use canon_gate::{INV_NON_INTERFERENCE, INV_PROMOTION_GATE};
use canon_types::{DenialReasonCode, WhyNotTrace};

pub const NON_INTERFERENCE_FIXES: [&str; 3] = [
    "Modify the proposed action to avoid increasing others' expected TTV (reduce contention, scope, or risk).",
    "Re-run prediction/simulation to show \u{394}E[TTV_j] <= 0 for all other agents.",
    "If conflict is structural, promote a constraint to prevent this interference class in the future.",
];

/// The smallest set of changes that would clear the trace's reasons, in
/// first-seen order without duplicates.
pub fn minimal_fix(trace: &WhyNotTrace) -> Vec<String> {
    let mut fixes = Vec::new();

    for id in &trace.missing_canon_ids {
        fixes.push(format!("Add canonRef: {id}"));
    }

    let invalid = trace
        .context
        .as_ref()
        .and_then(|c| c.get("invalidRefs"))
        .and_then(|v| v.as_array());
    for id in invalid.into_iter().flatten().filter_map(|v| v.as_str()) {
        fixes.push(format!(
            "Replace canonRef {id}: it is not a timestamped CANON item"
        ));
    }

    for code in &trace.reason_codes {
        match code {
            DenialReasonCode::NonInterferenceViolation => {
                fixes.extend(NON_INTERFERENCE_FIXES.iter().map(|s| s.to_string()));
            }
            DenialReasonCode::RiskBoundExceeded => {
                fixes.push("Choose a lower-risk path or split the action into smaller steps".into());
            }
            DenialReasonCode::CostBoundExceeded => {
                fixes.push("Reduce the path's estimated cost below the configured bound".into());
            }
            DenialReasonCode::SuccessProbTooLow => {
                fixes.push("Provide evidence that raises the success probability above the floor".into());
            }
            DenialReasonCode::MissingCanonPrereqs
            | DenialReasonCode::AuthorityBoundaryFail
            | DenialReasonCode::InvariantViolation => {}
        }
    }

    for id in &trace.violated_invariant_ids {
        if id != INV_NON_INTERFERENCE && id != INV_PROMOTION_GATE {
            fixes.push(format!("Satisfy invariant {id}"));
        }
    }

    dedup(fixes)
}

pub(crate) fn dedup(items: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(items.len());
    for item in items {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}
