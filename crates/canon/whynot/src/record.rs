use crate::proof::DeniedDecisionProof;
use canon_types::{TenantId, WhyNotTrace};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which decision surface produced a denial.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DenialKind {
    Decide,
    Promote,
    NonInterference,
}

impl DenialKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DenialKind::Decide => "DECIDE",
            DenialKind::Promote => "PROMOTE",
            DenialKind::NonInterference => "NON_INTERFERENCE",
        }
    }
}

/// Why-not index entry, keyed by its why-not id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DenialRecord {
    pub id: String,
    pub kind: DenialKind,
    pub ts: DateTime<Utc>,
    pub tenant_id: TenantId,
    pub action_id: String,
    pub stable_key: String,
    pub pointer: String,
    pub seq: u64,
    pub event_hash: String,
    /// The denial body exactly as returned to the caller.
    pub denial_trace: Value,
    pub proof: DeniedDecisionProof,
}

/// Fold traces for one action into a single trace, keeping first-seen order.
pub fn merge_traces(traces: impl IntoIterator<Item = WhyNotTrace>) -> Option<WhyNotTrace> {
    let mut iter = traces.into_iter();
    let mut merged = iter.next()?;
    for trace in iter {
        if merged.message != trace.message {
            merged.message = format!("{}; {}", merged.message, trace.message);
        }
        merged.absorb(trace);
    }
    Some(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use canon_types::DenialReasonCode;

    #[test]
    fn merge_keeps_first_seen_order() {
        let ts = Utc::now();
        let merged = merge_traces(vec![
            WhyNotTrace::new(ts, "a1", DenialReasonCode::MissingCanonPrereqs, "missing X")
                .with_missing_canon_ids(["X"]),
            WhyNotTrace::new(ts, "a1", DenialReasonCode::AuthorityBoundaryFail, "uncited X")
                .with_missing_canon_ids(["X"]),
        ])
        .unwrap();
        assert_eq!(
            merged.reason_codes,
            vec![
                DenialReasonCode::MissingCanonPrereqs,
                DenialReasonCode::AuthorityBoundaryFail
            ]
        );
        assert_eq!(merged.missing_canon_ids, vec!["X".to_string()]);
        assert_eq!(merged.message, "missing X; uncited X");
    }

    #[test]
    fn merge_of_nothing_is_none() {
        assert!(merge_traces(Vec::new()).is_none());
    }
}
