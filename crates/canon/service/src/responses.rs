//! Response bodies and read views.

use crate::error::ServiceResult;
use canon_ledger::{ChainReport, LedgerEvent, RecentItem};
use canon_optr::OptrScore;
use canon_types::{CanonItem, CanonLevel, TenantId, WhyNotTrace};
use canon_whynot::{DenialKind, ProofVerification, WhyNotPanel};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::marker::PhantomData;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Allow,
    Deny,
}

/// A why-not trace as returned to the caller, with its index id and hints.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DenialBody {
    #[serde(flatten)]
    pub trace: WhyNotTrace,
    pub why_not_id: String,
    /// Promotion tests that failed, by name.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_checks: Vec<String>,
    pub minimal_fix: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecideProof {
    pub canon_version: String,
    pub evaluated_refs: Vec<String>,
    pub ledger_pointer: String,
    pub selected_path_id: String,
    pub score: OptrScore,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecideResponse {
    pub decision: Verdict,
    pub decision_id: String,
    pub ts: DateTime<Utc>,
    pub action_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof: Option<DecideProof>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub denial_trace: Option<DenialBody>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromoteProof {
    pub canon_version: String,
    pub from: CanonLevel,
    pub to: CanonLevel,
    /// Pass/fail per promotion test name.
    pub gate_summary: BTreeMap<String, bool>,
    pub ledger_pointer: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromoteResponse {
    pub decision: Verdict,
    pub promotion_id: String,
    pub ts: DateTime<Utc>,
    pub canon_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof: Option<PromoteProof>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub denial_trace: Option<DenialBody>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NonInterferenceProof {
    pub canon_version: String,
    /// Expected TTV change per other agent, milliseconds.
    pub deltas: BTreeMap<String, f64>,
    pub evaluated_invariants: Vec<String>,
    pub ledger_pointer: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NonInterferenceResponse {
    pub decision: Verdict,
    pub check_id: String,
    pub ts: DateTime<Utc>,
    pub action_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof: Option<NonInterferenceProof>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub denial_trace: Option<DenialBody>,
}

/// A serialized decision response.
///
/// `body` is exactly what was first produced for the request; a replay
/// returns the same bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reply<T> {
    pub body: String,
    pub replayed: bool,
    _response: PhantomData<fn() -> T>,
}

impl<T> Reply<T> {
    pub(crate) fn new(body: String, replayed: bool) -> Self {
        Self {
            body,
            replayed,
            _response: PhantomData,
        }
    }
}

impl<T: DeserializeOwned> Reply<T> {
    pub fn parse(&self) -> ServiceResult<T> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

// ============ Read Views ============

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerView {
    pub ts: DateTime<Utc>,
    pub pointer: String,
    pub count: usize,
    pub events: Vec<LedgerEvent>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyView {
    pub ts: DateTime<Utc>,
    #[serde(flatten)]
    pub report: ChainReport,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentView {
    pub ts: DateTime<Utc>,
    pub tenant_id: TenantId,
    pub items: Vec<RecentItem>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhyNotView {
    pub found: bool,
    pub id: String,
    pub ts: DateTime<Utc>,
    pub kind: DenialKind,
    pub action_id: String,
    pub denial_trace: Value,
    pub ledger_pointer: String,
    pub seq: u64,
    pub event_hash: String,
    pub verification: ProofVerification,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub panel: Option<WhyNotPanel>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonStoreView {
    pub ts: DateTime<Utc>,
    pub version: u64,
    pub version_label: String,
    pub items: Vec<CanonItem>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonVersionView {
    pub ts: DateTime<Utc>,
    pub version: u64,
    pub version_label: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use canon_types::DenialReasonCode;
    use serde_json::json;

    #[test]
    fn denial_body_flattens_the_trace() {
        let body = DenialBody {
            trace: WhyNotTrace::new(
                DateTime::<Utc>::UNIX_EPOCH,
                "deploy",
                DenialReasonCode::MissingCanonPrereqs,
                "missing X",
            )
            .with_missing_canon_ids(["X"]),
            why_not_id: "whynot_abc".into(),
            failed_checks: vec![],
            minimal_fix: vec!["Add canonRef: X".into()],
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["actionId"], json!("deploy"));
        assert_eq!(value["reasonCodes"], json!(["MISSING_CANON_PREREQS"]));
        assert_eq!(value["whyNotId"], json!("whynot_abc"));
        assert!(value.get("failedChecks").is_none());

        let back: DenialBody = serde_json::from_value(value).unwrap();
        assert_eq!(back, body);
    }
}
