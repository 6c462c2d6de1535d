//! Closed denial taxonomy and the WhyNot trace.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Every reason a gate may refuse an action. There are no free-form codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DenialReasonCode {
    MissingCanonPrereqs,
    InvariantViolation,
    NonInterferenceViolation,
    AuthorityBoundaryFail,
    RiskBoundExceeded,
    CostBoundExceeded,
    SuccessProbTooLow,
}

impl DenialReasonCode {
    pub const ALL: [DenialReasonCode; 7] = [
        DenialReasonCode::MissingCanonPrereqs,
        DenialReasonCode::InvariantViolation,
        DenialReasonCode::NonInterferenceViolation,
        DenialReasonCode::AuthorityBoundaryFail,
        DenialReasonCode::RiskBoundExceeded,
        DenialReasonCode::CostBoundExceeded,
        DenialReasonCode::SuccessProbTooLow,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DenialReasonCode::MissingCanonPrereqs => "MISSING_CANON_PREREQS",
            DenialReasonCode::InvariantViolation => "INVARIANT_VIOLATION",
            DenialReasonCode::NonInterferenceViolation => "NON_INTERFERENCE_VIOLATION",
            DenialReasonCode::AuthorityBoundaryFail => "AUTHORITY_BOUNDARY_FAIL",
            DenialReasonCode::RiskBoundExceeded => "RISK_BOUND_EXCEEDED",
            DenialReasonCode::CostBoundExceeded => "COST_BOUND_EXCEEDED",
            DenialReasonCode::SuccessProbTooLow => "SUCCESS_PROB_TOO_LOW",
        }
    }
}

impl std::fmt::Display for DenialReasonCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured explanation of a single denial.
///
/// `reason_codes` and the id lists behave as ordered sets: adding a value
/// that is already present is a no-op.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhyNotTrace {
    pub ts: DateTime<Utc>,
    pub action_id: String,
    pub reason_codes: Vec<DenialReasonCode>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_canon_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub violated_invariant_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_canon_refs: Vec<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

impl WhyNotTrace {
    pub fn new(
        ts: DateTime<Utc>,
        action_id: impl Into<String>,
        code: DenialReasonCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            ts,
            action_id: action_id.into(),
            reason_codes: vec![code],
            missing_canon_ids: Vec::new(),
            violated_invariant_ids: Vec::new(),
            required_canon_refs: Vec::new(),
            message: message.into(),
            context: None,
        }
    }

    pub fn add_reason(&mut self, code: DenialReasonCode) {
        if !self.reason_codes.contains(&code) {
            self.reason_codes.push(code);
        }
    }

    pub fn has_reason(&self, code: DenialReasonCode) -> bool {
        self.reason_codes.contains(&code)
    }

    pub fn with_missing_canon_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        push_unique(&mut self.missing_canon_ids, ids);
        self
    }

    pub fn with_violated_invariants<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        push_unique(&mut self.violated_invariant_ids, ids);
        self
    }

    pub fn with_required_canon_refs<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        push_unique(&mut self.required_canon_refs, ids);
        self
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }

    /// Fold another trace for the same action into this one.
    pub fn absorb(&mut self, other: WhyNotTrace) {
        for code in other.reason_codes {
            self.add_reason(code);
        }
        push_unique(&mut self.missing_canon_ids, other.missing_canon_ids);
        push_unique(&mut self.violated_invariant_ids, other.violated_invariant_ids);
        push_unique(&mut self.required_canon_refs, other.required_canon_refs);
    }
}

fn push_unique<I, S>(target: &mut Vec<String>, values: I)
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    for value in values {
        let value = value.into();
        if !target.contains(&value) {
            target.push(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_codes_behave_as_ordered_set() {
        let mut trace = WhyNotTrace::new(
            Utc::now(),
            "a1",
            DenialReasonCode::MissingCanonPrereqs,
            "missing",
        );
        trace.add_reason(DenialReasonCode::MissingCanonPrereqs);
        trace.add_reason(DenialReasonCode::AuthorityBoundaryFail);
        assert_eq!(
            trace.reason_codes,
            vec![
                DenialReasonCode::MissingCanonPrereqs,
                DenialReasonCode::AuthorityBoundaryFail
            ]
        );
    }

    #[test]
    fn codes_serialize_screaming_snake() {
        for code in DenialReasonCode::ALL {
            let json = serde_json::to_value(code).unwrap();
            assert_eq!(json, Value::String(code.as_str().to_string()));
        }
    }

    #[test]
    fn absorb_unions_ids() {
        let ts = Utc::now();
        let mut a = WhyNotTrace::new(ts, "a1", DenialReasonCode::MissingCanonPrereqs, "m")
            .with_missing_canon_ids(["X"]);
        let b = WhyNotTrace::new(ts, "a1", DenialReasonCode::AuthorityBoundaryFail, "m")
            .with_missing_canon_ids(["X", "Y"]);
        a.absorb(b);
        assert_eq!(a.missing_canon_ids, vec!["X".to_string(), "Y".to_string()]);
        assert_eq!(a.reason_codes.len(), 2);
    }

    #[test]
    fn unknown_codes_are_rejected() {
        let parsed: Result<DenialReasonCode, _> = serde_json::from_str("\"MAYBE_LATER\"");
        assert!(parsed.is_err());
    }
}
