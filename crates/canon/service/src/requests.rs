//! Request bodies and the authenticated caller.

use crate::error::{ServiceError, ServiceResult};
use canon_interference::AgentProfile;
use canon_optr::CandidateFeatures;
use canon_types::{CandidatePath, CanonKind, CanonLevel, RiskLevel, Severity, TenantId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};

/// Idempotency key used when a request supplies none.
pub const NO_IDEMPOTENCY_KEY: &str = "none";

/// Authenticated principal a request runs as.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Caller {
    pub tenant_id: TenantId,
    pub subject: String,
    pub scopes: BTreeSet<String>,
}

impl Caller {
    pub fn new(tenant_id: TenantId, subject: impl Into<String>) -> Self {
        Self {
            tenant_id,
            subject: subject.into(),
            scopes: BTreeSet::new(),
        }
    }

    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes.extend(scopes.into_iter().map(Into::into));
        self
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.contains(scope)
    }

    /// The tenant a request acts for. A body-level tenant must match the caller.
    pub fn tenant_for(&self, context: Option<&RequestContext>) -> ServiceResult<TenantId> {
        match context.and_then(|c| c.tenant_id.as_deref()) {
            Some(requested) if requested != self.tenant_id.as_str() => {
                Err(ServiceError::TenantMismatch {
                    caller: self.tenant_id.to_string(),
                    requested: requested.to_string(),
                })
            }
            _ => Ok(self.tenant_id.clone()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CanonRefKind {
    Invariant,
    Constraint,
    Definition,
    Policy,
    Model,
}

/// A canon item a request cites as authority.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonRef {
    pub kind: CanonRefKind,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorType {
    Human,
    Agent,
    System,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    #[serde(rename = "type")]
    pub actor_type: ActorType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Staging,
    Prod,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<Actor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<Environment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inputs: Option<Value>,
}

fn require(field: &str, value: &str) -> ServiceResult<()> {
    if value.trim().is_empty() {
        return Err(ServiceError::Validation(format!("{field} must not be empty")));
    }
    Ok(())
}

/// Reject the first id that appears twice.
fn require_unique<'a>(field: &str, ids: impl IntoIterator<Item = &'a str>) -> ServiceResult<()> {
    let mut seen = BTreeSet::new();
    for id in ids {
        if !seen.insert(id) {
            return Err(ServiceError::Validation(format!("duplicate {field}: {id}")));
        }
    }
    Ok(())
}

fn validate_refs(refs: &[CanonRef]) -> ServiceResult<()> {
    for (idx, r) in refs.iter().enumerate() {
        require(&format!("canonRefs[{idx}].id"), &r.id)?;
    }
    Ok(())
}

pub(crate) fn cited_ids(refs: &[CanonRef]) -> BTreeSet<String> {
    refs.iter().map(|r| r.id.clone()).collect()
}

// ============ Decide ============

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    #[serde(rename = "type")]
    pub target_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Intent {
    pub objective: String,
    pub proposed_action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<Target>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecideRequest {
    pub action_id: String,
    pub intent: Intent,
    pub canon_refs: Vec<CanonRef>,
    /// Alternative paths to score. Without them the action itself is the
    /// only candidate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidates: Option<Vec<CandidatePath>>,
    /// Caller-supplied scoring features by candidate id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub features: Option<HashMap<String, CandidateFeatures>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_level: Option<RiskLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<RequestContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

impl DecideRequest {
    pub fn validate(&self) -> ServiceResult<()> {
        require("actionId", &self.action_id)?;
        require("intent.objective", &self.intent.objective)?;
        require("intent.proposedAction", &self.intent.proposed_action)?;
        validate_refs(&self.canon_refs)?;
        if let Some(candidates) = &self.candidates {
            if candidates.is_empty() {
                return Err(ServiceError::Validation(
                    "candidates must not be empty when present".into(),
                ));
            }
            for c in candidates {
                require("candidates[].id", &c.id)?;
                if c.actions.is_empty() {
                    return Err(ServiceError::Validation(format!(
                        "candidate {} has no actions",
                        c.id
                    )));
                }
            }
            require_unique("candidates[].id", candidates.iter().map(|c| c.id.as_str()))?;
        }
        Ok(())
    }
}

// ============ Promote ============

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionCandidate {
    pub kind: CanonKind,
    pub id: String,
    pub title: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Level the caller believes the item is at.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<CanonLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<CanonLevel>,
    /// Formal expression, invariants only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formal: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvenanceInput {
    pub source: String,
    pub author: String,
    pub created_at: DateTime<Utc>,
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence_artifact_hashes: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateCheck {
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence_ids: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionGateInput {
    pub resistance: GateCheck,
    pub reproducibility: GateCheck,
    pub invariant_safety: GateCheck,
    pub feasibility_impact: GateCheck,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromoteRequest {
    pub candidate: PromotionCandidate,
    pub provenance: ProvenanceInput,
    pub gate: PromotionGateInput,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<RequestContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

impl PromoteRequest {
    pub fn validate(&self) -> ServiceResult<()> {
        require("candidate.id", &self.candidate.id)?;
        require("candidate.title", &self.candidate.title)?;
        require("candidate.content", &self.candidate.content)?;
        require("provenance.source", &self.provenance.source)?;
        require("provenance.author", &self.provenance.author)?;
        if let (Some(from), Some(to)) = (self.candidate.from, self.candidate.to) {
            canon_promotion::validate_promotion_path(from, to)?;
        }
        Ok(())
    }
}

// ============ Non-interference ============

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proposer {
    pub agent_id: String,
    #[serde(default)]
    pub goal: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposedAction {
    pub action_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub resources_used: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub shared_state_modified: BTreeSet<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NonInterferenceRequest {
    pub proposer: Proposer,
    pub action: ProposedAction,
    pub others: Vec<AgentProfile>,
    pub canon_refs: Vec<CanonRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<RequestContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

impl NonInterferenceRequest {
    pub fn validate(&self) -> ServiceResult<()> {
        require("proposer.agentId", &self.proposer.agent_id)?;
        require("action.actionId", &self.action.action_id)?;
        validate_refs(&self.canon_refs)?;
        for other in &self.others {
            require("others[].agentId", &other.agent_id)?;
        }
        require_unique(
            "others[].agentId",
            self.others.iter().map(|o| o.agent_id.as_str()),
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn body_tenant_must_match_caller() {
        let caller = Caller::new(TenantId::new("acme"), "svc");
        let ok = RequestContext {
            tenant_id: Some("acme".into()),
            ..Default::default()
        };
        let other = RequestContext {
            tenant_id: Some("globex".into()),
            ..Default::default()
        };
        assert_eq!(caller.tenant_for(Some(&ok)).unwrap(), TenantId::new("acme"));
        assert_eq!(caller.tenant_for(None).unwrap(), TenantId::new("acme"));
        assert!(matches!(
            caller.tenant_for(Some(&other)),
            Err(ServiceError::TenantMismatch { .. })
        ));
    }

    #[test]
    fn decide_request_parses_wire_shape() {
        let request: DecideRequest = serde_json::from_value(json!({
            "actionId": "deploy",
            "intent": {"objective": "ship", "proposedAction": "deploy v2"},
            "canonRefs": [{"kind": "invariant", "id": "INV_TS_MANDATORY"}],
            "context": {"environment": "prod", "actor": {"type": "agent", "id": "a1"}}
        }))
        .unwrap();
        assert_eq!(request.canon_refs[0].kind, CanonRefKind::Invariant);
        request.validate().unwrap();
    }

    #[test]
    fn explicit_level_skip_is_rejected_up_front() {
        let request: PromoteRequest = serde_json::from_value(json!({
            "candidate": {"kind": "DEFINITION", "id": "c1", "title": "T", "content": "x",
                          "from": "EVIDENCE", "to": "CANON"},
            "provenance": {"source": "lab", "author": "kim", "createdAt": "2026-01-01T00:00:00Z"},
            "gate": {
                "resistance": {"passed": true},
                "reproducibility": {"passed": true},
                "invariantSafety": {"passed": true},
                "feasibilityImpact": {"passed": true}
            }
        }))
        .unwrap();
        assert!(matches!(request.validate(), Err(ServiceError::Validation(_))));
    }

    #[test]
    fn repeated_candidate_ids_are_rejected() {
        let request: DecideRequest = serde_json::from_value(json!({
            "actionId": "deploy",
            "intent": {"objective": "ship", "proposedAction": "deploy v2"},
            "canonRefs": [],
            "candidates": [
                {"id": "p", "actions": [{"id": "a1", "name": "deploy", "prerequisitesCanonIds": ["X"]}]},
                {"id": "p", "actions": [{"id": "a2", "name": "deploy"}]}
            ]
        }))
        .unwrap();
        let err = request.validate().unwrap_err();
        assert!(matches!(&err, ServiceError::Validation(msg) if msg.contains("candidates[].id")));
    }

    #[test]
    fn repeated_other_agents_are_rejected() {
        let request: NonInterferenceRequest = serde_json::from_value(json!({
            "proposer": {"agentId": "a"},
            "action": {"actionId": "deploy"},
            "others": [
                {"agentId": "b", "baselineExpectedTTV": 1000.0, "predictedExpectedTTV": 1300.0},
                {"agentId": "b", "baselineExpectedTTV": 1000.0, "predictedExpectedTTV": 990.0}
            ],
            "canonRefs": []
        }))
        .unwrap();
        let err = request.validate().unwrap_err();
        assert!(matches!(&err, ServiceError::Validation(msg) if msg.contains("others[].agentId")));
    }
}
