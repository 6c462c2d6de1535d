use canon_types::{canonical_hash, TenantId, TypesResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerEventType {
    DecisionRequested,
    DecisionAllowed,
    DecisionDenied,
}

impl LedgerEventType {
    pub fn as_str(self) -> &'static str {
        match self {
            LedgerEventType::DecisionRequested => "DECISION_REQUESTED",
            LedgerEventType::DecisionAllowed => "DECISION_ALLOWED",
            LedgerEventType::DecisionDenied => "DECISION_DENIED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "DECISION_REQUESTED" => Some(LedgerEventType::DecisionRequested),
            "DECISION_ALLOWED" => Some(LedgerEventType::DecisionAllowed),
            "DECISION_DENIED" => Some(LedgerEventType::DecisionDenied),
            _ => None,
        }
    }
}

impl std::fmt::Display for LedgerEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tail of one chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerHead {
    pub seq: u64,
    pub hash: String,
}

/// One immutable link in a pointer's hash chain.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEvent {
    pub id: String,
    pub ts: DateTime<Utc>,
    pub tenant_id: TenantId,
    pub action_id: String,
    pub stable_key: String,
    pub pointer: String,
    #[serde(rename = "type")]
    pub event_type: LedgerEventType,
    #[serde(default)]
    pub decision_id: Option<String>,
    pub seq: u64,
    #[serde(default)]
    pub prev_hash: Option<String>,
    pub hash: String,
    pub payload: Value,
}

impl LedgerEvent {
    /// The value that is hashed: `{pointer, seq, ts, prevHash, payload}`
    /// where `payload` wraps every other stored field.
    pub fn chain_material(&self) -> Value {
        json!({
            "pointer": self.pointer,
            "seq": self.seq,
            "ts": self.ts,
            "prevHash": self.prev_hash,
            "payload": {
                "id": self.id,
                "tenantId": self.tenant_id,
                "actionId": self.action_id,
                "stableKey": self.stable_key,
                "type": self.event_type,
                "decisionId": self.decision_id,
                "data": self.payload,
            },
        })
    }

    pub fn compute_hash(&self) -> TypesResult<String> {
        canonical_hash(&self.chain_material())
    }

    pub fn head(&self) -> LedgerHead {
        LedgerHead {
            seq: self.seq,
            hash: self.hash.clone(),
        }
    }
}

/// An event before it has a place in the chain.
#[derive(Clone, Debug, PartialEq)]
pub struct EventDraft {
    pub ts: DateTime<Utc>,
    pub tenant_id: TenantId,
    pub action_id: String,
    pub stable_key: String,
    pub pointer: String,
    pub event_type: LedgerEventType,
    pub decision_id: Option<String>,
    pub payload: Value,
}

impl EventDraft {
    /// Link this draft after `head` (or as seq 1) and compute its hash.
    pub fn seal(&self, id: String, head: Option<&LedgerHead>) -> TypesResult<LedgerEvent> {
        let mut event = LedgerEvent {
            id,
            ts: self.ts,
            tenant_id: self.tenant_id.clone(),
            action_id: self.action_id.clone(),
            stable_key: self.stable_key.clone(),
            pointer: self.pointer.clone(),
            event_type: self.event_type,
            decision_id: self.decision_id.clone(),
            seq: head.map_or(1, |h| h.seq + 1),
            prev_hash: head.map(|h| h.hash.clone()),
            hash: String::new(),
            payload: self.payload.clone(),
        };
        event.hash = event.compute_hash()?;
        Ok(event)
    }
}

/// Summary row served by the recent-activity feed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentItem {
    pub pointer: String,
    pub ts: DateTime<Utc>,
    #[serde(rename = "type")]
    pub event_type: LedgerEventType,
    pub action_id: String,
    #[serde(default)]
    pub decision_id: Option<String>,
}

impl From<&LedgerEvent> for RecentItem {
    fn from(event: &LedgerEvent) -> Self {
        Self {
            pointer: event.pointer.clone(),
            ts: event.ts,
            event_type: event.event_type,
            action_id: event.action_id.clone(),
            decision_id: event.decision_id.clone(),
        }
    }
}
