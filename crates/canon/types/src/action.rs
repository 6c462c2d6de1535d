use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// Numeric risk used by the default feature extractor.
    pub fn weight(self) -> f64 {
        match self {
            RiskLevel::Low => 0.1,
            RiskLevel::Medium => 0.5,
            RiskLevel::High => 0.9,
        }
    }
}

/// A proposed unit of work. Immutable once referenced by a ledger event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub prerequisites_canon_ids: BTreeSet<String>,
    #[serde(default)]
    pub risk_level: RiskLevel,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub resources_used: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub shared_state_modified: BTreeSet<String>,
}

impl Action {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            prerequisites_canon_ids: BTreeSet::new(),
            risk_level: RiskLevel::Low,
            resources_used: BTreeSet::new(),
            shared_state_modified: BTreeSet::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_prerequisites<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.prerequisites_canon_ids
            .extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn with_risk(mut self, risk: RiskLevel) -> Self {
        self.risk_level = risk;
        self
    }

    pub fn with_resources<I, S>(mut self, resources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.resources_used
            .extend(resources.into_iter().map(Into::into));
        self
    }

    pub fn with_shared_state<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.shared_state_modified
            .extend(keys.into_iter().map(Into::into));
        self
    }
}

/// An ordered plan of actions competing for admission.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidatePath {
    pub id: String,
    pub actions: Vec<Action>,
}

impl CandidatePath {
    pub fn new(id: impl Into<String>, actions: Vec<Action>) -> Self {
        Self {
            id: id.into(),
            actions,
        }
    }

    /// The action that would execute first if this path is admitted.
    pub fn next_action(&self) -> Option<&Action> {
        self.actions.first()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prerequisites_are_deduplicated_and_sorted() {
        let action = Action::new("a1", "deploy").with_prerequisites(["Z", "A", "Z"]);
        let ids: Vec<_> = action.prerequisites_canon_ids.iter().cloned().collect();
        assert_eq!(ids, vec!["A".to_string(), "Z".to_string()]);
    }

    #[test]
    fn empty_sets_are_omitted_on_the_wire() {
        let json = serde_json::to_value(Action::new("a1", "deploy")).unwrap();
        assert!(json.get("resourcesUsed").is_none());
        assert_eq!(json["riskLevel"], "LOW");
    }
}
