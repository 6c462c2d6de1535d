//! Canon items: the versioned body of approved knowledge.

use crate::envelope::ConfidenceEnvelope;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Promotion level. Knowledge only moves up, one level at a time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CanonLevel {
    Evidence,
    Proposed,
    Canon,
}

impl CanonLevel {
    /// The level directly above this one, if any.
    pub fn next(self) -> Option<CanonLevel> {
        match self {
            CanonLevel::Evidence => Some(CanonLevel::Proposed),
            CanonLevel::Proposed => Some(CanonLevel::Canon),
            CanonLevel::Canon => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CanonLevel::Evidence => "EVIDENCE",
            CanonLevel::Proposed => "PROPOSED",
            CanonLevel::Canon => "CANON",
        }
    }
}

impl std::fmt::Display for CanonLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CanonKind {
    Definition,
    Invariant,
    Constraint,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    HardFail,
    SoftFail,
}

/// Where a canon item came from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Provenance {
    pub source: String,
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

impl Provenance {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            reference: None,
            author: None,
            hash: None,
        }
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    /// A provenance record with a blank source carries no authority.
    pub fn is_complete(&self) -> bool {
        !self.source.trim().is_empty()
    }
}

/// Kind-specific content of a canon item.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CanonBody {
    Definition {
        term: String,
        text: String,
    },
    Invariant {
        statement: String,
        formal: String,
        severity: Severity,
    },
    Constraint {
        #[serde(rename = "appliesTo")]
        applies_to: Vec<String>,
        rule: String,
    },
}

impl CanonBody {
    pub fn kind(&self) -> CanonKind {
        match self {
            CanonBody::Definition { .. } => CanonKind::Definition,
            CanonBody::Invariant { .. } => CanonKind::Invariant,
            CanonBody::Constraint { .. } => CanonKind::Constraint,
        }
    }
}

/// One item of canon knowledge.
///
/// `timestamp` and `provenance` are optional at the type level so that an
/// incomplete record can be represented and rejected; such an item never
/// exerts authority (see [`CanonItem::has_authority_metadata`]).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonItem {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub provenance: Option<Provenance>,
    pub level: CanonLevel,
    pub body: CanonBody,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<ConfidenceEnvelope>,
}

impl CanonItem {
    /// A fresh EVIDENCE-level item without timestamp or provenance.
    pub fn new(id: impl Into<String>, title: impl Into<String>, body: CanonBody) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            timestamp: None,
            provenance: None,
            level: CanonLevel::Evidence,
            body,
            confidence: None,
        }
    }

    pub fn with_timestamp(mut self, ts: DateTime<Utc>) -> Self {
        self.timestamp = Some(ts);
        self
    }

    pub fn with_provenance(mut self, provenance: Provenance) -> Self {
        self.provenance = Some(provenance);
        self
    }

    pub fn with_level(mut self, level: CanonLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_confidence(mut self, confidence: ConfidenceEnvelope) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn kind(&self) -> CanonKind {
        self.body.kind()
    }

    /// Timestamp present and provenance present with a non-blank source.
    pub fn has_authority_metadata(&self) -> bool {
        self.timestamp.is_some() && self.provenance.as_ref().is_some_and(Provenance::is_complete)
    }

    /// CANON level with complete authority metadata.
    pub fn is_authoritative(&self) -> bool {
        self.level == CanonLevel::Canon && self.has_authority_metadata()
    }
}

/// Immutable view of the canon store at one version.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonSnapshot {
    pub version: u64,
    pub items: BTreeMap<String, CanonItem>,
}

impl CanonSnapshot {
    pub fn new(version: u64, items: impl IntoIterator<Item = CanonItem>) -> Self {
        Self {
            version,
            items: items.into_iter().map(|i| (i.id.clone(), i)).collect(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&CanonItem> {
        self.items.get(id)
    }

    /// Human-readable version label, e.g. `canon-v3`.
    pub fn version_label(&self) -> String {
        format!("canon-v{}", self.version)
    }

    /// Ids of every item that can exert authority.
    pub fn authoritative_ids(&self) -> BTreeSet<String> {
        self.items
            .values()
            .filter(|i| i.is_authoritative())
            .map(|i| i.id.clone())
            .collect()
    }

    pub fn is_authoritative(&self, id: &str) -> bool {
        self.items.get(id).is_some_and(CanonItem::is_authoritative)
    }

    /// Authoritative invariant items, in id order.
    pub fn invariants(&self) -> impl Iterator<Item = &CanonItem> {
        self.items
            .values()
            .filter(|i| i.kind() == CanonKind::Invariant && i.is_authoritative())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition(id: &str) -> CanonItem {
        CanonItem::new(
            id,
            "Term",
            CanonBody::Definition {
                term: "ttv".into(),
                text: "time to value".into(),
            },
        )
    }

    #[test]
    fn level_advances_one_step() {
        assert_eq!(CanonLevel::Evidence.next(), Some(CanonLevel::Proposed));
        assert_eq!(CanonLevel::Proposed.next(), Some(CanonLevel::Canon));
        assert_eq!(CanonLevel::Canon.next(), None);
        assert!(CanonLevel::Evidence < CanonLevel::Canon);
    }

    #[test]
    fn authority_requires_timestamp_and_provenance() {
        let bare = definition("D1").with_level(CanonLevel::Canon);
        assert!(!bare.is_authoritative());

        let no_source = bare
            .clone()
            .with_timestamp(Utc::now())
            .with_provenance(Provenance::new("  "));
        assert!(!no_source.is_authoritative());

        let full = bare
            .with_timestamp(Utc::now())
            .with_provenance(Provenance::new("repo").with_author("ops"));
        assert!(full.is_authoritative());
    }

    #[test]
    fn body_serializes_with_kind_tag() {
        let item = definition("D1");
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["body"]["kind"], "DEFINITION");
        assert_eq!(json["level"], "EVIDENCE");

        let back: CanonItem = serde_json::from_value(json).unwrap();
        assert_eq!(back, item);
    }

    #[test]
    fn snapshot_filters_authoritative_ids() {
        let ts = Utc::now();
        let snap = CanonSnapshot::new(
            2,
            vec![
                definition("A")
                    .with_level(CanonLevel::Canon)
                    .with_timestamp(ts)
                    .with_provenance(Provenance::new("repo")),
                definition("B").with_level(CanonLevel::Proposed),
            ],
        );
        assert_eq!(snap.version_label(), "canon-v2");
        assert!(snap.is_authoritative("A"));
        assert!(!snap.is_authoritative("B"));
        assert_eq!(snap.authoritative_ids().len(), 1);
    }
}
