use crate::CanonStoreResult;
use async_trait::async_trait;
use canon_types::{CanonItem, CanonLevel, CanonSnapshot, PromotionDecision};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One recorded change to the canon.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonRevision {
    pub version: u64,
    pub item_id: String,
    /// `None` when the item entered the store with this revision.
    pub from: Option<CanonLevel>,
    pub to: CanonLevel,
    pub ts: DateTime<Utc>,
}

/// Versioned canon storage.
#[async_trait]
pub trait CanonStore: Send + Sync {
    /// Consistent view of every item at the current version.
    async fn snapshot(&self) -> CanonStoreResult<CanonSnapshot>;

    async fn get(&self, id: &str) -> CanonStoreResult<Option<CanonItem>>;

    /// Current store version.
    async fn version(&self) -> CanonStoreResult<u64>;

    /// Admit a new EVIDENCE-level item. Returns the new store version.
    async fn submit_evidence(&self, item: CanonItem) -> CanonStoreResult<u64>;

    /// Advance an existing item exactly one level under an approved decision.
    async fn apply_promotion(&self, decision: &PromotionDecision) -> CanonStoreResult<CanonItem>;

    /// Revisions for one item, oldest first.
    async fn history(&self, id: &str) -> CanonStoreResult<Vec<CanonRevision>>;
}
