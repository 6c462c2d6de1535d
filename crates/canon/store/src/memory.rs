//! In-memory canon store.

use crate::traits::{CanonRevision, CanonStore};
use crate::{CanonStoreError, CanonStoreResult};
use async_trait::async_trait;
use canon_types::{CanonItem, CanonLevel, CanonSnapshot, PromotionDecision};
use std::collections::BTreeMap;
use std::sync::RwLock;
use tracing::info;

#[derive(Default)]
struct Inner {
    version: u64,
    items: BTreeMap<String, CanonItem>,
    revisions: Vec<CanonRevision>,
}

/// RwLock-guarded canon store. A single lock covers items and version so
/// snapshots are always internally consistent.
#[derive(Default)]
pub struct InMemoryCanonStore {
    inner: RwLock<Inner>,
}

impl InMemoryCanonStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with a genesis set (version 0).
    ///
    /// Genesis is the only path by which an item can enter above EVIDENCE;
    /// every genesis item must carry timestamp and provenance.
    pub fn with_genesis(items: impl IntoIterator<Item = CanonItem>) -> CanonStoreResult<Self> {
        let mut inner = Inner::default();
        for item in items {
            if !item.has_authority_metadata() {
                return Err(CanonStoreError::InvalidInput(format!(
                    "genesis item {} lacks timestamp or provenance",
                    item.id
                )));
            }
            if inner.items.contains_key(&item.id) {
                return Err(CanonStoreError::Conflict(format!(
                    "duplicate genesis item {}",
                    item.id
                )));
            }
            if let Some(ts) = item.timestamp {
                inner.revisions.push(CanonRevision {
                    version: 0,
                    item_id: item.id.clone(),
                    from: None,
                    to: item.level,
                    ts,
                });
            }
            inner.items.insert(item.id.clone(), item);
        }
        Ok(Self {
            inner: RwLock::new(inner),
        })
    }
}

fn poisoned() -> CanonStoreError {
    CanonStoreError::Backend("canon lock poisoned".to_string())
}

#[async_trait]
impl CanonStore for InMemoryCanonStore {
    async fn snapshot(&self) -> CanonStoreResult<CanonSnapshot> {
        let guard = self.inner.read().map_err(|_| poisoned())?;
        Ok(CanonSnapshot {
            version: guard.version,
            items: guard.items.clone(),
        })
    }

    async fn get(&self, id: &str) -> CanonStoreResult<Option<CanonItem>> {
        let guard = self.inner.read().map_err(|_| poisoned())?;
        Ok(guard.items.get(id).cloned())
    }

    async fn version(&self) -> CanonStoreResult<u64> {
        let guard = self.inner.read().map_err(|_| poisoned())?;
        Ok(guard.version)
    }

    async fn submit_evidence(&self, item: CanonItem) -> CanonStoreResult<u64> {
        if item.level != CanonLevel::Evidence {
            return Err(CanonStoreError::InvariantViolation(format!(
                "item {} must enter as EVIDENCE, found {}",
                item.id, item.level
            )));
        }
        let Some(ts) = item.timestamp.filter(|_| item.has_authority_metadata()) else {
            return Err(CanonStoreError::InvalidInput(format!(
                "item {} lacks timestamp or provenance",
                item.id
            )));
        };

        let mut guard = self.inner.write().map_err(|_| poisoned())?;
        if guard.items.contains_key(&item.id) {
            return Err(CanonStoreError::Conflict(format!(
                "canon item {} already exists",
                item.id
            )));
        }

        guard.version += 1;
        let version = guard.version;
        guard.revisions.push(CanonRevision {
            version,
            item_id: item.id.clone(),
            from: None,
            to: CanonLevel::Evidence,
            ts,
        });
        info!(item_id = %item.id, version, "evidence admitted");
        guard.items.insert(item.id.clone(), item);
        Ok(version)
    }

    async fn apply_promotion(&self, decision: &PromotionDecision) -> CanonStoreResult<CanonItem> {
        if !decision.approved {
            return Err(CanonStoreError::InvariantViolation(format!(
                "promotion of {} was not approved",
                decision.item_id
            )));
        }
        if decision.from.next() != Some(decision.to) {
            return Err(CanonStoreError::InvariantViolation(format!(
                "promotion {} -> {} must advance exactly one level",
                decision.from, decision.to
            )));
        }

        let mut guard = self.inner.write().map_err(|_| poisoned())?;
        let item = guard
            .items
            .get_mut(&decision.item_id)
            .ok_or_else(|| CanonStoreError::NotFound(decision.item_id.clone()))?;
        if item.level != decision.from {
            return Err(CanonStoreError::Conflict(format!(
                "item {} is at {}, decision expected {}",
                decision.item_id, item.level, decision.from
            )));
        }
        if !item.has_authority_metadata() {
            return Err(CanonStoreError::InvariantViolation(format!(
                "item {} lacks timestamp or provenance",
                decision.item_id
            )));
        }

        item.level = decision.to;
        let promoted = item.clone();
        guard.version += 1;
        let version = guard.version;
        guard.revisions.push(CanonRevision {
            version,
            item_id: decision.item_id.clone(),
            from: Some(decision.from),
            to: decision.to,
            ts: decision.ts,
        });
        info!(
            item_id = %decision.item_id,
            from = %decision.from,
            to = %decision.to,
            version,
            "canon item promoted"
        );
        Ok(promoted)
    }

    async fn history(&self, id: &str) -> CanonStoreResult<Vec<CanonRevision>> {
        let guard = self.inner.read().map_err(|_| poisoned())?;
        Ok(guard
            .revisions
            .iter()
            .filter(|r| r.item_id == id)
            .cloned()
            .collect())
    }
}
