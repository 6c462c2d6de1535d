//! In-memory implementations of both ledger stores.
//!
//! Deterministic and test-friendly. Production deployments back the durable
//! side with PostgreSQL.

use crate::error::{LedgerError, LedgerResult};
use crate::model::{LedgerEvent, LedgerHead};
use crate::traits::{CacheStore, LedgerStore};
use async_trait::async_trait;
use canon_types::TenantId;
use canon_whynot::DenialRecord;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// In-memory durable archive.
#[derive(Default)]
pub struct InMemoryLedgerStore {
    chains: RwLock<BTreeMap<String, Vec<LedgerEvent>>>,
    /// Global insertion order, used for the recent feed.
    order: RwLock<Vec<(String, u64)>>,
    denials: RwLock<HashMap<String, DenialRecord>>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn append(&self, event: &LedgerEvent) -> LedgerResult<()> {
        let mut chains = self
            .chains
            .write()
            .map_err(|_| LedgerError::Backend("chains lock poisoned".to_string()))?;
        let chain = chains.entry(event.pointer.clone()).or_default();

        let tail = chain.last();
        let expected_seq = tail.map_or(1, |e| e.seq + 1);
        if event.seq != expected_seq {
            return Err(LedgerError::Conflict(format!(
                "{} seq {} already taken or out of order (next is {expected_seq})",
                event.pointer, event.seq
            )));
        }
        if event.prev_hash.as_deref() != tail.map(|e| e.hash.as_str()) {
            return Err(LedgerError::Conflict(format!(
                "{} seq {} does not link to the current tail",
                event.pointer, event.seq
            )));
        }

        chain.push(event.clone());
        self.order
            .write()
            .map_err(|_| LedgerError::Backend("order lock poisoned".to_string()))?
            .push((event.pointer.clone(), event.seq));
        Ok(())
    }

    async fn tail(&self, pointer: &str) -> LedgerResult<Option<LedgerHead>> {
        let chains = self
            .chains
            .read()
            .map_err(|_| LedgerError::Backend("chains lock poisoned".to_string()))?;
        Ok(chains
            .get(pointer)
            .and_then(|chain| chain.last())
            .map(LedgerEvent::head))
    }

    async fn events(&self, pointer: &str) -> LedgerResult<Vec<LedgerEvent>> {
        let chains = self
            .chains
            .read()
            .map_err(|_| LedgerError::Backend("chains lock poisoned".to_string()))?;
        Ok(chains.get(pointer).cloned().unwrap_or_default())
    }

    async fn recent(&self, tenant: &TenantId, limit: usize) -> LedgerResult<Vec<LedgerEvent>> {
        let chains = self
            .chains
            .read()
            .map_err(|_| LedgerError::Backend("chains lock poisoned".to_string()))?;
        let order = self
            .order
            .read()
            .map_err(|_| LedgerError::Backend("order lock poisoned".to_string()))?;

        Ok(order
            .iter()
            .rev()
            .filter_map(|(pointer, seq)| {
                chains
                    .get(pointer)
                    .and_then(|chain| chain.get((*seq as usize).checked_sub(1)?))
            })
            .filter(|event| &event.tenant_id == tenant)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn pointers(&self) -> LedgerResult<Vec<(TenantId, String)>> {
        let chains = self
            .chains
            .read()
            .map_err(|_| LedgerError::Backend("chains lock poisoned".to_string()))?;
        Ok(chains
            .iter()
            .filter_map(|(pointer, chain)| {
                chain
                    .first()
                    .map(|e| (e.tenant_id.clone(), pointer.clone()))
            })
            .collect())
    }

    async fn put_denial(&self, record: &DenialRecord) -> LedgerResult<()> {
        let mut denials = self
            .denials
            .write()
            .map_err(|_| LedgerError::Backend("denials lock poisoned".to_string()))?;
        // Same id means same stable key, so a rewrite carries identical content.
        denials.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn get_denial(&self, why_not_id: &str) -> LedgerResult<Option<DenialRecord>> {
        let denials = self
            .denials
            .read()
            .map_err(|_| LedgerError::Backend("denials lock poisoned".to_string()))?;
        Ok(denials.get(why_not_id).cloned())
    }

    async fn ping(&self) -> LedgerResult<()> {
        Ok(())
    }
}

#[derive(Clone, Debug)]
enum CacheValue {
    Text(String),
    List(VecDeque<String>),
}

#[derive(Clone, Debug)]
struct CacheEntry {
    value: CacheValue,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn new(value: CacheValue, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// In-memory fast store with lazy TTL expiry.
#[derive(Default)]
pub struct InMemoryCacheStore {
    entries: DashMap<String, CacheEntry>,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every expired entry. Reads already ignore them.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_live(now));
        before - self.entries.len()
    }

    fn live(&self, key: &str) -> Option<CacheEntry> {
        let now = Instant::now();
        let entry = self.entries.get(key)?.clone();
        if entry.is_live(now) {
            Some(entry)
        } else {
            self.entries.remove_if(key, |_, e| !e.is_live(now));
            None
        }
    }
}

fn wrong_type(key: &str) -> LedgerError {
    LedgerError::Backend(format!("key {key} holds a value of another type"))
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn get(&self, key: &str) -> LedgerResult<Option<String>> {
        match self.live(key) {
            None => Ok(None),
            Some(CacheEntry {
                value: CacheValue::Text(text),
                ..
            }) => Ok(Some(text)),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> LedgerResult<()> {
        self.entries
            .insert(key.to_string(), CacheEntry::new(CacheValue::Text(value), ttl));
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        value: String,
        ttl: Option<Duration>,
    ) -> LedgerResult<bool> {
        let now = Instant::now();
        let fresh = CacheEntry::new(CacheValue::Text(value), ttl);
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let current = occupied.get();
                let current = if current.is_live(now) {
                    match &current.value {
                        CacheValue::Text(text) => Some(text.as_str()),
                        CacheValue::List(_) => return Err(wrong_type(key)),
                    }
                } else {
                    None
                };
                if current != expected {
                    return Ok(false);
                }
                occupied.insert(fresh);
                Ok(true)
            }
            Entry::Vacant(vacant) => {
                if expected.is_some() {
                    return Ok(false);
                }
                vacant.insert(fresh);
                Ok(true)
            }
        }
    }

    async fn delete(&self, key: &str) -> LedgerResult<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn push(
        &self,
        key: &str,
        value: String,
        max_len: Option<usize>,
        ttl: Option<Duration>,
    ) -> LedgerResult<()> {
        let now = Instant::now();
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| CacheEntry::new(CacheValue::List(VecDeque::new()), ttl));
        if !entry.is_live(now) {
            *entry = CacheEntry::new(CacheValue::List(VecDeque::new()), ttl);
        }
        let CacheValue::List(list) = &mut entry.value else {
            return Err(wrong_type(key));
        };
        list.push_back(value);
        if let Some(max) = max_len {
            while list.len() > max {
                list.pop_front();
            }
        }
        entry.expires_at = ttl.map(|ttl| now + ttl);
        Ok(())
    }

    async fn list(&self, key: &str) -> LedgerResult<Vec<String>> {
        match self.live(key) {
            None => Ok(Vec::new()),
            Some(CacheEntry {
                value: CacheValue::List(list),
                ..
            }) => Ok(list.into_iter().collect()),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn ping(&self) -> LedgerResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EventDraft, LedgerEventType};
    use chrono::Utc;
    use serde_json::json;

    fn draft(tenant: &str, pointer: &str) -> EventDraft {
        EventDraft {
            ts: Utc::now(),
            tenant_id: TenantId::new(tenant),
            action_id: "a1".into(),
            stable_key: "k".into(),
            pointer: pointer.into(),
            event_type: LedgerEventType::DecisionRequested,
            decision_id: None,
            payload: json!({}),
        }
    }

    #[tokio::test]
    async fn durable_append_enforces_chain_order() {
        let store = InMemoryLedgerStore::new();
        let first = draft("t", "p").seal("e1".into(), None).unwrap();
        store.append(&first).await.unwrap();

        let duplicate = draft("t", "p").seal("e2".into(), None).unwrap();
        assert!(matches!(
            store.append(&duplicate).await,
            Err(LedgerError::Conflict(_))
        ));

        let second = draft("t", "p").seal("e3".into(), Some(&first.head())).unwrap();
        store.append(&second).await.unwrap();
        assert_eq!(store.tail("p").await.unwrap(), Some(second.head()));
        assert_eq!(store.events("p").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn durable_recent_is_tenant_scoped_and_newest_first() {
        let store = InMemoryLedgerStore::new();
        let a = draft("a", "p1").seal("e1".into(), None).unwrap();
        let b = draft("b", "p2").seal("e2".into(), None).unwrap();
        let a2 = draft("a", "p1").seal("e3".into(), Some(&a.head())).unwrap();
        for e in [&a, &b, &a2] {
            store.append(e).await.unwrap();
        }

        let recent = store.recent(&TenantId::new("a"), 10).await.unwrap();
        let ids: Vec<_> = recent.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["e3", "e1"]);
    }

    #[tokio::test]
    async fn cas_only_swaps_on_expected_value() {
        let cache = InMemoryCacheStore::new();
        assert!(cache.compare_and_swap("k", None, "1".into(), None).await.unwrap());
        assert!(!cache.compare_and_swap("k", None, "2".into(), None).await.unwrap());
        assert!(!cache
            .compare_and_swap("k", Some("0"), "2".into(), None)
            .await
            .unwrap());
        assert!(cache
            .compare_and_swap("k", Some("1"), "2".into(), None)
            .await
            .unwrap());
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn expired_entries_read_as_absent() {
        let cache = InMemoryCacheStore::new();
        cache
            .set("k", "v".into(), Some(Duration::from_millis(1)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(cache.compare_and_swap("k", None, "w".into(), None).await.unwrap());
    }

    #[tokio::test]
    async fn push_trims_oldest() {
        let cache = InMemoryCacheStore::new();
        for i in 0..5 {
            cache.push("l", i.to_string(), Some(3), None).await.unwrap();
        }
        assert_eq!(cache.list("l").await.unwrap(), vec!["2", "3", "4"]);
        assert!(cache.list("missing").await.unwrap().is_empty());
    }
}
