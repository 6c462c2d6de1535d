use crate::error::{LedgerResult, StoreKind};
use crate::keys::CacheKeys;
use crate::traits::CacheStore;
use crate::LedgerError;
use canon_types::TenantId;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_IDEMPOTENCY_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Decision surface an idempotency entry belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IdempotencyKind {
    Decide,
    Promote,
    NonInterference,
}

impl IdempotencyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            IdempotencyKind::Decide => "decide",
            IdempotencyKind::Promote => "promote",
            IdempotencyKind::NonInterference => "ni",
        }
    }
}

/// Response cache keyed by stable key. Entries hold the exact serialized
/// response so a replay is byte-identical.
#[derive(Clone)]
pub struct IdempotencyCache {
    store: Arc<dyn CacheStore>,
    keys: CacheKeys,
    ttl: Duration,
    timeout: Duration,
}

impl IdempotencyCache {
    pub fn new(store: Arc<dyn CacheStore>, keys: CacheKeys, ttl: Duration, timeout: Duration) -> Self {
        Self {
            store,
            keys,
            ttl,
            timeout,
        }
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        fut: impl std::future::Future<Output = LedgerResult<T>>,
    ) -> LedgerResult<T> {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| LedgerError::Unavailable {
                store: StoreKind::Fast,
                operation,
            })?
    }

    pub async fn get(
        &self,
        tenant: &TenantId,
        kind: IdempotencyKind,
        stable_key: &str,
    ) -> LedgerResult<Option<String>> {
        let key = self.keys.idempotency(tenant, kind.as_str(), stable_key);
        self.bounded("idempotency_get", self.store.get(&key)).await
    }

    /// Store `body` unless an entry already exists. Returns the body that is
    /// now cached, which is the earlier one if another writer got there first.
    pub async fn put(
        &self,
        tenant: &TenantId,
        kind: IdempotencyKind,
        stable_key: &str,
        body: String,
    ) -> LedgerResult<String> {
        let key = self.keys.idempotency(tenant, kind.as_str(), stable_key);
        let stored = self
            .bounded(
                "idempotency_put",
                self.store
                    .compare_and_swap(&key, None, body.clone(), Some(self.ttl)),
            )
            .await?;
        if stored {
            return Ok(body);
        }
        debug!(key = %key, "Idempotency entry already present");
        Ok(self
            .bounded("idempotency_get", self.store.get(&key))
            .await?
            .unwrap_or(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryCacheStore;

    fn cache() -> IdempotencyCache {
        IdempotencyCache::new(
            Arc::new(InMemoryCacheStore::new()),
            CacheKeys::default(),
            DEFAULT_IDEMPOTENCY_TTL,
            Duration::from_secs(1),
        )
    }

    #[tokio::test]
    async fn first_writer_wins() {
        let cache = cache();
        let t = TenantId::new("t1");
        let first = cache
            .put(&t, IdempotencyKind::Decide, "k", "{\"a\":1}".into())
            .await
            .unwrap();
        let second = cache
            .put(&t, IdempotencyKind::Decide, "k", "{\"a\":2}".into())
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(
            cache.get(&t, IdempotencyKind::Decide, "k").await.unwrap(),
            Some(first)
        );
    }

    #[tokio::test]
    async fn kinds_and_tenants_do_not_collide() {
        let cache = cache();
        let t1 = TenantId::new("t1");
        cache
            .put(&t1, IdempotencyKind::Decide, "k", "x".into())
            .await
            .unwrap();
        assert!(cache
            .get(&t1, IdempotencyKind::Promote, "k")
            .await
            .unwrap()
            .is_none());
        assert!(cache
            .get(&TenantId::new("t2"), IdempotencyKind::Decide, "k")
            .await
            .unwrap()
            .is_none());
    }
}
