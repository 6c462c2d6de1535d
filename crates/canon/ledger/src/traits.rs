use crate::error::LedgerResult;
use crate::model::{LedgerEvent, LedgerHead};
use async_trait::async_trait;
use canon_types::TenantId;
use canon_whynot::DenialRecord;
use std::time::Duration;

/// Authoritative archive of ledger events and denial records.
///
/// `append` must reject an event unless it is exactly the next link of its
/// pointer's chain (`seq == tail.seq + 1` and `prev_hash == tail.hash`).
/// Rejections are reported as [`LedgerError::Conflict`](crate::LedgerError::Conflict).
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn append(&self, event: &LedgerEvent) -> LedgerResult<()>;

    async fn tail(&self, pointer: &str) -> LedgerResult<Option<LedgerHead>>;

    /// All events of one pointer in seq order.
    async fn events(&self, pointer: &str) -> LedgerResult<Vec<LedgerEvent>>;

    /// Most recent events of a tenant, newest first.
    async fn recent(&self, tenant: &TenantId, limit: usize) -> LedgerResult<Vec<LedgerEvent>>;

    /// Every `(tenant, pointer)` pair that has at least one event.
    async fn pointers(&self) -> LedgerResult<Vec<(TenantId, String)>>;

    async fn put_denial(&self, record: &DenialRecord) -> LedgerResult<()>;

    async fn get_denial(&self, why_not_id: &str) -> LedgerResult<Option<DenialRecord>>;

    async fn ping(&self) -> LedgerResult<()>;
}

/// Fast key-value store with per-key TTLs, string values and bounded lists.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> LedgerResult<Option<String>>;

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> LedgerResult<()>;

    /// Store `value` only when the current value equals `expected`
    /// (`None` meaning absent). Returns whether the swap happened.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        value: String,
        ttl: Option<Duration>,
    ) -> LedgerResult<bool>;

    async fn delete(&self, key: &str) -> LedgerResult<()>;

    /// Append to a list, dropping the oldest entries beyond `max_len`.
    async fn push(
        &self,
        key: &str,
        value: String,
        max_len: Option<usize>,
        ttl: Option<Duration>,
    ) -> LedgerResult<()>;

    /// Whole list, oldest first. Absent lists are empty.
    async fn list(&self, key: &str) -> LedgerResult<Vec<String>>;

    async fn ping(&self) -> LedgerResult<()>;
}
