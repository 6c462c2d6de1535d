use crate::chain::{verify_chain, ChainReport};
use crate::error::{LedgerError, LedgerResult, StoreKind};
use crate::keys::CacheKeys;
use crate::model::{EventDraft, LedgerEvent, LedgerHead, RecentItem};
use crate::traits::{CacheStore, LedgerStore};
use canon_types::TenantId;
use canon_whynot::DenialRecord;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Upper bound on a `recent` read.
pub const MAX_RECENT: usize = 200;
pub const DEFAULT_RECENT: usize = 50;

#[derive(Clone, Debug)]
pub struct LedgerConfig {
    pub key_prefix: String,
    pub ledger_ttl: Duration,
    pub denial_ttl: Duration,
    pub store_timeout: Duration,
    pub max_append_attempts: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            key_prefix: "canon".to_string(),
            ledger_ttl: Duration::from_secs(30 * 24 * 60 * 60),
            denial_ttl: Duration::from_secs(30 * 24 * 60 * 60),
            store_timeout: Duration::from_secs(2),
            max_append_attempts: 8,
        }
    }
}

/// Hash-chained ledger over a fast cache and a durable archive.
pub struct HashChainLedger {
    fast: Arc<dyn CacheStore>,
    durable: Arc<dyn LedgerStore>,
    keys: CacheKeys,
    config: LedgerConfig,
}

impl HashChainLedger {
    pub fn new(
        fast: Arc<dyn CacheStore>,
        durable: Arc<dyn LedgerStore>,
        config: LedgerConfig,
    ) -> Self {
        Self {
            keys: CacheKeys::new(config.key_prefix.clone()),
            fast,
            durable,
            config,
        }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn keys(&self) -> &CacheKeys {
        &self.keys
    }

    pub fn fast_store(&self) -> &Arc<dyn CacheStore> {
        &self.fast
    }

    async fn bounded<T>(
        &self,
        store: StoreKind,
        operation: &'static str,
        fut: impl Future<Output = LedgerResult<T>>,
    ) -> LedgerResult<T> {
        match tokio::time::timeout(self.config.store_timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!(%store, operation, "Store call timed out");
                Err(LedgerError::Unavailable { store, operation })
            }
        }
    }

    /// Append one event to its pointer's chain.
    ///
    /// The head is claimed in the fast store by compare-and-swap, then the
    /// event is written to the durable archive, then mirrored back to the
    /// fast store. A lost CAS or a durable uniqueness conflict restarts the
    /// attempt from a freshly read head.
    pub async fn append(&self, draft: &EventDraft) -> LedgerResult<LedgerEvent> {
        let head_key = self.keys.head(&draft.tenant_id, &draft.pointer);
        let attempts = self.config.max_append_attempts.max(1);

        for attempt in 1..=attempts {
            let cached = self
                .bounded(StoreKind::Fast, "read_head", self.fast.get(&head_key))
                .await?;
            let head = match &cached {
                Some(raw) => Some(serde_json::from_str::<LedgerHead>(raw)?),
                None => {
                    self.bounded(
                        StoreKind::Durable,
                        "read_tail",
                        self.durable.tail(&draft.pointer),
                    )
                    .await?
                }
            };

            let event = draft.seal(format!("evt-{}", Uuid::new_v4()), head.as_ref())?;
            let claimed = self
                .bounded(
                    StoreKind::Fast,
                    "claim_head",
                    self.fast.compare_and_swap(
                        &head_key,
                        cached.as_deref(),
                        serde_json::to_string(&event.head())?,
                        Some(self.config.ledger_ttl),
                    ),
                )
                .await?;
            if !claimed {
                debug!(pointer = %draft.pointer, attempt, "Lost head race, retrying");
                continue;
            }

            match self
                .bounded(StoreKind::Durable, "append", self.durable.append(&event))
                .await
            {
                Ok(()) => {}
                Err(LedgerError::Conflict(reason)) => {
                    warn!(pointer = %draft.pointer, seq = event.seq, attempt, %reason, "Durable append conflict, retrying");
                    self.release_head(&head_key).await;
                    continue;
                }
                Err(e) => {
                    self.release_head(&head_key).await;
                    return Err(e);
                }
            }

            if let Err(e) = self.mirror(&event).await {
                error!(
                    pointer = %event.pointer,
                    seq = event.seq,
                    error = %e,
                    "Event archived but fast mirror failed"
                );
                return Err(LedgerError::PartialWrite {
                    pointer: event.pointer.clone(),
                    seq: event.seq,
                    reason: e.to_string(),
                });
            }

            info!(
                pointer = %event.pointer,
                seq = event.seq,
                event_type = %event.event_type,
                tenant = %event.tenant_id,
                "Ledger event appended"
            );
            return Ok(event);
        }

        warn!(pointer = %draft.pointer, attempts, "Append gave up under contention");
        Err(LedgerError::Contention {
            pointer: draft.pointer.clone(),
            attempts,
        })
    }

    /// Forget the cached head so the next attempt re-reads the durable tail.
    async fn release_head(&self, head_key: &str) {
        if let Err(e) = self
            .bounded(StoreKind::Fast, "release_head", self.fast.delete(head_key))
            .await
        {
            warn!(key = head_key, error = %e, "Failed to release cached head");
        }
    }

    async fn mirror(&self, event: &LedgerEvent) -> LedgerResult<()> {
        let ttl = Some(self.config.ledger_ttl);
        self.bounded(
            StoreKind::Fast,
            "mirror_event",
            self.fast.push(
                &self.keys.events(&event.tenant_id, &event.pointer),
                serde_json::to_string(event)?,
                None,
                ttl,
            ),
        )
        .await?;
        self.bounded(
            StoreKind::Fast,
            "mirror_recent",
            self.fast.push(
                &self.keys.recent(&event.tenant_id),
                serde_json::to_string(&RecentItem::from(event))?,
                Some(MAX_RECENT),
                ttl,
            ),
        )
        .await
    }

    async fn fast_events(&self, tenant: &TenantId, pointer: &str) -> LedgerResult<Vec<LedgerEvent>> {
        let raw = self
            .bounded(
                StoreKind::Fast,
                "read_events",
                self.fast.list(&self.keys.events(tenant, pointer)),
            )
            .await?;
        // Concurrent mirrors may land out of order.
        let mut events = raw
            .iter()
            .map(|r| serde_json::from_str(r).map_err(LedgerError::from))
            .collect::<LedgerResult<Vec<LedgerEvent>>>()?;
        events.sort_by_key(|e| e.seq);
        Ok(events)
    }

    /// Events of one pointer visible to `tenant`, fast store first.
    ///
    /// The fast list is served only when it holds the whole chain from seq 1.
    /// A list that was started after a cache restart or eviction only holds
    /// the tail, so the durable archive answers instead.
    pub async fn events(&self, tenant: &TenantId, pointer: &str) -> LedgerResult<Vec<LedgerEvent>> {
        match self.fast_events(tenant, pointer).await {
            Ok(events) if is_complete_chain(&events) => return Ok(events),
            Ok(events) if events.is_empty() => {}
            Ok(events) => debug!(
                pointer,
                first_seq = events[0].seq,
                cached = events.len(),
                "Fast view incomplete, using durable store"
            ),
            Err(e) => warn!(pointer, error = %e, "Fast read failed, using durable store"),
        }

        let events = self.durable_events(pointer).await?;
        Ok(events
            .into_iter()
            .filter(|e| &e.tenant_id == tenant)
            .collect())
    }

    async fn durable_events(&self, pointer: &str) -> LedgerResult<Vec<LedgerEvent>> {
        self.bounded(
            StoreKind::Durable,
            "read_events",
            self.durable.events(pointer),
        )
        .await
    }

    /// Recent activity for a tenant, newest first. `limit` is clamped to
    /// `1..=200` and defaults to 50.
    pub async fn recent(&self, tenant: &TenantId, limit: Option<usize>) -> LedgerResult<Vec<RecentItem>> {
        let limit = limit.unwrap_or(DEFAULT_RECENT).clamp(1, MAX_RECENT);

        let cached = self
            .bounded(
                StoreKind::Fast,
                "read_recent",
                self.fast.list(&self.keys.recent(tenant)),
            )
            .await;
        match cached {
            Ok(raw) if !raw.is_empty() => {
                return raw
                    .iter()
                    .rev()
                    .take(limit)
                    .map(|r| serde_json::from_str(r).map_err(LedgerError::from))
                    .collect();
            }
            Ok(_) => {}
            Err(e) => warn!(tenant = %tenant, error = %e, "Fast read failed, using durable store"),
        }

        let events = self
            .bounded(
                StoreKind::Durable,
                "read_recent",
                self.durable.recent(tenant, limit),
            )
            .await?;
        Ok(events.iter().map(RecentItem::from).collect())
    }

    /// Verify a chain, replaying the durable archive when it can be reached
    /// and the fast view otherwise.
    pub async fn verify(&self, tenant: &TenantId, pointer: &str) -> LedgerResult<ChainReport> {
        let events = match self.durable_events(pointer).await {
            Ok(events) if !events.is_empty() => events,
            Ok(_) => self.fast_events(tenant, pointer).await?,
            Err(e) => {
                warn!(pointer, error = %e, "Durable read failed, verifying fast view");
                let events = self.fast_events(tenant, pointer).await?;
                if events.is_empty() {
                    return Err(e);
                }
                events
            }
        };
        if events.is_empty() || events.iter().any(|e| &e.tenant_id != tenant) {
            return Err(LedgerError::NotFound(pointer.to_string()));
        }
        verify_chain(pointer, &events)
    }

    /// Write a denial record to both stores. The durable write comes first.
    pub async fn put_denial(&self, record: &DenialRecord) -> LedgerResult<()> {
        self.bounded(
            StoreKind::Durable,
            "put_denial",
            self.durable.put_denial(record),
        )
        .await?;

        let key = self.keys.denial(&record.tenant_id, &record.id);
        let mirrored = self
            .bounded(
                StoreKind::Fast,
                "put_denial",
                self.fast
                    .set(&key, serde_json::to_string(record)?, Some(self.config.denial_ttl)),
            )
            .await;
        if let Err(e) = mirrored {
            error!(why_not_id = %record.id, error = %e, "Denial archived but fast mirror failed");
            return Err(LedgerError::PartialWrite {
                pointer: record.pointer.clone(),
                seq: record.seq,
                reason: e.to_string(),
            });
        }
        debug!(why_not_id = %record.id, "Denial recorded");
        Ok(())
    }

    /// A denial record owned by `tenant`, fast store first.
    pub async fn get_denial(&self, tenant: &TenantId, why_not_id: &str) -> LedgerResult<Option<DenialRecord>> {
        let key = self.keys.denial(tenant, why_not_id);
        match self
            .bounded(StoreKind::Fast, "get_denial", self.fast.get(&key))
            .await
        {
            Ok(Some(raw)) => return Ok(Some(serde_json::from_str(&raw)?)),
            Ok(None) => {}
            Err(e) => warn!(why_not_id, error = %e, "Fast read failed, using durable store"),
        }

        let record = self
            .bounded(
                StoreKind::Durable,
                "get_denial",
                self.durable.get_denial(why_not_id),
            )
            .await?;
        Ok(record.filter(|r| &r.tenant_id == tenant))
    }

    /// Fast head, durable tail.
    pub async fn heads(
        &self,
        tenant: &TenantId,
        pointer: &str,
    ) -> LedgerResult<(Option<LedgerHead>, Option<LedgerHead>)> {
        let fast = self
            .bounded(
                StoreKind::Fast,
                "read_head",
                self.fast.get(&self.keys.head(tenant, pointer)),
            )
            .await?
            .map(|raw| serde_json::from_str::<LedgerHead>(&raw))
            .transpose()?;
        let durable = self
            .bounded(StoreKind::Durable, "read_tail", self.durable.tail(pointer))
            .await?;
        Ok((fast, durable))
    }

    /// Whether the fast event list of one chain is empty or holds it whole.
    pub async fn fast_view_complete(&self, tenant: &TenantId, pointer: &str) -> LedgerResult<bool> {
        let events = self.fast_events(tenant, pointer).await?;
        Ok(events.is_empty() || is_complete_chain(&events))
    }

    /// Rebuild the fast view of one chain from the durable archive.
    pub async fn rebuild_fast_view(&self, tenant: &TenantId, pointer: &str) -> LedgerResult<usize> {
        let events: Vec<LedgerEvent> = self
            .durable_events(pointer)
            .await?
            .into_iter()
            .filter(|e| &e.tenant_id == tenant)
            .collect();
        let ttl = Some(self.config.ledger_ttl);
        let events_key = self.keys.events(tenant, pointer);
        let head_key = self.keys.head(tenant, pointer);

        self.bounded(StoreKind::Fast, "rebuild", self.fast.delete(&events_key))
            .await?;
        for event in &events {
            self.bounded(
                StoreKind::Fast,
                "rebuild",
                self.fast
                    .push(&events_key, serde_json::to_string(event)?, None, ttl),
            )
            .await?;
        }
        match events.last() {
            Some(last) => {
                self.bounded(
                    StoreKind::Fast,
                    "rebuild",
                    self.fast
                        .set(&head_key, serde_json::to_string(&last.head())?, ttl),
                )
                .await?
            }
            None => {
                self.bounded(StoreKind::Fast, "rebuild", self.fast.delete(&head_key))
                    .await?
            }
        }
        info!(pointer, tenant = %tenant, events = events.len(), "Fast view rebuilt");
        Ok(events.len())
    }

    pub async fn durable_pointers(&self) -> LedgerResult<Vec<(TenantId, String)>> {
        self.bounded(StoreKind::Durable, "list_pointers", self.durable.pointers())
            .await
    }

    /// Readiness probe for both stores.
    pub async fn ping(&self) -> LedgerResult<()> {
        self.bounded(StoreKind::Fast, "ping", self.fast.ping()).await?;
        self.bounded(StoreKind::Durable, "ping", self.durable.ping())
            .await
    }
}

/// Non-empty and contiguous from seq 1.
fn is_complete_chain(events: &[LedgerEvent]) -> bool {
    !events.is_empty()
        && events
            .iter()
            .zip(1u64..)
            .all(|(event, expected)| event.seq == expected)
}
