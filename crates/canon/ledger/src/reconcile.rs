//! Detection and repair of fast/durable divergence.
//!
//! The durable archive is authoritative. An absent fast view is a cold
//! cache, not a divergence.

use crate::error::LedgerResult;
use crate::ledger::HashChainLedger;
use crate::model::LedgerHead;
use canon_types::TenantId;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DivergenceKind {
    /// Fast head trails the durable tail.
    FastBehind,
    /// Fast head claims a seq the archive never accepted.
    FastAhead,
    /// Same seq, different hash.
    HashMismatch,
    /// Fast head exists for a chain the archive does not hold.
    Orphaned,
    /// Heads agree but the fast event list is missing the start of the chain.
    FastIncomplete,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Divergence {
    pub tenant_id: TenantId,
    pub pointer: String,
    pub kind: DivergenceKind,
    pub fast_head: Option<LedgerHead>,
    pub durable_head: Option<LedgerHead>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub checked: usize,
    pub diverged: Vec<Divergence>,
    pub repaired: usize,
}

pub struct Reconciler {
    ledger: Arc<HashChainLedger>,
}

impl Reconciler {
    pub fn new(ledger: Arc<HashChainLedger>) -> Self {
        Self { ledger }
    }

    /// Compare the fast head of one chain with its durable tail, and check
    /// the fast event list reaches back to seq 1.
    pub async fn check(&self, tenant: &TenantId, pointer: &str) -> LedgerResult<Option<Divergence>> {
        let (fast, durable) = self.ledger.heads(tenant, pointer).await?;
        let complete = self.ledger.fast_view_complete(tenant, pointer).await?;
        let kind = match (&fast, &durable) {
            (None, _) => None,
            (Some(_), None) => Some(DivergenceKind::Orphaned),
            (Some(f), Some(d)) if f.seq < d.seq => Some(DivergenceKind::FastBehind),
            (Some(f), Some(d)) if f.seq > d.seq => Some(DivergenceKind::FastAhead),
            (Some(f), Some(d)) if f.hash != d.hash => Some(DivergenceKind::HashMismatch),
            (Some(_), Some(_)) if !complete => Some(DivergenceKind::FastIncomplete),
            _ => None,
        };
        Ok(kind.map(|kind| Divergence {
            tenant_id: tenant.clone(),
            pointer: pointer.to_string(),
            kind,
            fast_head: fast,
            durable_head: durable,
        }))
    }

    /// Replace the fast view of a chain with the durable one.
    pub async fn repair(&self, divergence: &Divergence) -> LedgerResult<()> {
        warn!(
            pointer = %divergence.pointer,
            tenant = %divergence.tenant_id,
            kind = ?divergence.kind,
            "Repairing diverged fast view"
        );
        self.ledger
            .rebuild_fast_view(&divergence.tenant_id, &divergence.pointer)
            .await
            .map(|_| ())
    }

    /// Check every durable chain, repairing divergences when `repair` is set.
    pub async fn run_once(&self, repair: bool) -> LedgerResult<ReconcileReport> {
        let mut report = ReconcileReport::default();
        for (tenant, pointer) in self.ledger.durable_pointers().await? {
            report.checked += 1;
            if let Some(divergence) = self.check(&tenant, &pointer).await? {
                if repair {
                    self.repair(&divergence).await?;
                    report.repaired += 1;
                }
                report.diverged.push(divergence);
            }
        }
        info!(
            checked = report.checked,
            diverged = report.diverged.len(),
            repaired = report.repaired,
            "Reconciliation pass complete"
        );
        Ok(report)
    }
}
