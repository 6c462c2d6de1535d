//! The constitutional invariants.
//!
//! These are loaded as the genesis snapshot of every canon store; they are
//! CANON-level from the start and cannot be demoted.

use canon_types::{CanonBody, CanonItem, CanonLevel, Provenance, Severity};
use chrono::{DateTime, Utc};
use std::sync::LazyLock;

pub const INV_TS_MANDATORY: &str = "INV_TS_MANDATORY";
pub const INV_CANON_ONLY_EXECUTION: &str = "INV_CANON_ONLY_EXECUTION";
pub const INV_PROMOTION_GATE: &str = "INV_PROMOTION_GATE";
pub const INV_NON_INTERFERENCE: &str = "INV_NON_INTERFERENCE";
pub const INV_TRUST_DENIAL_TRACE: &str = "INV_TRUST_DENIAL_TRACE";
pub const INV_LEDGER_APPEND_ONLY: &str = "INV_LEDGER_APPEND_ONLY";

/// 2025-12-21T19:41:00Z
const RATIFIED_AT_SECS: i64 = 1_766_346_060;

/// Registry of constitutional invariants, in evaluation order.
pub static INVARIANTS: LazyLock<Vec<CanonItem>> = LazyLock::new(constitution);

/// Build the constitutional invariant set.
pub fn constitution() -> Vec<CanonItem> {
    let ratified_at = DateTime::<Utc>::from_timestamp(RATIFIED_AT_SECS, 0)
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

    [
        (
            INV_TS_MANDATORY,
            "Timestamps are mandatory",
            "Every canon item and every proposed change carries a timestamp and provenance. \
             Anything missing either cannot exert authority.",
            "forall x in Canon: x.ts != null and x.provenance != null",
        ),
        (
            INV_CANON_ONLY_EXECUTION,
            "Canon-only execution",
            "An action may execute only when all of its prerequisite canon items are cited \
             and present at CANON level.",
            "admit(a) => prereqs(a) subset_of canonRefs(a) subset_of Canon",
        ),
        (
            INV_PROMOTION_GATE,
            "Promotion gate",
            "Knowledge advances one level per decision, and only when the four promotion \
             tests pass.",
            "promote(x, l -> l') => l' = next(l) and resistance and reproducible \
             and invariantSafe and feasibilityImpact",
        ),
        (
            INV_NON_INTERFERENCE,
            "Non-interference",
            "An action is inadmissible if it raises the expected time-to-value of any \
             other agent.",
            "forall j != i: delta E[TTV_j | a_i] <= 0",
        ),
        (
            INV_TRUST_DENIAL_TRACE,
            "Trust-first denial trace",
            "Every denial produces a structured trace built from the closed reason-code set.",
            "deny(a) => exists trace: codes(trace) subset_of DenialReasonCode",
        ),
        (
            INV_LEDGER_APPEND_ONLY,
            "Append-only decision ledger",
            "Every decision is chained into the ledger and recorded events never change.",
            "forall e in Ledger(p): e.hash = H(p, e.seq, e.ts, e.prevHash, e.payload)",
        ),
    ]
    .into_iter()
    .map(|(id, title, statement, formal)| {
        CanonItem::new(
            id,
            title,
            CanonBody::Invariant {
                statement: statement.to_string(),
                formal: formal.to_string(),
                severity: Severity::HardFail,
            },
        )
        .with_level(CanonLevel::Canon)
        .with_timestamp(ratified_at)
        .with_provenance(
            Provenance::new("canon-constitution")
                .with_reference("INVARIANTS")
                .with_author("canon-maintainers"),
        )
    })
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_constitutional_invariant_is_authoritative() {
        assert_eq!(INVARIANTS.len(), 6);
        for item in INVARIANTS.iter() {
            assert!(item.is_authoritative(), "{} lacks authority", item.id);
            assert!(matches!(
                item.body,
                CanonBody::Invariant {
                    severity: Severity::HardFail,
                    ..
                }
            ));
        }
    }

    #[test]
    fn ratification_timestamp_is_fixed() {
        let ts = INVARIANTS[0].timestamp.unwrap();
        assert_eq!(ts.to_rfc3339(), "2025-12-21T19:41:00+00:00");
    }
}
