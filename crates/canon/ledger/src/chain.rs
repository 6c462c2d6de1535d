use crate::error::LedgerResult;
use crate::model::{LedgerEvent, LedgerHead};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChainFaultKind {
    SeqMismatch,
    PrevHashMismatch,
    HashMismatch,
}

/// First point at which a chain stops verifying.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainFault {
    pub reason: ChainFaultKind,
    pub at_seq: u64,
    pub expected: Option<String>,
    pub found: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainReport {
    pub pointer: String,
    pub ok: bool,
    pub count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub head: Option<LedgerHead>,
    #[serde(flatten, default, skip_serializing_if = "Option::is_none")]
    pub fault: Option<ChainFault>,
}

/// Replay a pointer's events in the order given.
///
/// Event `i` (0-based) must have `seq == i + 1`, link to the previous
/// event's hash, and hash to its stored value.
pub fn verify_chain(pointer: &str, events: &[LedgerEvent]) -> LedgerResult<ChainReport> {
    let mut prev: Option<&LedgerEvent> = None;

    for (idx, event) in events.iter().enumerate() {
        let at_seq = idx as u64 + 1;

        if event.seq != at_seq {
            return Ok(fault(
                pointer,
                events.len(),
                ChainFault {
                    reason: ChainFaultKind::SeqMismatch,
                    at_seq,
                    expected: Some(at_seq.to_string()),
                    found: Some(event.seq.to_string()),
                },
            ));
        }

        let expected_prev = prev.map(|p| p.hash.as_str());
        if event.prev_hash.as_deref() != expected_prev {
            return Ok(fault(
                pointer,
                events.len(),
                ChainFault {
                    reason: ChainFaultKind::PrevHashMismatch,
                    at_seq,
                    expected: expected_prev.map(str::to_string),
                    found: event.prev_hash.clone(),
                },
            ));
        }

        let recomputed = event.compute_hash()?;
        if recomputed != event.hash {
            return Ok(fault(
                pointer,
                events.len(),
                ChainFault {
                    reason: ChainFaultKind::HashMismatch,
                    at_seq,
                    expected: Some(recomputed),
                    found: Some(event.hash.clone()),
                },
            ));
        }

        prev = Some(event);
    }

    Ok(ChainReport {
        pointer: pointer.to_string(),
        ok: true,
        count: events.len(),
        head: prev.map(LedgerEvent::head),
        fault: None,
    })
}

fn fault(pointer: &str, count: usize, fault: ChainFault) -> ChainReport {
    tracing::warn!(
        pointer = %pointer,
        at_seq = fault.at_seq,
        reason = ?fault.reason,
        "Ledger chain failed verification"
    );
    ChainReport {
        pointer: pointer.to_string(),
        ok: false,
        count,
        head: None,
        fault: Some(fault),
    }
}
