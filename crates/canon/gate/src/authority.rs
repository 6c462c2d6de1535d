use canon_types::{Action, CanonSnapshot};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

/// Result of the authority boundary check.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorityCheck {
    pub ok: bool,
    /// Prerequisites not backed by an authoritative citation.
    pub missing_refs: Vec<String>,
    /// Cited refs that cannot exert authority: unknown, below CANON, or
    /// missing timestamp/provenance.
    pub invalid_refs: Vec<String>,
    pub message: String,
}

/// Check that every prerequisite of `action` is cited in `available` and
/// resolves to an authoritative canon item in `snapshot`.
///
/// Invalid citations count as absent. This is the only admission path for
/// actions; callers must not bypass it.
pub fn require_canon_refs(
    action: &Action,
    available: &BTreeSet<String>,
    snapshot: &CanonSnapshot,
) -> AuthorityCheck {
    let invalid_refs: Vec<String> = available
        .iter()
        .filter(|r| !snapshot.is_authoritative(r))
        .cloned()
        .collect();

    let missing_refs: Vec<String> = action
        .prerequisites_canon_ids
        .iter()
        .filter(|id| !available.contains(*id) || !snapshot.is_authoritative(id))
        .cloned()
        .collect();

    let ok = missing_refs.is_empty();
    let message = if ok {
        "Canon prerequisites satisfied".to_string()
    } else {
        format!("Missing canon prerequisites: {}", missing_refs.join(", "))
    };

    debug!(
        action_id = %action.id,
        ok,
        missing = missing_refs.len(),
        invalid = invalid_refs.len(),
        "authority boundary evaluated"
    );

    AuthorityCheck {
        ok,
        missing_refs,
        invalid_refs,
        message,
    }
}
