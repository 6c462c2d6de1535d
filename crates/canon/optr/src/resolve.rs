use crate::features::FeatureFn;
use crate::gates::{
    gate_authority_boundary, gate_cost_bound, gate_missing_prereqs, gate_risk_bound,
    gate_success_probability, OptrBounds,
};
use crate::score::{score_path, CandidateFeatures, OptrScore, OptrWeights};
use crate::{OptrError, OptrResult};
use canon_types::{CandidatePath, CanonSnapshot, TenantId, WhyNotTrace};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info};

#[derive(Clone, Debug)]
pub struct OptrRequest {
    pub ts: DateTime<Utc>,
    pub tenant_id: TenantId,
    pub goal: String,
    pub candidates: Vec<CandidatePath>,
    /// Canon ids the caller cites as authority.
    pub canon_refs_used: BTreeSet<String>,
    /// Authoritative canon ids that exist in the store.
    pub canon_ids_present: BTreeSet<String>,
    pub weights: OptrWeights,
    pub bounds: OptrBounds,
}

/// A candidate with the features and score computed for it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredCandidate {
    pub candidate: CandidatePath,
    pub features: CandidateFeatures,
    pub score: OptrScore,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub denials: Vec<WhyNotTrace>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptrRun {
    pub ts: DateTime<Utc>,
    pub tenant_id: TenantId,
    pub goal: String,
    pub canon_version: u64,
    pub canon_refs_used: Vec<String>,
    /// Candidates in input order.
    pub scored: Vec<ScoredCandidate>,
    /// Position in `scored` of the lowest total.
    #[serde(default)]
    pub selected_index: Option<usize>,
    /// Lowest total; the least-bad path when nothing is admissible.
    pub selected_path_id: Option<String>,
    pub selected_next_action_id: Option<String>,
    pub deny_traces: Vec<WhyNotTrace>,
}

impl OptrRun {
    pub fn selected(&self) -> Option<&ScoredCandidate> {
        self.scored.get(self.selected_index?)
    }

    /// The selected candidate, only if its total is finite.
    pub fn admitted(&self) -> Option<&ScoredCandidate> {
        self.selected().filter(|s| s.score.is_admissible())
    }
}

/// Score, gate and select among the request's candidates.
pub fn resolve<F>(
    request: OptrRequest,
    snapshot: &CanonSnapshot,
    feature_fn: &F,
) -> OptrResult<OptrRun>
where
    F: FeatureFn + ?Sized,
{
    if request.candidates.is_empty() {
        return Err(OptrError::NoCandidates);
    }

    let ts = request.ts;
    let mut scored = Vec::with_capacity(request.candidates.len());
    let mut deny_traces = Vec::new();

    for candidate in request.candidates {
        let Some(next_action) = candidate.next_action() else {
            return Err(OptrError::EmptyCandidate(candidate.id.clone()));
        };

        let features = feature_fn.features(&candidate);
        validate_features(&candidate.id, &features)?;
        let mut score = score_path(&features, &request.weights);

        let mut denials = Vec::new();
        for action in &candidate.actions {
            denials.extend(gate_missing_prereqs(ts, action, &request.canon_ids_present));
            denials.extend(gate_authority_boundary(
                ts,
                action,
                &request.canon_refs_used,
                snapshot,
            ));
        }
        if let Some(max_risk) = request.bounds.max_risk {
            denials.extend(gate_risk_bound(ts, next_action, &features, max_risk));
        }
        if let Some(max_cost) = request.bounds.max_cost {
            denials.extend(gate_cost_bound(ts, next_action, &features, max_cost));
        }
        if let Some(floor) = request.bounds.min_success_prob {
            denials.extend(gate_success_probability(ts, next_action, &features, floor));
        }

        if !denials.is_empty() {
            score.mark_inadmissible();
        }
        debug!(
            candidate_id = %candidate.id,
            total = score.total,
            denials = denials.len(),
            "candidate scored"
        );
        deny_traces.extend(denials.iter().cloned());
        scored.push(ScoredCandidate {
            candidate,
            features,
            score,
            denials,
        });
    }

    // Strict comparison keeps the earliest candidate on ties.
    let mut best = 0;
    for (idx, entry) in scored.iter().enumerate().skip(1) {
        if entry.score.total < scored[best].score.total {
            best = idx;
        }
    }
    let selected = &scored[best];
    let selected_path_id = Some(selected.candidate.id.clone());
    let selected_next_action_id = selected.candidate.next_action().map(|a| a.id.clone());
    let admitted = selected.score.is_admissible();

    info!(
        tenant_id = %request.tenant_id,
        goal = %request.goal,
        candidates = scored.len(),
        selected = ?selected_path_id,
        admitted,
        "optr resolved"
    );

    Ok(OptrRun {
        ts,
        tenant_id: request.tenant_id,
        goal: request.goal,
        canon_version: snapshot.version,
        canon_refs_used: request.canon_refs_used.into_iter().collect(),
        scored,
        selected_index: Some(best),
        selected_path_id,
        selected_next_action_id,
        deny_traces,
    })
}

fn validate_features(id: &str, features: &CandidateFeatures) -> OptrResult<()> {
    let fields = [
        ("ttv", features.ttv),
        ("cost", features.cost),
        ("risk", features.risk),
        ("successProb", features.success_prob),
    ];
    for (name, value) in fields {
        if value.is_nan() {
            return Err(OptrError::InvalidFeatures {
                id: id.to_string(),
                reason: format!("{name} is NaN"),
            });
        }
    }
    if !(0.0..=1.0).contains(&features.success_prob) {
        return Err(OptrError::InvalidFeatures {
            id: id.to_string(),
            reason: format!("successProb {} outside 0..=1", features.success_prob),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::HeuristicFeatures;
    use canon_gate::{constitution, require_canon_refs};
    use canon_types::{Action, CanonBody, CanonItem, CanonLevel, DenialReasonCode, Provenance};
    use proptest::prelude::*;
    use std::collections::HashMap;

    fn canon(ids: &[&str]) -> CanonSnapshot {
        let mut items = constitution();
        for id in ids {
            items.push(
                CanonItem::new(
                    *id,
                    *id,
                    CanonBody::Definition {
                        term: id.to_string(),
                        text: "x".into(),
                    },
                )
                .with_level(CanonLevel::Canon)
                .with_timestamp(Utc::now())
                .with_provenance(Provenance::new("repo")),
            );
        }
        CanonSnapshot::new(4, items)
    }

    fn set(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    fn request(candidates: Vec<CandidatePath>, refs: &[&str], present: &[&str]) -> OptrRequest {
        OptrRequest {
            ts: Utc::now(),
            tenant_id: TenantId::default(),
            goal: "ship".into(),
            candidates,
            canon_refs_used: set(refs),
            canon_ids_present: set(present),
            weights: OptrWeights::default(),
            bounds: OptrBounds::default(),
        }
    }

    fn fixed(totals: HashMap<&'static str, f64>) -> impl Fn(&CandidatePath) -> CandidateFeatures {
        move |c: &CandidatePath| CandidateFeatures {
            ttv: totals.get(c.id.as_str()).copied().unwrap_or(0.0),
            cost: 0.0,
            risk: 0.0,
            success_prob: 1.0,
        }
    }

    #[test]
    fn missing_prerequisite_denies_with_ids() {
        let snap = canon(&["X"]);
        let action = Action::new("a1", "deploy").with_prerequisites(["X"]);
        let run = resolve(
            request(
                vec![CandidatePath::new("p1", vec![action])],
                &[],
                &[],
            ),
            &snap,
            &HeuristicFeatures::default(),
        )
        .unwrap();

        assert!(run.admitted().is_none());
        assert_eq!(run.selected_path_id.as_deref(), Some("p1"));
        let prereq = &run.deny_traces[0];
        assert_eq!(prereq.reason_codes, vec![DenialReasonCode::MissingCanonPrereqs]);
        assert_eq!(prereq.missing_canon_ids, vec!["X".to_string()]);
        let authority = &run.deny_traces[1];
        assert_eq!(
            authority.reason_codes,
            vec![DenialReasonCode::AuthorityBoundaryFail]
        );
        assert_eq!(authority.missing_canon_ids, vec!["X".to_string()]);
    }

    #[test]
    fn admissible_candidate_beats_infinite_one() {
        let snap = canon(&["X"]);
        let blocked = CandidatePath::new(
            "blocked",
            vec![Action::new("a1", "risky").with_prerequisites(["Y"])],
        );
        let open = CandidatePath::new("open", vec![Action::new("a2", "safe")]);
        let run = resolve(
            request(vec![blocked, open], &[], &["X"]),
            &snap,
            &fixed(HashMap::from([("blocked", 1.0), ("open", 12.5)])),
        )
        .unwrap();

        assert_eq!(run.selected_path_id.as_deref(), Some("open"));
        let admitted = run.admitted().unwrap();
        assert!((admitted.score.total - 12.5).abs() < 1e-12);
        assert!(run.scored[0].score.total.is_infinite());
    }

    #[test]
    fn ties_go_to_first_candidate() {
        let snap = canon(&[]);
        let a = CandidatePath::new("a", vec![Action::new("x", "x")]);
        let b = CandidatePath::new("b", vec![Action::new("y", "y")]);
        let run = resolve(
            request(vec![a, b], &[], &[]),
            &snap,
            &fixed(HashMap::from([("a", 5.0), ("b", 5.0)])),
        )
        .unwrap();
        assert_eq!(run.selected_path_id.as_deref(), Some("a"));
    }

    #[test]
    fn selection_follows_position_not_id() {
        let snap = canon(&[]);
        let blocked = CandidatePath::new(
            "p",
            vec![Action::new("a1", "deploy").with_prerequisites(["X"])],
        );
        let clear = CandidatePath::new("p", vec![Action::new("a2", "deploy")]);
        let run = resolve(
            request(vec![blocked, clear], &[], &[]),
            &snap,
            &HeuristicFeatures::default(),
        )
        .unwrap();

        assert!(run.scored[0].score.total.is_infinite());
        assert_eq!(run.selected_index, Some(1));
        let admitted = run.admitted().expect("second path is admissible");
        assert_eq!(admitted.candidate.actions[0].id, "a2");
        assert_eq!(run.selected_next_action_id.as_deref(), Some("a2"));
    }

    #[test]
    fn all_gates_run_in_fixed_order() {
        let snap = canon(&[]);
        let action = Action::new("a1", "deploy").with_prerequisites(["Z"]);
        let mut req = request(vec![CandidatePath::new("p", vec![action])], &[], &[]);
        req.bounds = OptrBounds {
            max_risk: Some(-1.0),
            max_cost: Some(-1.0),
            min_success_prob: Some(2.0),
        };
        let run = resolve(req, &snap, &HeuristicFeatures::default()).unwrap();
        let codes: Vec<_> = run.deny_traces.iter().map(|t| t.reason_codes[0]).collect();
        assert_eq!(
            codes,
            vec![
                DenialReasonCode::MissingCanonPrereqs,
                DenialReasonCode::AuthorityBoundaryFail,
                DenialReasonCode::RiskBoundExceeded,
                DenialReasonCode::CostBoundExceeded,
                DenialReasonCode::SuccessProbTooLow,
            ]
        );
    }

    #[test]
    fn empty_inputs_are_errors() {
        let snap = canon(&[]);
        assert!(matches!(
            resolve(request(vec![], &[], &[]), &snap, &HeuristicFeatures::default()),
            Err(OptrError::NoCandidates)
        ));
        assert!(matches!(
            resolve(
                request(vec![CandidatePath::new("p", vec![])], &[], &[]),
                &snap,
                &HeuristicFeatures::default()
            ),
            Err(OptrError::EmptyCandidate(_))
        ));
    }

    #[test]
    fn nan_features_are_rejected() {
        let snap = canon(&[]);
        let nan = |_: &CandidatePath| CandidateFeatures {
            ttv: f64::NAN,
            cost: 0.0,
            risk: 0.0,
            success_prob: 1.0,
        };
        let err = resolve(
            request(vec![CandidatePath::new("p", vec![Action::new("a", "a")])], &[], &[]),
            &snap,
            &nan,
        )
        .unwrap_err();
        assert!(matches!(err, OptrError::InvalidFeatures { .. }));
    }

    proptest! {
        #[test]
        fn every_admitted_action_passes_authority(
            prereqs in proptest::collection::vec(proptest::collection::btree_set("[A-D]", 0..3), 1..5),
            refs in proptest::collection::btree_set("[A-D]", 0..4),
        ) {
            let snap = canon(&["A", "B", "C", "D"]);
            let candidates: Vec<_> = prereqs
                .iter()
                .enumerate()
                .map(|(i, p)| CandidatePath::new(
                    format!("p{i}"),
                    vec![Action::new(format!("a{i}"), "n").with_prerequisites(p.clone())],
                ))
                .collect();
            let present = snap.authoritative_ids();
            let req = OptrRequest {
                ts: Utc::now(),
                tenant_id: TenantId::default(),
                goal: "g".into(),
                candidates,
                canon_refs_used: refs.clone(),
                canon_ids_present: present,
                weights: OptrWeights::default(),
                bounds: OptrBounds::default(),
            };
            let run = resolve(req, &snap, &HeuristicFeatures::default()).unwrap();
            if let Some(admitted) = run.admitted() {
                for action in &admitted.candidate.actions {
                    prop_assert!(require_canon_refs(action, &refs, &snap).ok);
                }
            }
        }
    }
}
