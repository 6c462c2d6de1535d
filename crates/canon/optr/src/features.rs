use crate::score::CandidateFeatures;
use canon_types::CandidatePath;
use std::collections::HashMap;

/// Derives scoring features for a candidate path.
pub trait FeatureFn {
    fn features(&self, candidate: &CandidatePath) -> CandidateFeatures;
}

impl<F> FeatureFn for F
where
    F: Fn(&CandidatePath) -> CandidateFeatures,
{
    fn features(&self, candidate: &CandidatePath) -> CandidateFeatures {
        self(candidate)
    }
}

/// Deterministic estimate from the path's own actions.
///
/// Each action contributes `base_ttv_ms` scaled up by its risk weight, one
/// unit of cost plus `resource_cost` per resource touched, and a
/// multiplicative success factor of `1 - risk/2`. Path risk is the worst
/// action's risk weight.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HeuristicFeatures {
    pub base_ttv_ms: f64,
    pub resource_cost: f64,
}

impl Default for HeuristicFeatures {
    fn default() -> Self {
        Self {
            base_ttv_ms: 100.0,
            resource_cost: 0.5,
        }
    }
}

impl FeatureFn for HeuristicFeatures {
    fn features(&self, candidate: &CandidatePath) -> CandidateFeatures {
        let mut ttv = 0.0;
        let mut cost = 0.0;
        let mut risk: f64 = 0.0;
        let mut success_prob = 1.0;
        for action in &candidate.actions {
            let weight = action.risk_level.weight();
            ttv += self.base_ttv_ms * (1.0 + weight);
            cost += 1.0 + self.resource_cost * action.resources_used.len() as f64;
            risk = risk.max(weight);
            success_prob *= 1.0 - weight / 2.0;
        }
        CandidateFeatures {
            ttv,
            cost,
            risk,
            success_prob,
        }
    }
}

/// Caller-supplied features by candidate id, with a heuristic fallback.
#[derive(Clone, Debug, Default)]
pub struct SuppliedFeatures {
    pub by_candidate: HashMap<String, CandidateFeatures>,
    pub fallback: HeuristicFeatures,
}

impl SuppliedFeatures {
    pub fn new(by_candidate: HashMap<String, CandidateFeatures>) -> Self {
        Self {
            by_candidate,
            fallback: HeuristicFeatures::default(),
        }
    }
}

impl FeatureFn for SuppliedFeatures {
    fn features(&self, candidate: &CandidatePath) -> CandidateFeatures {
        self.by_candidate
            .get(&candidate.id)
            .copied()
            .unwrap_or_else(|| self.fallback.features(candidate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canon_types::{Action, RiskLevel};

    #[test]
    fn heuristic_grows_with_risk() {
        let low = CandidatePath::new("low", vec![Action::new("a", "a")]);
        let high = CandidatePath::new(
            "high",
            vec![Action::new("a", "a").with_risk(RiskLevel::High)],
        );
        let h = HeuristicFeatures::default();
        let lf = h.features(&low);
        let hf = h.features(&high);
        assert!(hf.ttv > lf.ttv);
        assert!(hf.risk > lf.risk);
        assert!(hf.success_prob < lf.success_prob);
    }

    #[test]
    fn supplied_features_override_heuristic() {
        let path = CandidatePath::new("p1", vec![Action::new("a", "a")]);
        let mut map = HashMap::new();
        let fixed = CandidateFeatures {
            ttv: 1.0,
            cost: 2.0,
            risk: 3.0,
            success_prob: 0.9,
        };
        map.insert("p1".to_string(), fixed);
        assert_eq!(SuppliedFeatures::new(map).features(&path), fixed);
    }
}
