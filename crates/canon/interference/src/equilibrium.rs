use crate::estimator::{AgentProfile, TtvEstimator};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EquilibriumConflict {
    pub acting_agent_id: String,
    pub action_id: String,
    pub affected_agent_id: String,
    pub delta_ms: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EquilibriumReport {
    pub stable: bool,
    pub conflicts: Vec<EquilibriumConflict>,
}

/// Every ordered pair (i, j) where one of i's planned actions slows j.
pub fn check_multi_agent_equilibrium(
    agents: &[AgentProfile],
    estimator: &dyn TtvEstimator,
) -> EquilibriumReport {
    let mut conflicts = Vec::new();

    for (i, agent) in agents.iter().enumerate() {
        let others: Vec<AgentProfile> = agents
            .iter()
            .enumerate()
            .filter(|(j, _)| *j != i)
            .map(|(_, a)| a.clone())
            .collect();

        for action in &agent.planned_actions {
            for (affected, delta) in estimator.estimate(action, &others) {
                if delta > 0.0 {
                    conflicts.push(EquilibriumConflict {
                        acting_agent_id: agent.agent_id.clone(),
                        action_id: action.id.clone(),
                        affected_agent_id: affected,
                        delta_ms: delta,
                    });
                }
            }
        }
    }

    if !conflicts.is_empty() {
        warn!(conflicts = conflicts.len(), "multi-agent plan is not in equilibrium");
    }

    EquilibriumReport {
        stable: conflicts.is_empty(),
        conflicts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimator::ContentionEstimator;
    use canon_types::Action;

    fn agent(id: &str, uses: &str, depends: &str) -> AgentProfile {
        let mut profile = AgentProfile::new(id);
        profile.planned_actions = vec![Action::new(format!("{id}-act"), "work").with_resources([uses])];
        profile.depends_on_resources = [depends.to_string()].into();
        profile
    }

    #[test]
    fn conflicts_are_reported_in_both_directions() {
        let a = agent("a", "db", "db");
        let b = agent("b", "db", "db");
        let report = check_multi_agent_equilibrium(&[a, b], &ContentionEstimator::default());
        assert!(!report.stable);
        assert_eq!(report.conflicts.len(), 2);
        assert_eq!(report.conflicts[0].acting_agent_id, "a");
        assert_eq!(report.conflicts[1].acting_agent_id, "b");
    }

    #[test]
    fn disjoint_plans_are_stable() {
        let a = agent("a", "db", "db");
        let b = agent("b", "cache", "cache");
        let report = check_multi_agent_equilibrium(&[a, b], &ContentionEstimator::default());
        assert!(report.stable);
    }
}
