use canon_types::Action;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Another agent whose time-to-value an action may affect.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentProfile {
    pub agent_id: String,
    #[serde(default)]
    pub goal: String,
    #[serde(default)]
    pub depends_on_resources: BTreeSet<String>,
    #[serde(default)]
    pub depends_on_state: BTreeSet<String>,
    #[serde(default, rename = "baselineExpectedTTV")]
    pub baseline_expected_ttv: Option<f64>,
    #[serde(default, rename = "predictedExpectedTTV")]
    pub predicted_expected_ttv: Option<f64>,
    /// Used by the equilibrium check.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub planned_actions: Vec<Action>,
}

impl AgentProfile {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            ..Self::default()
        }
    }

    /// `predicted - baseline` when both forecasts are present.
    pub fn forecast_delta(&self) -> Option<f64> {
        Some(self.predicted_expected_ttv? - self.baseline_expected_ttv?)
    }
}

/// Strategy for estimating per-agent TTV deltas of an action.
pub trait TtvEstimator: Send + Sync {
    fn estimate(&self, action: &Action, others: &[AgentProfile]) -> BTreeMap<String, f64>;
}

/// Fixed penalty per overlapping resource and per overlapping state key.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ContentionEstimator {
    pub resource_conflict_ms: f64,
    pub state_conflict_ms: f64,
}

impl Default for ContentionEstimator {
    fn default() -> Self {
        Self {
            resource_conflict_ms: 50.0,
            state_conflict_ms: 100.0,
        }
    }
}

impl TtvEstimator for ContentionEstimator {
    fn estimate(&self, action: &Action, others: &[AgentProfile]) -> BTreeMap<String, f64> {
        let mut deltas = BTreeMap::new();
        for agent in others {
            let resources = action
                .resources_used
                .intersection(&agent.depends_on_resources)
                .count() as f64;
            let state = action
                .shared_state_modified
                .intersection(&agent.depends_on_state)
                .count() as f64;
            keep_worst(
                &mut deltas,
                &agent.agent_id,
                resources * self.resource_conflict_ms + state * self.state_conflict_ms,
            );
        }
        deltas
    }
}

/// Explicit forecasts win; agents without one fall back to `estimator`.
///
/// An agent listed more than once is charged its largest delta.
pub fn forecast_deltas(
    action: &Action,
    others: &[AgentProfile],
    estimator: &dyn TtvEstimator,
) -> BTreeMap<String, f64> {
    let estimated = estimator.estimate(action, others);
    let mut deltas = BTreeMap::new();
    for agent in others {
        let delta = agent
            .forecast_delta()
            .or_else(|| estimated.get(&agent.agent_id).copied())
            .unwrap_or(0.0);
        keep_worst(&mut deltas, &agent.agent_id, delta);
    }
    deltas
}

fn keep_worst(deltas: &mut BTreeMap<String, f64>, agent_id: &str, delta: f64) {
    deltas
        .entry(agent_id.to_string())
        .and_modify(|d| *d = d.max(delta))
        .or_insert(delta);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contention_charges_per_overlap() {
        let action = Action::new("a1", "write")
            .with_resources(["db", "queue"])
            .with_shared_state(["config"]);
        let mut other = AgentProfile::new("b");
        other.depends_on_resources = ["db".to_string(), "queue".to_string()].into();
        other.depends_on_state = ["config".to_string()].into();
        let deltas = ContentionEstimator::default().estimate(&action, &[other]);
        assert_eq!(deltas["b"], 200.0);
    }

    #[test]
    fn forecast_overrides_estimate() {
        let action = Action::new("a1", "write").with_resources(["db"]);
        let mut forecast = AgentProfile::new("b");
        forecast.depends_on_resources = ["db".to_string()].into();
        forecast.baseline_expected_ttv = Some(1000.0);
        forecast.predicted_expected_ttv = Some(990.0);
        let mut estimated = AgentProfile::new("c");
        estimated.depends_on_resources = ["db".to_string()].into();

        let deltas = forecast_deltas(
            &action,
            &[forecast, estimated],
            &ContentionEstimator::default(),
        );
        assert_eq!(deltas["b"], -10.0);
        assert_eq!(deltas["c"], 50.0);
    }

    #[test]
    fn repeated_agent_keeps_its_largest_delta() {
        let action = Action::new("a1", "write");
        let mut slowed = AgentProfile::new("b");
        slowed.baseline_expected_ttv = Some(1000.0);
        slowed.predicted_expected_ttv = Some(1300.0);
        let mut sped_up = slowed.clone();
        sped_up.predicted_expected_ttv = Some(990.0);

        let deltas = forecast_deltas(
            &action,
            &[slowed, sped_up],
            &ContentionEstimator::default(),
        );
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas["b"], 300.0);
    }

    #[test]
    fn half_forecast_falls_back_to_estimator() {
        let mut agent = AgentProfile::new("b");
        agent.baseline_expected_ttv = Some(10.0);
        assert_eq!(agent.forecast_delta(), None);
    }
}
