use canon_gate::{
    INV_CANON_ONLY_EXECUTION, INV_LEDGER_APPEND_ONLY, INV_NON_INTERFERENCE,
    INV_TRUST_DENIAL_TRACE, INV_TS_MANDATORY,
};
use canon_optr::{OptrBounds, OptrWeights};
use std::collections::BTreeMap;
use std::time::Duration;

/// Class used when an action id's prefix names no configured class.
pub const DEFAULT_ACTION_CLASS: &str = "DEFAULT";

/// Ledger action id for non-interference checks.
pub const NON_INTERFERENCE_ACTION_ID: &str = "NON_INTERFERENCE/CHECK";

/// Tuning for the decision pipeline.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub weights: OptrWeights,
    pub bounds: OptrBounds,
    /// Canon ids an action must cite, by action class.
    pub required_canon: BTreeMap<String, Vec<String>>,
    /// Bound on each canon store call.
    pub store_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            weights: OptrWeights::default(),
            bounds: OptrBounds::default(),
            required_canon: default_required_canon(),
            store_timeout: Duration::from_secs(2),
        }
    }
}

pub fn default_required_canon() -> BTreeMap<String, Vec<String>> {
    let base: Vec<String> = [INV_TS_MANDATORY, INV_CANON_ONLY_EXECUTION, INV_TRUST_DENIAL_TRACE]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let with = |extra: &str| {
        let mut ids = base.clone();
        ids.push(extra.to_string());
        ids
    };
    BTreeMap::from([
        ("BUILD_TRIGGER".to_string(), with(INV_LEDGER_APPEND_ONLY)),
        ("NON_INTERFERENCE".to_string(), with(INV_NON_INTERFERENCE)),
        (DEFAULT_ACTION_CLASS.to_string(), base),
    ])
}

impl EngineConfig {
    /// The prefix of `action_id` before `/` when it names a configured
    /// class, otherwise [`DEFAULT_ACTION_CLASS`].
    pub fn action_class<'a>(&self, action_id: &'a str) -> &'a str {
        match action_id.split_once('/') {
            Some((prefix, _)) if self.required_canon.contains_key(prefix) => prefix,
            _ => DEFAULT_ACTION_CLASS,
        }
    }

    pub fn required_canon_for(&self, action_id: &str) -> Vec<String> {
        self.required_canon
            .get(self.action_class(action_id))
            .or_else(|| self.required_canon.get(DEFAULT_ACTION_CLASS))
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_selects_class() {
        let config = EngineConfig::default();
        assert_eq!(config.action_class("BUILD_TRIGGER/main"), "BUILD_TRIGGER");
        assert_eq!(config.action_class("NON_INTERFERENCE/CHECK"), "NON_INTERFERENCE");
        assert_eq!(config.action_class("UNKNOWN/x"), DEFAULT_ACTION_CLASS);
        assert_eq!(config.action_class("deploy"), DEFAULT_ACTION_CLASS);
    }

    #[test]
    fn non_interference_class_adds_its_invariant() {
        let config = EngineConfig::default();
        let required = config.required_canon_for(NON_INTERFERENCE_ACTION_ID);
        assert!(required.contains(&INV_NON_INTERFERENCE.to_string()));
        assert!(required.contains(&INV_TS_MANDATORY.to_string()));
        assert!(!config
            .required_canon_for("deploy")
            .contains(&INV_NON_INTERFERENCE.to_string()));
    }
}
