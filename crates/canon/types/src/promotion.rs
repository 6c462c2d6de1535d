use crate::canon::CanonLevel;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The four named promotion tests.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PromotionTest {
    Resistance,
    Reproducibility,
    InvariantSafety,
    FeasibilityImpact,
}

impl PromotionTest {
    pub const ALL: [PromotionTest; 4] = [
        PromotionTest::Resistance,
        PromotionTest::Reproducibility,
        PromotionTest::InvariantSafety,
        PromotionTest::FeasibilityImpact,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PromotionTest::Resistance => "resistance",
            PromotionTest::Reproducibility => "reproducibility",
            PromotionTest::InvariantSafety => "invariantSafety",
            PromotionTest::FeasibilityImpact => "feasibilityImpact",
        }
    }
}

impl std::fmt::Display for PromotionTest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Test results submitted with a promotion request.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionTests {
    pub resistance: bool,
    pub reproducible: bool,
    pub invariant_safe: bool,
    pub feasibility_impact: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence_refs: Vec<String>,
}

impl PromotionTests {
    pub fn passed(&self, test: PromotionTest) -> bool {
        match test {
            PromotionTest::Resistance => self.resistance,
            PromotionTest::Reproducibility => self.reproducible,
            PromotionTest::InvariantSafety => self.invariant_safe,
            PromotionTest::FeasibilityImpact => self.feasibility_impact,
        }
    }

    /// Failed tests in their canonical order.
    pub fn failed(&self) -> Vec<PromotionTest> {
        PromotionTest::ALL
            .into_iter()
            .filter(|t| !self.passed(*t))
            .collect()
    }

    pub fn all_passed(&self) -> bool {
        self.failed().is_empty()
    }
}

/// Outcome of one promotion attempt.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionDecision {
    pub ts: DateTime<Utc>,
    pub item_id: String,
    pub from: CanonLevel,
    pub to: CanonLevel,
    pub tests: PromotionTests,
    pub approved: bool,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_tests: Vec<PromotionTest>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remediation: Vec<String>,
}
