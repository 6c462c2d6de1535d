use serde::{Deserialize, Serialize};

/// Lower bound applied to success probability before taking its log.
pub const SUCCESS_PROB_FLOOR: f64 = 1e-9;

/// Weights of the OPTR cost function.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptrWeights {
    pub lambda_c: f64,
    pub lambda_r: f64,
    pub lambda_p: f64,
}

pub const DEFAULT_WEIGHTS: OptrWeights = OptrWeights {
    lambda_c: 0.1,
    lambda_r: 0.2,
    lambda_p: 0.05,
};

impl Default for OptrWeights {
    fn default() -> Self {
        DEFAULT_WEIGHTS
    }
}

/// Inputs to the cost function for one candidate path.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateFeatures {
    /// Expected time to value in milliseconds.
    pub ttv: f64,
    pub cost: f64,
    pub risk: f64,
    pub success_prob: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreComponents {
    pub ttv: f64,
    pub cost_term: f64,
    pub risk_term: f64,
    pub success_term: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptrScore {
    pub ttv: f64,
    pub cost: f64,
    pub risk: f64,
    pub success_prob: f64,
    /// `+inf` marks an inadmissible candidate.
    #[serde(with = "total_repr")]
    pub total: f64,
    pub components: ScoreComponents,
}

impl OptrScore {
    pub fn is_admissible(&self) -> bool {
        self.total.is_finite()
    }

    pub(crate) fn mark_inadmissible(&mut self) {
        self.total = f64::INFINITY;
    }
}

/// `total = ttv + λC·cost + λR·risk − λP·ln(max(successProb, ε))`. Lower is better.
pub fn score_path(features: &CandidateFeatures, weights: &OptrWeights) -> OptrScore {
    let cost_term = weights.lambda_c * features.cost;
    let risk_term = weights.lambda_r * features.risk;
    let success_term = -weights.lambda_p * features.success_prob.max(SUCCESS_PROB_FLOOR).ln();
    OptrScore {
        ttv: features.ttv,
        cost: features.cost,
        risk: features.risk,
        success_prob: features.success_prob,
        total: features.ttv + cost_term + risk_term + success_term,
        components: ScoreComponents {
            ttv: features.ttv,
            cost_term,
            risk_term,
            success_term,
        },
    }
}

/// JSON has no infinity; non-finite totals travel as strings.
mod total_repr {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_f64(*value)
        } else if value.is_nan() {
            serializer.serialize_str("NaN")
        } else if *value > 0.0 {
            serializer.serialize_str("Infinity")
        } else {
            serializer.serialize_str("-Infinity")
        }
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f64),
        Text(String),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Number(n) => Ok(n),
            Repr::Text(t) => match t.as_str() {
                "Infinity" => Ok(f64::INFINITY),
                "-Infinity" => Ok(f64::NEG_INFINITY),
                "NaN" => Ok(f64::NAN),
                other => Err(D::Error::custom(format!("invalid score total: {other}"))),
            },
        }
    }
}
