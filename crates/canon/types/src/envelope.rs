use crate::error::{TypesError, TypesResult};
use serde::{Deserialize, Serialize};

/// Confidence and trust attached to a piece of knowledge.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfidenceEnvelope {
    pub confidence: f64,
    pub trust: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_refs: Vec<String>,
}

impl ConfidenceEnvelope {
    pub fn new(confidence: f64, trust: f64) -> TypesResult<Self> {
        check_unit("confidence", confidence)?;
        check_unit("trust", trust)?;
        Ok(Self {
            confidence,
            trust,
            weight: None,
            source_refs: Vec::new(),
        })
    }

    pub fn with_source_refs(mut self, refs: impl IntoIterator<Item = String>) -> Self {
        self.source_refs = refs.into_iter().collect();
        self
    }

    /// Explicit weight, or `confidence * trust` when none was given.
    pub fn effective_weight(&self) -> f64 {
        self.weight.unwrap_or(self.confidence * self.trust)
    }
}

fn check_unit(field: &'static str, value: f64) -> TypesResult<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(TypesError::OutOfRange { field, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weight_defaults_to_product() {
        let env = ConfidenceEnvelope::new(0.5, 0.8).unwrap();
        assert!((env.effective_weight() - 0.4).abs() < 1e-12);
    }

    #[test]
    fn rejects_out_of_range() {
        assert!(ConfidenceEnvelope::new(1.2, 0.5).is_err());
        assert!(ConfidenceEnvelope::new(0.5, f64::NAN).is_err());
    }
}
