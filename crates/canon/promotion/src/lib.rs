//! Canon Promotion - the gate knowledge passes to move up one level.
//!
//! A promotion is approved only when all four tests hold, and only ever
//! advances EVIDENCE to PROPOSED or PROPOSED to CANON. A rejected decision
//! names each failed test together with a remediation hint.

#![deny(unsafe_code)]

use canon_types::{CanonLevel, PromotionDecision, PromotionTest, PromotionTests};
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{info, warn};

pub type PromotionResult<T> = Result<T, PromotionError>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PromotionError {
    #[error("promotion {from} -> {to} skips or reverses a level")]
    InvalidPath { from: CanonLevel, to: CanonLevel },

    #[error("item {0} is already CANON")]
    AlreadyCanon(String),
}

/// What a submitter should provide to make a failed test pass.
pub fn remediation(test: PromotionTest) -> &'static str {
    match test {
        PromotionTest::Resistance => {
            "Provide evidence showing constraints bound and failure was possible"
        }
        PromotionTest::Reproducibility => {
            "Provide repeated trials demonstrating stable outcome across contexts"
        }
        PromotionTest::InvariantSafety => {
            "Show invariant checks pass under admissible paths; list checked invariants"
        }
        PromotionTest::FeasibilityImpact => {
            "Explain how this changes the admissible action set; provide deltaPiSummary"
        }
    }
}

/// Only single-step upward transitions are legal.
pub fn validate_promotion_path(from: CanonLevel, to: CanonLevel) -> PromotionResult<()> {
    if from.next() == Some(to) {
        Ok(())
    } else {
        Err(PromotionError::InvalidPath { from, to })
    }
}

/// Evaluate the four promotion tests for `item_id` currently at `from`.
pub fn promotion_gate(
    ts: DateTime<Utc>,
    item_id: &str,
    from: CanonLevel,
    tests: PromotionTests,
) -> PromotionResult<PromotionDecision> {
    let to = from
        .next()
        .ok_or_else(|| PromotionError::AlreadyCanon(item_id.to_string()))?;

    let failed_tests = tests.failed();
    let approved = failed_tests.is_empty();
    let reason = if approved {
        format!("All promotion tests passed; {from} -> {to}")
    } else {
        let names: Vec<&str> = failed_tests.iter().map(|t| t.as_str()).collect();
        format!("Promotion tests failed: {}", names.join(", "))
    };
    let remediation: Vec<String> = failed_tests
        .iter()
        .map(|t| remediation(*t).to_string())
        .collect();

    if approved {
        info!(item_id, %from, %to, "promotion approved");
    } else {
        warn!(item_id, %from, failed = failed_tests.len(), "promotion rejected");
    }

    Ok(PromotionDecision {
        ts,
        item_id: item_id.to_string(),
        from,
        to,
        tests,
        approved,
        reason,
        failed_tests,
        remediation,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn tests(r: bool, p: bool, i: bool, f: bool) -> PromotionTests {
        PromotionTests {
            resistance: r,
            reproducible: p,
            invariant_safe: i,
            feasibility_impact: f,
            evidence_refs: vec![],
        }
    }

    #[test]
    fn all_tests_pass_approves_one_level() {
        let d = promotion_gate(Utc::now(), "C1", CanonLevel::Evidence, tests(true, true, true, true))
            .unwrap();
        assert!(d.approved);
        assert_eq!(d.to, CanonLevel::Proposed);
        assert!(d.failed_tests.is_empty());
    }

    #[test]
    fn failures_are_named_with_remediation() {
        let d = promotion_gate(
            Utc::now(),
            "C1",
            CanonLevel::Proposed,
            tests(true, false, true, false),
        )
        .unwrap();
        assert!(!d.approved);
        assert_eq!(
            d.failed_tests,
            vec![PromotionTest::Reproducibility, PromotionTest::FeasibilityImpact]
        );
        assert_eq!(d.remediation.len(), 2);
        assert_eq!(
            d.reason,
            "Promotion tests failed: reproducibility, feasibilityImpact"
        );
    }

    #[test]
    fn canon_cannot_be_promoted_further() {
        let err = promotion_gate(Utc::now(), "C1", CanonLevel::Canon, tests(true, true, true, true))
            .unwrap_err();
        assert_eq!(err, PromotionError::AlreadyCanon("C1".into()));
    }

    #[test]
    fn path_validation() {
        assert!(validate_promotion_path(CanonLevel::Evidence, CanonLevel::Proposed).is_ok());
        assert!(validate_promotion_path(CanonLevel::Proposed, CanonLevel::Canon).is_ok());
        assert!(validate_promotion_path(CanonLevel::Canon, CanonLevel::Proposed).is_err());
        assert!(validate_promotion_path(CanonLevel::Proposed, CanonLevel::Proposed).is_err());
    }

    proptest! {
        #[test]
        fn evidence_to_canon_is_always_rejected(
            r in any::<bool>(), p in any::<bool>(), i in any::<bool>(), f in any::<bool>()
        ) {
            prop_assert!(validate_promotion_path(CanonLevel::Evidence, CanonLevel::Canon).is_err());
            let d = promotion_gate(Utc::now(), "C1", CanonLevel::Evidence, tests(r, p, i, f)).unwrap();
            prop_assert_eq!(d.to, CanonLevel::Proposed);
            prop_assert_eq!(d.approved, r && p && i && f);
        }
    }
}
