//! # Result Aggregator
//!
//! Pure reduction of stage outcomes into a session verdict.

use crate::AbortReason;
use crate::stage::{StageId, StageOutcome};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Overall result of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    /// Every recorded outcome was PASS or SKIPPED and the session completed.
    Pass,
    /// At least one outcome failed or timed out, or the session was aborted.
    Fail {
        failed_stages: Vec<StageId>,
        aborted: Option<AbortReason>,
    },
}

impl Verdict {
    #[must_use]
    pub fn is_pass(&self) -> bool {
        matches!(self, Verdict::Pass)
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Pass => "PASS",
            Verdict::Fail { .. } => "FAIL",
        }
    }

    /// Stages that failed or timed out.
    #[must_use]
    pub fn failed_stages(&self) -> &[StageId] {
        match self {
            Verdict::Pass => &[],
            Verdict::Fail { failed_stages, .. } => failed_stages,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Pass => f.write_str("PASS"),
            Verdict::Fail {
                failed_stages,
                aborted,
            } => {
                f.write_str("FAIL")?;
                if !failed_stages.is_empty() {
                    let names: Vec<&str> = failed_stages.iter().map(|s| s.name()).collect();
                    write!(f, " [{}]", names.join(", "))?;
                }
                if let Some(reason) = aborted {
                    write!(f, " (aborted: {})", reason)?;
                }
                Ok(())
            }
        }
    }
}

/// Reduce outcomes to a verdict.
///
/// An aborted session is always FAIL, even if every recorded outcome passed.
#[must_use]
pub fn aggregate(outcomes: &[StageOutcome], aborted: Option<&AbortReason>) -> Verdict {
    let failed_stages: Vec<StageId> = outcomes
        .iter()
        .filter(|o| !o.status.is_acceptable())
        .map(|o| o.stage)
        .collect();

    if failed_stages.is_empty() && aborted.is_none() {
        Verdict::Pass
    } else {
        Verdict::Fail {
            failed_stages,
            aborted: aborted.cloned(),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::StageStatus;
    use chrono::Utc;

    fn outcome(stage: StageId, status: StageStatus) -> StageOutcome {
        let now = Utc::now();
        StageOutcome::new(stage, status, now, now)
    }

    #[test]
    fn all_pass_or_skipped_is_pass() {
        let outcomes = vec![
            outcome(StageId::Reset, StageStatus::Pass),
            outcome(StageId::FactoryMode, StageStatus::Skipped),
            outcome(StageId::Rtc, StageStatus::Pass),
        ];
        assert_eq!(aggregate(&outcomes, None), Verdict::Pass);
    }

    #[test]
    fn empty_outcomes_pass() {
        assert!(aggregate(&[], None).is_pass());
    }

    #[test]
    fn timeout_and_fail_are_listed_in_order() {
        let outcomes = vec![
            outcome(StageId::Rtc, StageStatus::Timeout),
            outcome(StageId::Pressure, StageStatus::Pass),
            outcome(StageId::HwVersion, StageStatus::Fail),
        ];
        let verdict = aggregate(&outcomes, None);
        assert!(!verdict.is_pass());
        assert_eq!(
            verdict.failed_stages(),
            &[StageId::Rtc, StageId::HwVersion]
        );
        assert_eq!(verdict.to_string(), "FAIL [rtc, hw_version]");
    }

    #[test]
    fn abort_forces_fail() {
        let outcomes = vec![outcome(StageId::Reset, StageStatus::Pass)];
        let reason = AbortReason::Disconnected("unplugged".to_string());
        let verdict = aggregate(&outcomes, Some(&reason));
        assert_eq!(
            verdict,
            Verdict::Fail {
                failed_stages: vec![],
                aborted: Some(reason),
            }
        );
    }
}
