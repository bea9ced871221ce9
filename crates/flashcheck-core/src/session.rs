//! # Session Module
//!
//! The record of one self-test run against one freshly flashed device.
//!
//! A [`TestSession`] is created from a [`SessionContext`] when the self-test
//! begins, mutated only by the sequencer while stages run, finalized with a
//! verdict, and then handed to a store. Nothing here is global: the context
//! object carries everything a run needs.

use crate::aggregate::{Verdict, aggregate};
use crate::stage::{StageId, StageOutcome};
use crate::{AbortReason, Mode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// SESSION CONTEXT
// =============================================================================

/// Identity and environment of a run, fixed before the first stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionContext {
    pub session_id: String,
    /// Serial port identifier, e.g. `/dev/ttyUSB0`.
    pub port: String,
    pub chip_type: String,
    pub mode: Mode,
    /// MAC reported by the flashing subsystem, if any.
    pub mac_address: Option<String>,
    /// Where the raw device log is captured.
    pub raw_log_path: Option<String>,
    pub started_at: DateTime<Utc>,
}

// =============================================================================
// TEST SESSION
// =============================================================================

/// One complete self-test run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestSession {
    pub session_id: String,
    pub port: String,
    pub chip_type: String,
    pub mode: Mode,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub mac_address: Option<String>,
    /// Hardware revision sent to the device.
    pub hw_revision: Option<String>,
    /// Serial number / device code sent to the device.
    pub serial_number: Option<String>,
    /// Outcomes in the order the stages finished.
    pub outcomes: Vec<StageOutcome>,
    pub raw_log_path: Option<String>,
    pub aborted: bool,
    pub abort_reason: Option<AbortReason>,
    /// Set once the session is finalized.
    pub verdict: Option<Verdict>,
}

impl TestSession {
    /// Start a session from its context.
    #[must_use]
    pub fn begin(context: SessionContext) -> Self {
        Self {
            session_id: context.session_id,
            port: context.port,
            chip_type: context.chip_type,
            mode: context.mode,
            started_at: context.started_at,
            ended_at: None,
            mac_address: context.mac_address,
            hw_revision: None,
            serial_number: None,
            outcomes: Vec::new(),
            raw_log_path: context.raw_log_path,
            aborted: false,
            abort_reason: None,
            verdict: None,
        }
    }

    /// Record a stage outcome.
    ///
    /// Returns `false` and leaves the session untouched if the stage already
    /// has an outcome or the session is finalized.
    pub fn record(&mut self, outcome: StageOutcome) -> bool {
        if self.is_finalized() || self.outcome(outcome.stage).is_some() {
            return false;
        }
        self.outcomes.push(outcome);
        true
    }

    /// Outcome of a stage, if recorded.
    #[must_use]
    pub fn outcome(&self, stage: StageId) -> Option<&StageOutcome> {
        self.outcomes.iter().find(|o| o.stage == stage)
    }

    /// Pressure measured in a passing pressure stage.
    #[must_use]
    pub fn pressure(&self) -> Option<f64> {
        self.outcome(StageId::Pressure).and_then(|o| o.measured)
    }

    /// Keep the first MAC seen; later sightings are ignored.
    pub fn note_mac(&mut self, mac: String) {
        if self.mac_address.is_none() {
            self.mac_address = Some(mac);
        }
    }

    /// Mark the session aborted and finalize it.
    pub fn abort(&mut self, reason: AbortReason, now: DateTime<Utc>) {
        if self.is_finalized() {
            return;
        }
        self.aborted = true;
        self.abort_reason = Some(reason);
        self.finalize(now);
    }

    /// Aggregate outcomes into the verdict and stamp the end time.
    pub fn finalize(&mut self, now: DateTime<Utc>) {
        if self.is_finalized() {
            return;
        }
        self.ended_at = Some(now);
        self.verdict = Some(aggregate(&self.outcomes, self.abort_reason.as_ref()));
    }

    #[must_use]
    pub fn is_finalized(&self) -> bool {
        self.verdict.is_some()
    }

    /// Whether the finalized session passed.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.verdict.as_ref().is_some_and(Verdict::is_pass)
    }
}

// =============================================================================
// TESTS
// =============================================================================
