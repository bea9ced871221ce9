//! # Stages
//!
//! Stage identifiers, sequencer states and per-stage outcomes.
//!
//! ## Stage Order
//!
//! | State                 | Records outcome | Timeout effect            |
//! |-----------------------|-----------------|---------------------------|
//! | WaitReset             | Reset           | session aborted           |
//! | WaitFactoryMode       | FactoryMode     | no entry (window elapsed) |
//! | Rtc                   | Rtc             | TIMEOUT, continue         |
//! | Pressure              | Pressure        | TIMEOUT, continue         |
//! | Button                | Button          | TIMEOUT, continue         |
//! | AwaitHwVersionPrompt  | HwVersion       | TIMEOUT, continue         |
//! | AwaitSnPrompt         | SerialNumber    | TIMEOUT, continue         |
//! | Aggregate             | -               | -                         |
//!
//! `Done` and `Aborted` are terminal. Each state is entered at most once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// STAGE IDENTIFIERS
// =============================================================================

/// A stage that produces a recorded outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    Reset,
    FactoryMode,
    Rtc,
    Pressure,
    Button,
    HwVersion,
    SerialNumber,
}

impl StageId {
    /// All recorded stages in execution order.
    pub const ALL: [StageId; 7] = [
        StageId::Reset,
        StageId::FactoryMode,
        StageId::Rtc,
        StageId::Pressure,
        StageId::Button,
        StageId::HwVersion,
        StageId::SerialNumber,
    ];

    /// Stable machine name, used in records and CSV headers.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            StageId::Reset => "reset",
            StageId::FactoryMode => "factory_mode",
            StageId::Rtc => "rtc",
            StageId::Pressure => "pressure",
            StageId::Button => "button",
            StageId::HwVersion => "hw_version",
            StageId::SerialNumber => "serial_number",
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// SEQUENCER STATES
// =============================================================================

/// States of the stage sequencer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SequencerState {
    WaitReset,
    WaitFactoryMode,
    Rtc,
    Pressure,
    Button,
    AwaitHwVersionPrompt,
    AwaitSnPrompt,
    Aggregate,
    Done,
    Aborted,
}

impl SequencerState {
    /// Get the state name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            SequencerState::WaitReset => "Wait Reset",
            SequencerState::WaitFactoryMode => "Wait Factory Mode",
            SequencerState::Rtc => "RTC Check",
            SequencerState::Pressure => "Pressure Check",
            SequencerState::Button => "Button Check",
            SequencerState::AwaitHwVersionPrompt => "Hardware Version",
            SequencerState::AwaitSnPrompt => "Serial Number",
            SequencerState::Aggregate => "Aggregate",
            SequencerState::Done => "Done",
            SequencerState::Aborted => "Aborted",
        }
    }

    /// Get the next state on the normal path, if any.
    #[must_use]
    pub fn next(&self) -> Option<SequencerState> {
        match self {
            SequencerState::WaitReset => Some(SequencerState::WaitFactoryMode),
            SequencerState::WaitFactoryMode => Some(SequencerState::Rtc),
            SequencerState::Rtc => Some(SequencerState::Pressure),
            SequencerState::Pressure => Some(SequencerState::Button),
            SequencerState::Button => Some(SequencerState::AwaitHwVersionPrompt),
            SequencerState::AwaitHwVersionPrompt => Some(SequencerState::AwaitSnPrompt),
            SequencerState::AwaitSnPrompt => Some(SequencerState::Aggregate),
            SequencerState::Aggregate => Some(SequencerState::Done),
            SequencerState::Done | SequencerState::Aborted => None,
        }
    }

    /// The recorded stage this state produces, if any.
    #[must_use]
    pub fn stage(&self) -> Option<StageId> {
        match self {
            SequencerState::WaitReset => Some(StageId::Reset),
            SequencerState::WaitFactoryMode => Some(StageId::FactoryMode),
            SequencerState::Rtc => Some(StageId::Rtc),
            SequencerState::Pressure => Some(StageId::Pressure),
            SequencerState::Button => Some(StageId::Button),
            SequencerState::AwaitHwVersionPrompt => Some(StageId::HwVersion),
            SequencerState::AwaitSnPrompt => Some(StageId::SerialNumber),
            SequencerState::Aggregate | SequencerState::Done | SequencerState::Aborted => None,
        }
    }

    /// Check if this state is terminal.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, SequencerState::Done | SequencerState::Aborted)
    }
}

impl fmt::Display for SequencerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// OUTCOMES
// =============================================================================

/// Result of one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StageStatus {
    Pass,
    Fail,
    Timeout,
    Skipped,
}

impl StageStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Pass => "PASS",
            StageStatus::Fail => "FAIL",
            StageStatus::Timeout => "TIMEOUT",
            StageStatus::Skipped => "SKIPPED",
        }
    }

    /// PASS and SKIPPED do not fail a session.
    #[must_use]
    pub fn is_acceptable(&self) -> bool {
        matches!(self, StageStatus::Pass | StageStatus::Skipped)
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Finalized outcome of one stage. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageOutcome {
    pub stage: StageId,
    pub status: StageStatus,
    /// Measured value, e.g. the pressure reading.
    pub measured: Option<f64>,
    /// Matched device line or the value sent to the device.
    pub detail: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

impl StageOutcome {
    /// Create an outcome with no measurement or detail.
    #[must_use]
    pub fn new(
        stage: StageId,
        status: StageStatus,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
    ) -> Self {
        Self {
            stage,
            status,
            measured: None,
            detail: None,
            started_at,
            ended_at,
        }
    }

    #[must_use]
    pub fn with_measured(mut self, measured: Option<f64>) -> Self {
        self.measured = measured;
        self
    }

    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

// =============================================================================
// TESTS
// =============================================================================
