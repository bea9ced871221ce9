//! # Core Type Definitions
//!
//! This module contains the shared types of the flashcheck engine:
//! - Log input (`LogLine`)
//! - Domain events produced by the matcher (`Event`, `EventKind`)
//! - Session attributes (`Mode`, `AbortReason`)
//! - Error types (`FlashcheckError`)
//!
//! ## Time
//!
//! Every timestamp is a `DateTime<Utc>` supplied by the caller. The CORE
//! never reads the clock, which keeps the sequencer replayable in tests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// =============================================================================
// LOG LINE
// =============================================================================

/// One decoded line of device output.
///
/// Lines are matched once and then dropped; only derived events and the
/// raw capture file outlive them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    /// Decoded text with control sequences removed.
    pub text: String,
    /// When the line (or its terminator) arrived.
    pub arrived_at: DateTime<Utc>,
}

impl LogLine {
    /// Create a new log line.
    #[must_use]
    pub fn new(text: impl Into<String>, arrived_at: DateTime<Utc>) -> Self {
        Self {
            text: text.into(),
            arrived_at,
        }
    }
}

// =============================================================================
// EVENTS
// =============================================================================

/// A domain event recognized in the device log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    ResetDetected,
    FactoryModeDetected,
    RtcSignal,
    /// Pressure reading; `None` when the number could not be parsed.
    PressureSignal(Option<f64>),
    ButtonPromptDetected,
    ButtonConfirmed,
    HwVersionPrompt,
    SnPrompt,
}

impl Event {
    /// The payload-free kind of this event.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Event::ResetDetected => EventKind::Reset,
            Event::FactoryModeDetected => EventKind::FactoryMode,
            Event::RtcSignal => EventKind::Rtc,
            Event::PressureSignal(_) => EventKind::Pressure,
            Event::ButtonPromptDetected => EventKind::ButtonPrompt,
            Event::ButtonConfirmed => EventKind::ButtonConfirmed,
            Event::HwVersionPrompt => EventKind::HwVersionPrompt,
            Event::SnPrompt => EventKind::SnPrompt,
        }
    }
}

/// Event discriminant, usable as an ordered map key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Reset,
    FactoryMode,
    Rtc,
    Pressure,
    ButtonPrompt,
    ButtonConfirmed,
    HwVersionPrompt,
    SnPrompt,
}

// =============================================================================
// MODE
// =============================================================================

/// Firmware build the device was flashed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Develop,
    Factory,
}

impl Mode {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Develop => "develop",
            Mode::Factory => "factory",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = FlashcheckError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "develop" | "dev" => Ok(Mode::Develop),
            "factory" => Ok(Mode::Factory),
            other => Err(FlashcheckError::InvalidInput(format!(
                "unknown mode '{}' (expected develop or factory)",
                other
            ))),
        }
    }
}

// =============================================================================
// ABORT REASON
// =============================================================================

/// Why a session stopped before reaching aggregation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AbortReason {
    /// The serial link went away.
    Disconnected(String),
    /// No reset banner within the reset timeout.
    ResetNotObserved,
    /// A serial number was needed but the operator input channel closed.
    OperatorUnavailable,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::Disconnected(detail) => write!(f, "disconnected: {}", detail),
            AbortReason::ResetNotObserved => f.write_str("reset not observed"),
            AbortReason::OperatorUnavailable => f.write_str("operator input unavailable"),
        }
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur in the flashcheck system.
///
/// - No silent failures
/// - Use `Result<T, FlashcheckError>` for fallible operations
/// - The CORE never panics; all errors are recoverable by the caller
#[derive(Debug, Error)]
pub enum FlashcheckError {
    /// The serial link failed or was closed.
    #[error("Serial link disconnected: {0}")]
    Disconnected(String),

    /// A serial-number rule could not be parsed.
    #[error("Invalid serial-number rule '{rule}': {reason}")]
    RuleParse { rule: String, reason: String },

    /// A bucket has issued every sequence its width allows.
    #[error("Sequence exhausted for bucket '{bucket}' (width {width})")]
    SequenceExhausted { bucket: String, width: u8 },

    /// A rule needs an input that was not provided (e.g. MAC address).
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Writing to the result store failed.
    #[error("Store write failed: {0}")]
    StoreWrite(String),

    /// Reading from the result store failed.
    #[error("Store read failed: {0}")]
    StoreRead(String),

    /// A serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Stored data failed an integrity check.
    #[error("Integrity check failed: {0}")]
    Integrity(String),

    /// The requested record does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Station configuration is invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(String),
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_kind_ignores_payload() {
        assert_eq!(
            Event::PressureSignal(Some(101.3)).kind(),
            Event::PressureSignal(None).kind()
        );
        assert_eq!(Event::SnPrompt.kind(), EventKind::SnPrompt);
    }

    #[test]
    fn mode_parses_case_insensitively() {
        assert_eq!("Factory".parse::<Mode>().expect("parse"), Mode::Factory);
        assert_eq!("dev".parse::<Mode>().expect("parse"), Mode::Develop);
        assert!("production".parse::<Mode>().is_err());
    }

    #[test]
    fn mode_display_round_trips() {
        for mode in [Mode::Develop, Mode::Factory] {
            assert_eq!(mode.to_string().parse::<Mode>().expect("parse"), mode);
        }
    }

    #[test]
    fn abort_reason_display() {
        let reason = AbortReason::Disconnected("port closed".to_string());
        assert_eq!(reason.to_string(), "disconnected: port closed");
    }
}
