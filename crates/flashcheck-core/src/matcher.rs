//! # Pattern Matcher
//!
//! Maps one log line to at most one [`Event`].
//!
//! Matching is a case-sensitive substring test over [`PATTERN_TABLE`],
//! evaluated in declared order; the first matching entry wins. A line that
//! matches nothing produces no event and survives only in the raw capture.

use crate::{Event, EventKind, LogLine};
use regex::Regex;
use std::sync::LazyLock;

static LEADING_NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[\s:=]*([+-]?\d+(?:\.\d+)?)").expect("static regex must compile")
});

static MAC_ADDRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b([0-9A-Fa-f]{2}[:-]){5}[0-9A-Fa-f]{2}\b").expect("static regex must compile")
});

// =============================================================================
// PATTERN TABLE
// =============================================================================

/// One matcher rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pattern {
    pub literal: &'static str,
    pub kind: EventKind,
}

/// The ordered rule table. Order is the tie-break.
pub const PATTERN_TABLE: &[Pattern] = &[
    Pattern {
        literal: "rst:",
        kind: EventKind::Reset,
    },
    Pattern {
        literal: "Factory Configuration Mode",
        kind: EventKind::FactoryMode,
    },
    Pattern {
        literal: "RTC Time now:",
        kind: EventKind::Rtc,
    },
    Pattern {
        literal: "Time passed",
        kind: EventKind::Rtc,
    },
    Pattern {
        literal: "Pressure Sensor Reading:",
        kind: EventKind::Pressure,
    },
    Pattern {
        literal: "Press button to continue",
        kind: EventKind::ButtonPrompt,
    },
    Pattern {
        literal: "Button pressed",
        kind: EventKind::ButtonConfirmed,
    },
    Pattern {
        literal: "Toggling LED",
        kind: EventKind::ButtonConfirmed,
    },
    Pattern {
        literal: "Toggling valve",
        kind: EventKind::ButtonConfirmed,
    },
    Pattern {
        literal: "Enter Hardware Version:",
        kind: EventKind::HwVersionPrompt,
    },
    Pattern {
        literal: "Enter Serial Number:",
        kind: EventKind::SnPrompt,
    },
    Pattern {
        literal: "Enter Device Code:",
        kind: EventKind::SnPrompt,
    },
];

// =============================================================================
// MATCHING
// =============================================================================

/// Match a log line against the rule table.
#[must_use]
pub fn match_line(line: &LogLine) -> Option<Event> {
    match_text(&line.text)
}

/// Match raw text against the rule table.
#[must_use]
pub fn match_text(text: &str) -> Option<Event> {
    PATTERN_TABLE.iter().find_map(|pattern| {
        text.find(pattern.literal).map(|at| {
            let rest = &text[at + pattern.literal.len()..];
            build_event(pattern.kind, rest)
        })
    })
}

/// Construct the event for a matched rule. `rest` is the text after the literal.
fn build_event(kind: EventKind, rest: &str) -> Event {
    match kind {
        EventKind::Reset => Event::ResetDetected,
        EventKind::FactoryMode => Event::FactoryModeDetected,
        EventKind::Rtc => Event::RtcSignal,
        EventKind::Pressure => Event::PressureSignal(parse_leading_number(rest)),
        EventKind::ButtonPrompt => Event::ButtonPromptDetected,
        EventKind::ButtonConfirmed => Event::ButtonConfirmed,
        EventKind::HwVersionPrompt => Event::HwVersionPrompt,
        EventKind::SnPrompt => Event::SnPrompt,
    }
}

/// Parse the first numeric token of `text`, e.g. `" 101.3 kPa"` -> `101.3`.
#[must_use]
pub fn parse_leading_number(text: &str) -> Option<f64> {
    let caps = LEADING_NUMBER.captures(text)?;
    caps.get(1)?
        .as_str()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}

/// Find a MAC address in a line, normalized to upper-case `AA:BB:CC:DD:EE:FF`.
#[must_use]
pub fn extract_mac(text: &str) -> Option<String> {
    MAC_ADDRESS
        .find(text)
        .map(|m| m.as_str().replace('-', ":").to_ascii_uppercase())
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_banner_matches() {
        assert_eq!(
            match_text("rst:0x1 (POWERON_RESET),boot:0x8 (SPI_FAST_FLASH_BOOT)"),
            Some(Event::ResetDetected)
        );
    }

    #[test]
    fn both_rtc_literals_match() {
        assert_eq!(match_text("RTC Time now: 12:00"), Some(Event::RtcSignal));
        assert_eq!(match_text("Time passed: 3s"), Some(Event::RtcSignal));
    }

    #[test]
    fn pressure_value_parsed() {
        assert_eq!(
            match_text("Pressure Sensor Reading: 101.3 kPa"),
            Some(Event::PressureSignal(Some(101.3)))
        );
        assert_eq!(
            match_text("Pressure Sensor Reading: -4"),
            Some(Event::PressureSignal(Some(-4.0)))
        );
    }

    #[test]
    fn unparseable_pressure_still_signals() {
        assert_eq!(
            match_text("Pressure Sensor Reading: ERR"),
            Some(Event::PressureSignal(None))
        );
    }

    #[test]
    fn button_confirmations() {
        for text in ["Button pressed", "Toggling LED on", "Toggling valve off"] {
            assert_eq!(match_text(text), Some(Event::ButtonConfirmed), "{}", text);
        }
    }

    #[test]
    fn serial_prompts() {
        assert_eq!(match_text("Enter Serial Number:"), Some(Event::SnPrompt));
        assert_eq!(match_text("Enter Device Code:"), Some(Event::SnPrompt));
        assert_eq!(
            match_text("Enter Hardware Version:"),
            Some(Event::HwVersionPrompt)
        );
    }

    #[test]
    fn matching_is_case_sensitive() {
        assert_eq!(match_text("button pressed"), None);
        assert_eq!(match_text("RST:0x1"), None);
    }

    #[test]
    fn first_declared_rule_wins() {
        // Contains both the reset literal and the RTC literal.
        assert_eq!(
            match_text("rst: RTC Time now: 00:00"),
            Some(Event::ResetDetected)
        );
    }

    #[test]
    fn unmatched_line_is_none() {
        assert_eq!(match_text("I (27) boot: compile time 12:00:00"), None);
        assert_eq!(match_text(""), None);
    }

    #[test]
    fn every_event_kind_has_a_rule() {
        let kinds = [
            EventKind::Reset,
            EventKind::FactoryMode,
            EventKind::Rtc,
            EventKind::Pressure,
            EventKind::ButtonPrompt,
            EventKind::ButtonConfirmed,
            EventKind::HwVersionPrompt,
            EventKind::SnPrompt,
        ];
        for kind in kinds {
            assert!(
                PATTERN_TABLE.iter().any(|p| p.kind == kind),
                "{:?} has no rule",
                kind
            );
        }
    }

    #[test]
    fn mac_extraction_normalizes() {
        assert_eq!(
            extract_mac("WiFi MAC: 24-0a-c4-12-ab-cd ready").as_deref(),
            Some("24:0A:C4:12:AB:CD")
        );
        assert_eq!(extract_mac("no address here"), None);
    }
}
