//! # Log Stream Reader
//!
//! Turns raw serial bytes into decoded, timestamped [`LogLine`] values.
//!
//! The blocking read loop lives in the app layer; this module holds the pure
//! part: buffering, line splitting, decoding and the soft flush timeout.
//! Prompts such as `Enter Serial Number: ` carry no terminator, so a partial
//! line that sits idle for longer than the flush interval is emitted as is.
//!
//! Decoding rules:
//! - invalid UTF-8 is replaced, never rejected
//! - `\r` and ANSI escape sequences are removed
//! - surrounding whitespace is trimmed and empty lines are dropped
//! - a line longer than [`MAX_LINE_LENGTH`] is force-flushed

use crate::LogLine;
use crate::primitives::MAX_LINE_LENGTH;
use chrono::{DateTime, TimeDelta, Utc};
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;

static ANSI_ESCAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1B(?:[@-Z\\-_]|\[[0-?]*[ -/]*[@-~])").expect("static regex must compile")
});

/// Decode one raw line. Returns `None` when nothing printable remains.
#[must_use]
pub fn clean_line(raw: &[u8]) -> Option<String> {
    let decoded = String::from_utf8_lossy(raw);
    let stripped = ANSI_ESCAPE.replace_all(&decoded, "");
    let text: String = stripped.chars().filter(|c| *c != '\r').collect();
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

// =============================================================================
// LINE ASSEMBLER
// =============================================================================

/// Accumulates bytes and yields complete lines.
#[derive(Debug)]
pub struct LineAssembler {
    buffer: Vec<u8>,
    last_data_at: Option<DateTime<Utc>>,
    flush_after: TimeDelta,
}

impl LineAssembler {
    /// Create an assembler that flushes partial data idle for `flush_after`.
    #[must_use]
    pub fn new(flush_after: Duration) -> Self {
        Self {
            buffer: Vec::with_capacity(256),
            last_data_at: None,
            flush_after: TimeDelta::from_std(flush_after).unwrap_or(TimeDelta::MAX),
        }
    }

    /// Feed bytes received at `now`; returns every line they completed.
    pub fn push(&mut self, bytes: &[u8], now: DateTime<Utc>) -> Vec<LogLine> {
        let mut lines = Vec::new();
        if bytes.is_empty() {
            return lines;
        }
        self.last_data_at = Some(now);

        for &byte in bytes {
            if byte == b'\n' {
                if let Some(line) = self.take(now) {
                    lines.push(line);
                }
                continue;
            }
            self.buffer.push(byte);
            if self.buffer.len() >= MAX_LINE_LENGTH
                && let Some(line) = self.take(now)
            {
                lines.push(line);
            }
        }
        lines
    }

    /// Emit the partial line if no data arrived for the flush interval.
    pub fn flush_if_stale(&mut self, now: DateTime<Utc>) -> Option<LogLine> {
        let last = self.last_data_at?;
        if self.buffer.is_empty() || now.signed_duration_since(last) < self.flush_after {
            return None;
        }
        // Stamped with the last byte's arrival, not the flush.
        self.take(last)
    }

    /// Emit whatever is buffered, e.g. when the link closes.
    pub fn finish(&mut self, now: DateTime<Utc>) -> Option<LogLine> {
        self.take(now)
    }

    /// Whether partial data is waiting for a terminator.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.buffer.is_empty()
    }

    fn take(&mut self, now: DateTime<Utc>) -> Option<LogLine> {
        if self.buffer.is_empty() {
            return None;
        }
        let raw = std::mem::take(&mut self.buffer);
        clean_line(&raw).map(|text| LogLine::new(text, now))
    }
}

impl Default for LineAssembler {
    fn default() -> Self {
        Self::new(Duration::from_millis(
            crate::primitives::DEFAULT_LINE_FLUSH_MS,
        ))
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_760_000_000_000 + ms)
            .single()
            .expect("valid timestamp")
    }

    #[test]
    fn splits_on_newline_and_strips_cr() {
        let mut asm = LineAssembler::default();
        let lines = asm.push(b"rst:0x1 (POWERON)\r\nRTC Time now: 12:00\r\n", t(0));
        let texts: Vec<_> = lines.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, vec!["rst:0x1 (POWERON)", "RTC Time now: 12:00"]);
        assert!(!asm.has_pending());
    }

    #[test]
    fn partial_line_waits_for_terminator() {
        let mut asm = LineAssembler::default();
        assert!(asm.push(b"Pressure Sensor", t(0)).is_empty());
        let lines = asm.push(b" Reading: 101.3\n", t(5));
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].text, "Pressure Sensor Reading: 101.3");
        assert_eq!(lines[0].arrived_at, t(5));
    }

    #[test]
    fn stale_partial_line_is_flushed() {
        let mut asm = LineAssembler::new(Duration::from_millis(100));
        asm.push(b"Enter Serial ", t(0));
        asm.push(b"Number: ", t(20));
        assert!(asm.flush_if_stale(t(50)).is_none());
        let line = asm.flush_if_stale(t(150)).expect("flushed");
        assert_eq!(line.text, "Enter Serial Number:");
        // Timed by its last byte, not by the flush.
        assert_eq!(line.arrived_at, t(20));
        assert!(asm.flush_if_stale(t(300)).is_none());
    }

    #[test]
    fn ansi_sequences_removed() {
        let mut asm = LineAssembler::default();
        let lines = asm.push(b"\x1b[0;32mI (312) boot: Button pressed\x1b[0m\n", t(0));
        assert_eq!(lines[0].text, "I (312) boot: Button pressed");
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let mut asm = LineAssembler::default();
        let lines = asm.push(b"Time \xff passed\n", t(0));
        assert_eq!(lines.len(), 1);
        assert!(lines[0].text.contains("passed"));
    }

    #[test]
    fn blank_lines_dropped() {
        let mut asm = LineAssembler::default();
        assert!(asm.push(b"\r\n   \n\x1b[0m\n", t(0)).is_empty());
    }

    #[test]
    fn overlong_line_force_flushed() {
        let mut asm = LineAssembler::default();
        let data = vec![b'a'; MAX_LINE_LENGTH + 10];
        let lines = asm.push(&data, t(0));
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].text.len(), MAX_LINE_LENGTH);
        assert!(asm.has_pending());
    }

    #[test]
    fn finish_returns_tail() {
        let mut asm = LineAssembler::default();
        asm.push(b"Toggling LED", t(0));
        let line = asm.finish(t(1)).expect("tail");
        assert_eq!(line.text, "Toggling LED");
        assert!(asm.finish(t(2)).is_none());
    }
}
