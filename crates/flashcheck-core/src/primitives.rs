//! # Station Primitives
//!
//! Hardcoded constants for the flashcheck CORE.
//!
//! Timeouts here are defaults only; a station configuration may override
//! every one of them. Limits and format constants are fixed.

// =============================================================================
// DEFAULT STAGE TIMEOUTS (milliseconds)
// =============================================================================

/// How long to wait for the device's reset banner before giving up.
pub const DEFAULT_RESET_TIMEOUT_MS: u64 = 60_000;

/// Window in which "Factory Configuration Mode" may appear after reset.
pub const DEFAULT_FACTORY_MODE_WINDOW_MS: u64 = 2_000;

/// Time allowed for the RTC self-check line.
pub const DEFAULT_RTC_TIMEOUT_MS: u64 = 10_000;

/// Time allowed for the pressure sensor reading.
pub const DEFAULT_PRESSURE_TIMEOUT_MS: u64 = 10_000;

/// Time allowed for the device to ask for a button press.
pub const DEFAULT_BUTTON_PROMPT_TIMEOUT_MS: u64 = 30_000;

/// Time the operator has to press the button, counted from the prompt.
pub const DEFAULT_BUTTON_WINDOW_MS: u64 = 10_000;

/// Time allowed for the hardware-version and serial-number prompts.
pub const DEFAULT_PROMPT_TIMEOUT_MS: u64 = 30_000;

/// Partial data older than this is flushed as a best-effort line.
pub const DEFAULT_LINE_FLUSH_MS: u64 = 100;

/// Default monitor baud rate.
pub const DEFAULT_MONITOR_BAUD: u32 = 115_200;

// =============================================================================
// INPUT LIMITS
// =============================================================================

/// Maximum length of one log line in bytes.
///
/// A device that never sends a terminator is force-flushed at this size.
pub const MAX_LINE_LENGTH: usize = 4096;

/// Maximum length of an operator-supplied value (hardware version, serial).
pub const MAX_OPERATOR_VALUE_LENGTH: usize = 128;

/// Maximum zero-padded width of a serial-number sequence.
pub const MAX_SEQUENCE_WIDTH: u8 = 9;

// =============================================================================
// RECORD FORMAT
// =============================================================================

/// Magic bytes for stored records.
///
/// - Record = Magic Bytes ("FCHK") + Version (u8) before payload.
pub const MAGIC_BYTES: &[u8; 4] = b"FCHK";

/// Current record format version.
///
/// Increment this when making breaking changes to the record format.
pub const FORMAT_VERSION: u8 = 1;

/// Maximum accepted size of one stored record.
pub const MAX_RECORD_SIZE: usize = 1024 * 1024;
