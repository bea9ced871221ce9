//! # flashcheck-core
//!
//! The self-test engine for flashcheck - THE LOGIC.
//!
//! After a board is flashed, its firmware prints a boot log and walks through
//! a fixed series of self-tests. This crate turns that log into a verdict:
//!
//! ```text
//! bytes -> reader -> LogLine -> matcher -> Event -> Sequencer -> StageOutcome
//!                                                      |
//!                                     serial_number <--+--> aggregate -> Verdict
//!                                                      |
//!                                                   storage
//! ```
//!
//! ## Architectural Constraints
//!
//! - No async, no network, no clock reads: the caller passes `now` in
//! - The sequencer never performs I/O; it returns `Action`s for the caller
//! - One `ResultStore` may be shared by many concurrent sessions

// =============================================================================
// MODULES
// =============================================================================

pub mod aggregate;
pub mod formats;
pub mod matcher;
pub mod primitives;
pub mod reader;
pub mod sequencer;
pub mod serial_number;
pub mod session;
pub mod stage;
pub mod storage;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{AbortReason, Event, EventKind, FlashcheckError, LogLine, Mode};

// =============================================================================
// RE-EXPORTS: Engine
// =============================================================================

pub use aggregate::{Verdict, aggregate};
pub use matcher::{PATTERN_TABLE, Pattern, extract_mac, match_line, match_text};
pub use reader::{LineAssembler, clean_line};
pub use sequencer::{
    Action, Input, OperatorField, OperatorInput, Sequencer, SequencerConfig, StageTimeouts,
};
pub use serial_number::{
    GenerateRequest, Issued, LedgerProblem, LedgerReport, SerialNumberGenerator,
    SerialNumberRecord, SerialRule, verify_ledger,
};
pub use session::{SessionContext, TestSession};
pub use stage::{SequencerState, StageId, StageOutcome, StageStatus};
pub use storage::{MemoryStore, RedbStore, ResultStore};

// =============================================================================
// RE-EXPORTS: Formats (from formats module)
// =============================================================================

pub use formats::{SessionRow, decode_record, encode_record, write_csv};
