//! # Formats
//!
//! Pure encodings of sessions and ledger records. File I/O lives in the app.

mod persistence;
mod rows;

pub use persistence::{RecordHeader, decode_record, encode_record};
pub use rows::{SessionRow, write_csv};
