//! # Result Storage
//!
//! Durable session records and the serial-number ledger.
//!
//! Two backends implement [`ResultStore`]:
//! - `MemoryStore`: volatile, for tests and dry runs
//! - `RedbStore`: disk-backed, ACID (redb)
//!
//! Both take `&self` so one store can be shared between concurrent
//! sessions; the sequence reservation is a single critical section.

mod memory;
mod redb_store;

pub use memory::MemoryStore;
pub use redb_store::RedbStore;

use crate::FlashcheckError;
use crate::serial_number::{LedgerReport, ReserveRequest, SerialNumberRecord, verify_ledger};
use crate::session::TestSession;

/// Storage interface shared by all backends.
pub trait ResultStore: Send + Sync {
    /// Persist one finalized (or aborted) session.
    ///
    /// Appending a session id that already exists replaces nothing and fails.
    fn append_session(&self, session: &TestSession) -> Result<(), FlashcheckError>;

    /// Look up one session.
    fn session(&self, session_id: &str) -> Result<Option<TestSession>, FlashcheckError>;

    /// All sessions, ordered by start time.
    fn sessions(&self) -> Result<Vec<TestSession>, FlashcheckError>;

    /// Highest sequence issued in `bucket`, if any.
    fn query_max_sequence(&self, bucket: &str) -> Result<Option<u32>, FlashcheckError>;

    /// Atomically read the bucket maximum, issue the next sequence and
    /// append its ledger record.
    fn reserve_sequence(
        &self,
        request: &ReserveRequest<'_>,
    ) -> Result<SerialNumberRecord, FlashcheckError>;

    /// Ledger records, for one bucket or all, ordered by bucket and sequence.
    fn serial_records(
        &self,
        bucket: Option<&str>,
    ) -> Result<Vec<SerialNumberRecord>, FlashcheckError>;

    /// Check digests and contiguity of the whole ledger.
    fn verify_serial_ledger(&self) -> Result<LedgerReport, FlashcheckError> {
        let records = self.serial_records(None)?;
        Ok(verify_ledger(&records))
    }
}
