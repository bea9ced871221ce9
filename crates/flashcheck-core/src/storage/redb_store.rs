//! # redb-backed Result Store
//!
//! Disk-backed storage for sessions and the serial ledger using the redb
//! embedded database.
//!
//! - ACID transactions; a committed session survives a crash
//! - Sequence reservation reads the bucket maximum and appends the new
//!   record inside one write transaction, so concurrent sessions sharing
//!   a store never observe the same maximum
//! - Records are stored as `formats::encode_record` bytes

use super::ResultStore;
use crate::formats::{decode_record, encode_record};
use crate::serial_number::{ReserveRequest, SerialNumberRecord, next_sequence};
use crate::session::TestSession;
use crate::{FlashcheckError, primitives};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use std::path::Path;

/// Sessions: (started_at millis, session_id) -> encoded TestSession
const SESSIONS: TableDefinition<(i64, &str), &[u8]> = TableDefinition::new("sessions");

/// Session id -> started_at millis, for point lookups
const SESSION_INDEX: TableDefinition<&str, i64> = TableDefinition::new("session_index");

/// Serial ledger: (bucket, sequence) -> encoded SerialNumberRecord
const SERIALS: TableDefinition<(&str, u32), &[u8]> = TableDefinition::new("serials");

/// Metadata: key -> u64
const METADATA: TableDefinition<&str, u64> = TableDefinition::new("metadata");

const FORMAT_KEY: &str = "format_version";

fn write_err(e: impl std::fmt::Display) -> FlashcheckError {
    FlashcheckError::StoreWrite(e.to_string())
}

fn read_err(e: impl std::fmt::Display) -> FlashcheckError {
    FlashcheckError::StoreRead(e.to_string())
}

/// A disk-backed result store.
pub struct RedbStore {
    db: Database,
}

impl std::fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStore").finish_non_exhaustive()
    }
}

impl RedbStore {
    /// Open or create a store at the given path.
    ///
    /// # Errors
    ///
    /// Returns `FlashcheckError::Integrity` if the file was written by an
    /// incompatible format version.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, FlashcheckError> {
        let db = Database::create(path.as_ref()).map_err(|e| FlashcheckError::Io(e.to_string()))?;

        let write_txn = db.begin_write().map_err(write_err)?;
        {
            let _ = write_txn.open_table(SESSIONS).map_err(write_err)?;
            let _ = write_txn.open_table(SESSION_INDEX).map_err(write_err)?;
            let _ = write_txn.open_table(SERIALS).map_err(write_err)?;
            let mut meta = write_txn.open_table(METADATA).map_err(write_err)?;

            let stored = meta.get(FORMAT_KEY).map_err(read_err)?.map(|v| v.value());
            match stored {
                None => {
                    meta.insert(FORMAT_KEY, u64::from(primitives::FORMAT_VERSION))
                        .map_err(write_err)?;
                }
                Some(v) if v == u64::from(primitives::FORMAT_VERSION) => {}
                Some(v) => {
                    return Err(FlashcheckError::Integrity(format!(
                        "store format version {} is not supported (expected {})",
                        v,
                        primitives::FORMAT_VERSION
                    )));
                }
            }
        }
        write_txn.commit().map_err(write_err)?;

        Ok(Self { db })
    }
}

impl ResultStore for RedbStore {
    fn append_session(&self, session: &TestSession) -> Result<(), FlashcheckError> {
        let bytes = encode_record(session)?;
        let started = session.started_at.timestamp_millis();

        let write_txn = self.db.begin_write().map_err(write_err)?;
        {
            let mut index = write_txn.open_table(SESSION_INDEX).map_err(write_err)?;
            if index
                .get(session.session_id.as_str())
                .map_err(read_err)?
                .is_some()
            {
                return Err(FlashcheckError::StoreWrite(format!(
                    "session {} already stored",
                    session.session_id
                )));
            }
            index
                .insert(session.session_id.as_str(), started)
                .map_err(write_err)?;

            let mut sessions = write_txn.open_table(SESSIONS).map_err(write_err)?;
            sessions
                .insert((started, session.session_id.as_str()), bytes.as_slice())
                .map_err(write_err)?;
        }
        write_txn.commit().map_err(write_err)
    }

    fn session(&self, session_id: &str) -> Result<Option<TestSession>, FlashcheckError> {
        let read_txn = self.db.begin_read().map_err(read_err)?;
        let index = read_txn.open_table(SESSION_INDEX).map_err(read_err)?;
        let Some(started) = index.get(session_id).map_err(read_err)?.map(|v| v.value()) else {
            return Ok(None);
        };

        let sessions = read_txn.open_table(SESSIONS).map_err(read_err)?;
        match sessions.get((started, session_id)).map_err(read_err)? {
            Some(bytes) => decode_record(bytes.value()).map(Some),
            None => Err(FlashcheckError::Integrity(format!(
                "session index points at missing record {session_id}"
            ))),
        }
    }

    fn sessions(&self) -> Result<Vec<TestSession>, FlashcheckError> {
        let read_txn = self.db.begin_read().map_err(read_err)?;
        let table = read_txn.open_table(SESSIONS).map_err(read_err)?;

        let mut sessions = Vec::new();
        for entry in table.iter().map_err(read_err)? {
            let (_, value) = entry.map_err(read_err)?;
            sessions.push(decode_record(value.value())?);
        }
        Ok(sessions)
    }

    fn query_max_sequence(&self, bucket: &str) -> Result<Option<u32>, FlashcheckError> {
        let read_txn = self.db.begin_read().map_err(read_err)?;
        let table = read_txn.open_table(SERIALS).map_err(read_err)?;
        let last = table
            .range((bucket, 0u32)..=(bucket, u32::MAX))
            .map_err(read_err)?
            .next_back()
            .transpose()
            .map_err(read_err)?;
        Ok(last.map(|(key, _)| key.value().1))
    }

    fn reserve_sequence(
        &self,
        request: &ReserveRequest<'_>,
    ) -> Result<SerialNumberRecord, FlashcheckError> {
        let write_txn = self.db.begin_write().map_err(write_err)?;
        let record = {
            let mut table = write_txn.open_table(SERIALS).map_err(write_err)?;
            let current = table
                .range((request.bucket, 0u32)..=(request.bucket, u32::MAX))
                .map_err(read_err)?
                .next_back()
                .transpose()
                .map_err(read_err)?
                .map(|(key, _)| key.value().1);

            let sequence = next_sequence(current, request.bucket, request.width)?;
            let record = SerialNumberRecord::issue(request, sequence)?;
            let bytes = encode_record(&record)?;
            table
                .insert((request.bucket, sequence), bytes.as_slice())
                .map_err(write_err)?;
            record
        };
        write_txn.commit().map_err(write_err)?;
        Ok(record)
    }

    fn serial_records(
        &self,
        bucket: Option<&str>,
    ) -> Result<Vec<SerialNumberRecord>, FlashcheckError> {
        let read_txn = self.db.begin_read().map_err(read_err)?;
        let table = read_txn.open_table(SERIALS).map_err(read_err)?;

        let mut records = Vec::new();
        let iter = match bucket {
            Some(b) => table.range((b, 0u32)..=(b, u32::MAX)),
            None => table.iter(),
        }
        .map_err(read_err)?;
        for entry in iter {
            let (_, value) = entry.map_err(read_err)?;
            records.push(decode_record(value.value())?);
        }
        Ok(records)
    }
}

// =============================================================================
// TESTS
// =============================================================================
