//! In-memory store.

use super::ResultStore;
use crate::FlashcheckError;
use crate::serial_number::{ReserveRequest, SerialNumberRecord, next_sequence};
use crate::session::TestSession;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct Inner {
    /// (started_at, session_id) -> session
    sessions: BTreeMap<(DateTime<Utc>, String), TestSession>,
    /// (bucket, sequence) -> record
    serials: BTreeMap<(String, u32), SerialNumberRecord>,
}

/// Volatile store backed by ordered maps.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, FlashcheckError> {
        self.inner
            .lock()
            .map_err(|_| FlashcheckError::StoreWrite("memory store lock poisoned".to_string()))
    }
}

fn max_in(inner: &Inner, bucket: &str) -> Option<u32> {
    inner
        .serials
        .range((bucket.to_string(), 0)..=(bucket.to_string(), u32::MAX))
        .next_back()
        .map(|((_, seq), _)| *seq)
}

impl ResultStore for MemoryStore {
    fn append_session(&self, session: &TestSession) -> Result<(), FlashcheckError> {
        let mut inner = self.lock()?;
        if inner
            .sessions
            .keys()
            .any(|(_, id)| id == &session.session_id)
        {
            return Err(FlashcheckError::StoreWrite(format!(
                "session {} already stored",
                session.session_id
            )));
        }
        inner.sessions.insert(
            (session.started_at, session.session_id.clone()),
            session.clone(),
        );
        Ok(())
    }

    fn session(&self, session_id: &str) -> Result<Option<TestSession>, FlashcheckError> {
        let inner = self.lock()?;
        Ok(inner
            .sessions
            .values()
            .find(|s| s.session_id == session_id)
            .cloned())
    }

    fn sessions(&self) -> Result<Vec<TestSession>, FlashcheckError> {
        Ok(self.lock()?.sessions.values().cloned().collect())
    }

    fn query_max_sequence(&self, bucket: &str) -> Result<Option<u32>, FlashcheckError> {
        let inner = self.lock()?;
        Ok(max_in(&inner, bucket))
    }

    fn reserve_sequence(
        &self,
        request: &ReserveRequest<'_>,
    ) -> Result<SerialNumberRecord, FlashcheckError> {
        let mut inner = self.lock()?;
        let sequence = next_sequence(max_in(&inner, request.bucket), request.bucket, request.width)?;
        let record = SerialNumberRecord::issue(request, sequence)?;
        inner
            .serials
            .insert((record.bucket.clone(), sequence), record.clone());
        Ok(record)
    }

    fn serial_records(
        &self,
        bucket: Option<&str>,
    ) -> Result<Vec<SerialNumberRecord>, FlashcheckError> {
        let inner = self.lock()?;
        Ok(inner
            .serials
            .values()
            .filter(|r| bucket.is_none_or(|b| r.bucket == b))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Mode;
    use crate::session::SessionContext;
    use std::sync::Arc;

    fn request(bucket: &str) -> ReserveRequest<'_> {
        ReserveRequest {
            bucket,
            width: 3,
            session_id: "s",
            issued_at: Utc::now(),
        }
    }

    #[test]
    fn buckets_are_independent() {
        let store = MemoryStore::new();
        store.reserve_sequence(&request("A")).expect("reserve");
        store.reserve_sequence(&request("A")).expect("reserve");
        store.reserve_sequence(&request("B")).expect("reserve");
        assert_eq!(store.query_max_sequence("A").expect("max"), Some(2));
        assert_eq!(store.query_max_sequence("B").expect("max"), Some(1));
        assert_eq!(store.query_max_sequence("C").expect("max"), None);
        assert_eq!(store.serial_records(Some("A")).expect("records").len(), 2);
    }

    #[test]
    fn concurrent_reservations_are_unique() {
        let store = Arc::new(MemoryStore::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    (0..25)
                        .map(|_| store.reserve_sequence(&request("261019")).expect("reserve"))
                        .map(|r| r.sequence)
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut all: Vec<u32> = handles
            .into_iter()
            .flat_map(|h| h.join().expect("join"))
            .collect();
        all.sort_unstable();
        assert_eq!(all, (1..=200).collect::<Vec<_>>());
        assert!(store.verify_serial_ledger().expect("verify").is_clean());
    }

    #[test]
    fn duplicate_session_rejected() {
        let store = MemoryStore::new();
        let session = TestSession::begin(SessionContext {
            session_id: "dup".to_string(),
            port: "p".to_string(),
            chip_type: "esp32".to_string(),
            mode: Mode::Develop,
            mac_address: None,
            raw_log_path: None,
            started_at: Utc::now(),
        });
        store.append_session(&session).expect("first");
        assert!(matches!(
            store.append_session(&session),
            Err(FlashcheckError::StoreWrite(_))
        ));
        assert_eq!(store.sessions().expect("sessions").len(), 1);
        assert!(store.session("dup").expect("lookup").is_some());
    }
}
