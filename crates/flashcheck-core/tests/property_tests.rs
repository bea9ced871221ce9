//! # Property-Based Tests
//!
//! Invariants of the reader, matcher, aggregator and serial ledger,
//! checked with proptest.

use chrono::{TimeZone, Utc};
use flashcheck_core::serial_number::{ReserveRequest, compose_serial, max_sequence};
use flashcheck_core::{
    AbortReason, LineAssembler, MemoryStore, ResultStore, StageId, StageOutcome, StageStatus,
    aggregate, clean_line, match_text,
};
use proptest::collection::vec;
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::time::Duration;

fn status_strategy() -> impl Strategy<Value = StageStatus> {
    prop_oneof![
        Just(StageStatus::Pass),
        Just(StageStatus::Fail),
        Just(StageStatus::Timeout),
        Just(StageStatus::Skipped),
    ]
}

// =============================================================================
// PROPERTY TESTS
// =============================================================================

proptest! {
    /// Matching arbitrary text never panics, and pressure values are finite.
    #[test]
    fn matcher_total_on_arbitrary_text(text in ".{0,200}") {
        if let Some(flashcheck_core::Event::PressureSignal(Some(v))) = match_text(&text) {
            prop_assert!(v.is_finite());
        }
    }

    /// Cleaned lines are never empty, trimmed, and carry no carriage returns.
    #[test]
    fn clean_line_output_is_tidy(bytes in vec(any::<u8>(), 0..300)) {
        if let Some(line) = clean_line(&bytes) {
            prop_assert!(!line.is_empty());
            prop_assert!(!line.contains('\r'));
            prop_assert_eq!(line.trim(), line.as_str());
        }
    }

    /// How the byte stream is chunked does not change the lines produced.
    #[test]
    fn line_assembly_ignores_chunking(
        lines in vec("[a-zA-Z0-9 :.]{1,40}", 1..20),
        cut in 1usize..17
    ) {
        let stream: Vec<u8> = lines.iter().flat_map(|l| format!("{l}\n").into_bytes()).collect();
        let now = Utc.timestamp_millis_opt(0).single().expect("timestamp");

        let mut whole = LineAssembler::new(Duration::from_millis(100));
        let expected: Vec<String> = whole.push(&stream, now).into_iter().map(|l| l.text).collect();

        let mut chunked = LineAssembler::new(Duration::from_millis(100));
        let mut got = Vec::new();
        for chunk in stream.chunks(cut) {
            got.extend(chunked.push(chunk, now).into_iter().map(|l| l.text));
        }
        prop_assert_eq!(got, expected);
        prop_assert!(!chunked.has_pending());
    }

    /// The verdict is PASS iff nothing failed and the session was not aborted.
    #[test]
    fn verdict_pass_iff_all_acceptable(
        statuses in vec(status_strategy(), 0..7),
        aborted in any::<bool>()
    ) {
        let now = Utc::now();
        let outcomes: Vec<StageOutcome> = StageId::ALL
            .iter()
            .zip(&statuses)
            .map(|(stage, status)| StageOutcome::new(*stage, *status, now, now))
            .collect();
        let reason = aborted.then(|| AbortReason::Disconnected("gone".to_string()));

        let verdict = aggregate(&outcomes, reason.as_ref());
        let all_ok = statuses.iter().all(|s| s.is_acceptable());
        prop_assert_eq!(verdict.is_pass(), all_ok && !aborted);
        prop_assert_eq!(
            verdict.failed_stages().len(),
            statuses.iter().filter(|s| !s.is_acceptable()).count()
        );
    }

    /// Reservations in any bucket order yield 1, 2, 3, ... per bucket.
    #[test]
    fn serials_unique_and_contiguous(picks in vec(0usize..3, 1..60)) {
        let buckets = ["SN261019", "SN261020", "642643"];
        let store = MemoryStore::new();
        let now = Utc::now();
        let mut seen: BTreeMap<&str, u32> = BTreeMap::new();

        for pick in picks {
            let bucket = buckets[pick];
            let record = store
                .reserve_sequence(&ReserveRequest {
                    bucket,
                    width: 3,
                    session_id: "prop",
                    issued_at: now,
                })
                .expect("reserve");
            let count = seen.entry(bucket).or_insert(0);
            *count += 1;
            prop_assert_eq!(record.sequence, *count);
            prop_assert_eq!(record.serial, compose_serial(bucket, *count, 3));
        }

        let report = store.verify_serial_ledger().expect("verify");
        prop_assert!(report.is_clean());
    }

    /// A composed serial is the bucket plus exactly `width` digits.
    #[test]
    fn composed_serial_has_fixed_width(width in 1u8..=9, seed in any::<u32>()) {
        let sequence = seed % max_sequence(width) + 1;
        let serial = compose_serial("B", sequence, width);
        prop_assert_eq!(serial.len(), 1 + usize::from(width));
        prop_assert_eq!(serial[1..].parse::<u32>().expect("digits"), sequence);
    }
}
