//! # Matcher Benchmarks
//!
//! Throughput of line assembly and pattern matching over a boot log.
//!
//! Run with: `cargo bench -p flashcheck-core`

use chrono::Utc;
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use flashcheck_core::{LineAssembler, extract_mac, match_text};
use std::hint::black_box;

const BOOT_LOG: &[&str] = &[
    "ets Jul 29 2019 12:21:46",
    "rst:0x1 (POWERON_RESET),boot:0x13 (SPI_FAST_FLASH_BOOT)",
    "configsip: 0, SPIWP:0xee",
    "I (29) boot: ESP-IDF v5.1.2 2nd stage bootloader",
    "I (312) wifi: mac: 24:0a:c4:12:ab:cd",
    "\u{1b}[0;32mI (400) app: RTC Time now: 2026-10-19 10:00:00\u{1b}[0m",
    "I (500) app: Pressure Sensor Reading: 101.3 kPa",
    "I (600) app: Press button to continue",
    "I (700) app: Button pressed",
    "Enter Hardware Version:",
    "Enter Serial Number:",
];

/// A log of roughly `lines` lines, mostly noise.
fn synthetic_log(lines: usize) -> Vec<u8> {
    let mut out = Vec::new();
    for i in 0..lines {
        let line = if i % 20 == 0 {
            BOOT_LOG[(i / 20) % BOOT_LOG.len()].to_string()
        } else {
            format!("I ({i}) task: heap free {}", 200_000 - (i % 1000))
        };
        out.extend_from_slice(line.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out
}

// =============================================================================
// BENCHMARKS
// =============================================================================

fn bench_match_text(c: &mut Criterion) {
    let mut group = c.benchmark_group("match_text");
    group.bench_function("boot_log", |b| {
        b.iter(|| {
            for line in BOOT_LOG {
                black_box(match_text(black_box(line)));
            }
        });
    });
    group.bench_function("noise_line", |b| {
        b.iter(|| black_box(match_text(black_box("I (1234) task: heap free 198765"))));
    });
    group.bench_function("extract_mac", |b| {
        b.iter(|| black_box(extract_mac(black_box("I (312) wifi: mac: 24:0a:c4:12:ab:cd"))));
    });
    group.finish();
}

fn bench_assemble_and_match(c: &mut Criterion) {
    let mut group = c.benchmark_group("assemble_and_match");

    for lines in [100usize, 1_000, 10_000] {
        let log = synthetic_log(lines);
        group.throughput(Throughput::Bytes(log.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(lines), &log, |b, log| {
            b.iter(|| {
                let now = Utc::now();
                let mut assembler = LineAssembler::default();
                let mut matched = 0usize;
                for chunk in log.chunks(64) {
                    for line in assembler.push(chunk, now) {
                        if match_text(&line.text).is_some() {
                            matched += 1;
                        }
                    }
                }
                black_box(matched)
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_match_text, bench_assemble_and_match);
criterion_main!(benches);
