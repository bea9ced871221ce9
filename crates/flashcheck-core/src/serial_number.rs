//! # Serial-Number Generator
//!
//! Rules, date buckets and the append-only serial ledger.
//!
//! ## Rule Grammar
//!
//! ```text
//! rule      := [prefix ":"] dateparts [":" suffix] "+" width "digit"
//!            | "MAC" digits
//! dateparts := ( "YYYY" | "YY" | "MM" | "DD" | "WW" )+
//! ```
//!
//! | Rule               | 2026-10-19, first issue |
//! |--------------------|-------------------------|
//! | `YYMMDD+2digit`    | `26101901`              |
//! | `SN:YYMMDD+3digit` | `SN261019001`           |
//! | `64:YYWW:1+5digit` | `642643100001`          |
//! | `MAC6`             | last 6 hex of the MAC   |
//!
//! The bucket is everything before the sequence (prefix, date, suffix).
//! Sequences start at 1 in each bucket and never exceed `10^width - 1`.
//! When `WW` is present, year tokens render the ISO week-numbering year.

use crate::storage::ResultStore;
use crate::{FlashcheckError, primitives::MAX_SEQUENCE_WIDTH};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

// =============================================================================
// RULES
// =============================================================================

/// A date token inside a dated rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatePart {
    Year4,
    Year2,
    Month,
    Day,
    IsoWeek,
}

impl DatePart {
    fn token(&self) -> &'static str {
        match self {
            DatePart::Year4 => "YYYY",
            DatePart::Year2 => "YY",
            DatePart::Month => "MM",
            DatePart::Day => "DD",
            DatePart::IsoWeek => "WW",
        }
    }
}

/// A parsed serial-number rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SerialRule {
    /// Date-bucketed, sequence-based numbers.
    Dated {
        prefix: String,
        parts: Vec<DatePart>,
        suffix: String,
        width: u8,
    },
    /// Last `digits` hex characters of the device MAC, upper-case.
    MacSuffix { digits: u8 },
}

fn rule_error(rule: &str, reason: impl Into<String>) -> FlashcheckError {
    FlashcheckError::RuleParse {
        rule: rule.to_string(),
        reason: reason.into(),
    }
}

fn is_literal(s: &str) -> bool {
    s.chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn parse_date_parts(rule: &str, template: &str) -> Result<Vec<DatePart>, FlashcheckError> {
    let mut parts = Vec::new();
    let mut rest = template;
    while !rest.is_empty() {
        let part = [
            DatePart::Year4,
            DatePart::Year2,
            DatePart::Month,
            DatePart::Day,
            DatePart::IsoWeek,
        ]
        .into_iter()
        .find(|p| rest.starts_with(p.token()))
        .ok_or_else(|| rule_error(rule, format!("unexpected date token at '{}'", rest)))?;
        rest = &rest[part.token().len()..];
        parts.push(part);
    }
    if parts.is_empty() {
        return Err(rule_error(rule, "rule needs at least one date token"));
    }
    Ok(parts)
}

impl SerialRule {
    /// Parse a rule string.
    pub fn parse(rule: &str) -> Result<Self, FlashcheckError> {
        let trimmed = rule.trim();

        // Rule names used by older station configs.
        match trimmed {
            "SN: YYMMDD+序号" => return Self::parse("SN:YYMMDD+3digit"),
            "MAC后6位" => return Self::parse("MAC6"),
            _ => {}
        }

        if let Some(digits) = trimmed.strip_prefix("MAC") {
            let digits: u8 = digits
                .parse()
                .map_err(|_| rule_error(rule, "MAC rule needs a digit count, e.g. MAC6"))?;
            if !(1..=12).contains(&digits) {
                return Err(rule_error(rule, "MAC digit count must be 1..=12"));
            }
            return Ok(SerialRule::MacSuffix { digits });
        }

        let (template, width) = trimmed
            .rsplit_once('+')
            .ok_or_else(|| rule_error(rule, "missing '+<N>digit' sequence part"))?;
        let width: u8 = width
            .strip_suffix("digit")
            .ok_or_else(|| rule_error(rule, "sequence part must end with 'digit'"))?
            .parse()
            .map_err(|_| rule_error(rule, "sequence width is not a number"))?;
        if width == 0 || width > MAX_SEQUENCE_WIDTH {
            return Err(rule_error(
                rule,
                format!("sequence width must be 1..={}", MAX_SEQUENCE_WIDTH),
            ));
        }

        let segments: Vec<&str> = template.split(':').collect();
        let (prefix, dates, suffix) = match segments.as_slice() {
            [dates] => ("", *dates, ""),
            [prefix, dates] => (*prefix, *dates, ""),
            [prefix, dates, suffix] => (*prefix, *dates, *suffix),
            _ => return Err(rule_error(rule, "too many ':' separators")),
        };
        let (prefix, suffix) = (prefix.trim(), suffix.trim());
        if !is_literal(prefix) || !is_literal(suffix) {
            return Err(rule_error(
                rule,
                "prefix and suffix may only contain letters, digits, '-' or '_'",
            ));
        }

        Ok(SerialRule::Dated {
            prefix: prefix.to_string(),
            parts: parse_date_parts(rule, dates.trim())?,
            suffix: suffix.to_string(),
            width,
        })
    }

    /// The bucket for `date`, or `None` for rules without a sequence.
    #[must_use]
    pub fn bucket(&self, date: NaiveDate) -> Option<String> {
        let SerialRule::Dated {
            prefix,
            parts,
            suffix,
            ..
        } = self
        else {
            return None;
        };

        let iso = date.iso_week();
        let year = if parts.contains(&DatePart::IsoWeek) {
            iso.year()
        } else {
            date.year()
        };

        let mut out = prefix.clone();
        for part in parts {
            let rendered = match part {
                DatePart::Year4 => format!("{:04}", year),
                DatePart::Year2 => format!("{:02}", year.rem_euclid(100)),
                DatePart::Month => format!("{:02}", date.month()),
                DatePart::Day => format!("{:02}", date.day()),
                DatePart::IsoWeek => format!("{:02}", iso.week()),
            };
            out.push_str(&rendered);
        }
        out.push_str(suffix);
        Some(out)
    }

    /// Sequence width, for sequenced rules.
    #[must_use]
    pub fn width(&self) -> Option<u8> {
        match self {
            SerialRule::Dated { width, .. } => Some(*width),
            SerialRule::MacSuffix { .. } => None,
        }
    }
}

impl FromStr for SerialRule {
    type Err = FlashcheckError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for SerialRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SerialRule::Dated {
                prefix,
                parts,
                suffix,
                width,
            } => {
                if !prefix.is_empty() || !suffix.is_empty() {
                    write!(f, "{}:", prefix)?;
                }
                for part in parts {
                    f.write_str(part.token())?;
                }
                if !suffix.is_empty() {
                    write!(f, ":{}", suffix)?;
                }
                write!(f, "+{}digit", width)
            }
            SerialRule::MacSuffix { digits } => write!(f, "MAC{}", digits),
        }
    }
}

/// Largest sequence a width allows.
#[must_use]
pub fn max_sequence(width: u8) -> u32 {
    10u32
        .checked_pow(u32::from(width))
        .map(|v| v.saturating_sub(1))
        .unwrap_or(u32::MAX)
}

/// Bucket followed by the zero-padded sequence.
#[must_use]
pub fn compose_serial(bucket: &str, sequence: u32, width: u8) -> String {
    format!("{}{:0width$}", bucket, sequence, width = usize::from(width))
}

/// The sequence after `current_max`, bounded by `width`.
pub fn next_sequence(
    current_max: Option<u32>,
    bucket: &str,
    width: u8,
) -> Result<u32, FlashcheckError> {
    let next = current_max.unwrap_or(0).checked_add(1);
    match next {
        Some(n) if n <= max_sequence(width) => Ok(n),
        _ => Err(FlashcheckError::SequenceExhausted {
            bucket: bucket.to_string(),
            width,
        }),
    }
}

// =============================================================================
// LEDGER RECORDS
// =============================================================================

/// Parameters of one reservation.
#[derive(Debug, Clone, Copy)]
pub struct ReserveRequest<'a> {
    pub bucket: &'a str,
    pub width: u8,
    pub session_id: &'a str,
    pub issued_at: DateTime<Utc>,
}

/// One issued serial number. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialNumberRecord {
    pub bucket: String,
    pub sequence: u32,
    pub serial: String,
    pub issued_at: DateTime<Utc>,
    pub session_id: String,
    /// BLAKE3 over the fields above, hex encoded.
    pub digest: String,
}

impl SerialNumberRecord {
    /// Build the record for `sequence` under `request`.
    pub fn issue(request: &ReserveRequest<'_>, sequence: u32) -> Result<Self, FlashcheckError> {
        if sequence == 0 || sequence > max_sequence(request.width) {
            return Err(FlashcheckError::SequenceExhausted {
                bucket: request.bucket.to_string(),
                width: request.width,
            });
        }
        let mut record = Self {
            bucket: request.bucket.to_string(),
            sequence,
            serial: compose_serial(request.bucket, sequence, request.width),
            issued_at: request.issued_at,
            session_id: request.session_id.to_string(),
            digest: String::new(),
        };
        record.digest = record.compute_digest();
        Ok(record)
    }

    /// Recompute the digest from the record fields.
    #[must_use]
    pub fn compute_digest(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.bucket.as_bytes());
        hasher.update(&[0]);
        hasher.update(&self.sequence.to_le_bytes());
        hasher.update(self.serial.as_bytes());
        hasher.update(&[0]);
        hasher.update(self.issued_at.to_rfc3339().as_bytes());
        hasher.update(&[0]);
        hasher.update(self.session_id.as_bytes());
        hasher.finalize().to_hex().to_string()
    }

    #[must_use]
    pub fn digest_matches(&self) -> bool {
        self.digest == self.compute_digest()
    }
}

// =============================================================================
// GENERATOR
// =============================================================================

/// What the generator needs to know about the requesting session.
#[derive(Debug, Clone, Copy)]
pub struct GenerateRequest<'a> {
    /// Station-local calendar date.
    pub date: NaiveDate,
    pub now: DateTime<Utc>,
    pub session_id: &'a str,
    pub mac_address: Option<&'a str>,
}

/// A generated serial number and, for sequenced rules, its ledger record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issued {
    pub serial: String,
    pub record: Option<SerialNumberRecord>,
}

/// Turns a rule plus the store's ledger into unique serial numbers.
#[derive(Debug, Clone)]
pub struct SerialNumberGenerator {
    rule: SerialRule,
}

impl SerialNumberGenerator {
    #[must_use]
    pub fn new(rule: SerialRule) -> Self {
        Self { rule }
    }

    /// Parse `rule` and build a generator.
    pub fn from_rule(rule: &str) -> Result<Self, FlashcheckError> {
        SerialRule::parse(rule).map(Self::new)
    }

    #[must_use]
    pub fn rule(&self) -> &SerialRule {
        &self.rule
    }

    /// Produce the next serial number.
    ///
    /// For dated rules the read of the current maximum and the append of the
    /// new record happen inside one store reservation.
    pub fn generate(
        &self,
        store: &dyn ResultStore,
        request: &GenerateRequest<'_>,
    ) -> Result<Issued, FlashcheckError> {
        match &self.rule {
            SerialRule::MacSuffix { digits } => {
                let mac = request.mac_address.ok_or_else(|| {
                    FlashcheckError::InvalidInput(
                        "MAC rule requires a MAC address".to_string(),
                    )
                })?;
                Ok(Issued {
                    serial: mac_suffix(mac, *digits)?,
                    record: None,
                })
            }
            SerialRule::Dated { width, .. } => {
                let bucket = self.rule.bucket(request.date).ok_or_else(|| {
                    FlashcheckError::InvalidInput("rule has no bucket".to_string())
                })?;
                let record = store.reserve_sequence(&ReserveRequest {
                    bucket: &bucket,
                    width: *width,
                    session_id: request.session_id,
                    issued_at: request.now,
                })?;
                Ok(Issued {
                    serial: record.serial.clone(),
                    record: Some(record),
                })
            }
        }
    }
}

fn mac_suffix(mac: &str, digits: u8) -> Result<String, FlashcheckError> {
    let hex: String = mac.chars().filter(|c| c.is_ascii_hexdigit()).collect();
    let digits = usize::from(digits);
    if hex.len() < digits {
        return Err(FlashcheckError::InvalidInput(format!(
            "MAC address '{}' has fewer than {} hex digits",
            mac, digits
        )));
    }
    Ok(hex[hex.len() - digits..].to_ascii_uppercase())
}

// =============================================================================
// LEDGER VERIFICATION
// =============================================================================

/// A problem found while verifying the serial ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerProblem {
    /// Stored digest does not match the record contents.
    DigestMismatch { bucket: String, sequence: u32 },
    /// The serial string does not encode its bucket and sequence.
    SerialMismatch { bucket: String, sequence: u32 },
    /// Sequences in a bucket are not contiguous from 1.
    Gap {
        bucket: String,
        expected: u32,
        found: u32,
    },
}

/// Summary of a ledger verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerReport {
    pub records_checked: usize,
    pub buckets: usize,
    pub problems: Vec<LedgerProblem>,
}

impl LedgerReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.problems.is_empty()
    }
}

fn serial_encodes(record: &SerialNumberRecord) -> bool {
    record
        .serial
        .strip_prefix(record.bucket.as_str())
        .and_then(|tail| tail.parse::<u32>().ok())
        == Some(record.sequence)
}

/// Verify digests, serial encoding and contiguity of every bucket.
#[must_use]
pub fn verify_ledger(records: &[SerialNumberRecord]) -> LedgerReport {
    let mut by_bucket: BTreeMap<&str, Vec<&SerialNumberRecord>> = BTreeMap::new();
    for record in records {
        by_bucket.entry(&record.bucket).or_default().push(record);
    }

    let mut problems = Vec::new();
    for (bucket, entries) in &mut by_bucket {
        entries.sort_by_key(|r| r.sequence);
        let mut expected = 1u32;
        for record in entries.iter() {
            if !record.digest_matches() {
                problems.push(LedgerProblem::DigestMismatch {
                    bucket: bucket.to_string(),
                    sequence: record.sequence,
                });
            }
            if !serial_encodes(record) {
                problems.push(LedgerProblem::SerialMismatch {
                    bucket: bucket.to_string(),
                    sequence: record.sequence,
                });
            }
            if record.sequence != expected {
                problems.push(LedgerProblem::Gap {
                    bucket: bucket.to_string(),
                    expected,
                    found: record.sequence,
                });
            }
            expected = record.sequence.saturating_add(1);
        }
    }

    LedgerReport {
        records_checked: records.len(),
        buckets: by_bucket.len(),
        problems,
    }
}

// =============================================================================
// TESTS
// =============================================================================
