//! # Flattened Session Rows
//!
//! One flat row per session, for CSV export and tabular views.

use crate::FlashcheckError;
use crate::session::TestSession;
use crate::stage::StageId;
use serde::{Deserialize, Serialize};
use std::io::Write;

/// A session flattened to scalar columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRow {
    pub session_id: String,
    pub started_at: String,
    pub ended_at: String,
    pub port: String,
    pub chip_type: String,
    pub mode: String,
    pub mac_address: String,
    pub hw_revision: String,
    pub serial_number: String,
    pub reset: String,
    pub factory_mode: String,
    pub rtc: String,
    pub pressure: String,
    pub pressure_value: Option<f64>,
    pub button: String,
    pub hw_version: String,
    pub serial_number_status: String,
    pub verdict: String,
    pub aborted: bool,
    pub abort_reason: String,
    pub raw_log_path: String,
}

impl From<&TestSession> for SessionRow {
    fn from(session: &TestSession) -> Self {
        let status = |stage: StageId| {
            session
                .outcome(stage)
                .map(|o| o.status.as_str().to_string())
                .unwrap_or_default()
        };
        Self {
            session_id: session.session_id.clone(),
            started_at: session.started_at.to_rfc3339(),
            ended_at: session
                .ended_at
                .map(|t| t.to_rfc3339())
                .unwrap_or_default(),
            port: session.port.clone(),
            chip_type: session.chip_type.clone(),
            mode: session.mode.to_string(),
            mac_address: session.mac_address.clone().unwrap_or_default(),
            hw_revision: session.hw_revision.clone().unwrap_or_default(),
            serial_number: session.serial_number.clone().unwrap_or_default(),
            reset: status(StageId::Reset),
            factory_mode: status(StageId::FactoryMode),
            rtc: status(StageId::Rtc),
            pressure: status(StageId::Pressure),
            pressure_value: session.pressure(),
            button: status(StageId::Button),
            hw_version: status(StageId::HwVersion),
            serial_number_status: status(StageId::SerialNumber),
            verdict: session
                .verdict
                .as_ref()
                .map(|v| v.as_str().to_string())
                .unwrap_or_else(|| "INCOMPLETE".to_string()),
            aborted: session.aborted,
            abort_reason: session
                .abort_reason
                .as_ref()
                .map(|r| r.to_string())
                .unwrap_or_default(),
            raw_log_path: session.raw_log_path.clone().unwrap_or_default(),
        }
    }
}

/// CSV header, in `SessionRow` field order.
pub const SESSION_COLUMNS: [&str; 21] = [
    "session_id",
    "started_at",
    "ended_at",
    "port",
    "chip_type",
    "mode",
    "mac_address",
    "hw_revision",
    "serial_number",
    "reset",
    "factory_mode",
    "rtc",
    "pressure",
    "pressure_value",
    "button",
    "hw_version",
    "serial_number_status",
    "verdict",
    "aborted",
    "abort_reason",
    "raw_log_path",
];

/// Write rows as CSV with a header line, even when there are no rows.
pub fn write_csv<W: Write>(rows: &[SessionRow], out: W) -> Result<(), FlashcheckError> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(out);
    writer
        .write_record(SESSION_COLUMNS)
        .map_err(|e| FlashcheckError::Serialization(e.to_string()))?;
    for row in rows {
        writer
            .serialize(row)
            .map_err(|e| FlashcheckError::Serialization(e.to_string()))?;
    }
    writer
        .flush()
        .map_err(|e| FlashcheckError::Io(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionContext;
    use crate::stage::{StageOutcome, StageStatus};
    use crate::{AbortReason, Mode};
    use chrono::Utc;

    fn session() -> TestSession {
        let now = Utc::now();
        let mut session = TestSession::begin(SessionContext {
            session_id: "s1".to_string(),
            port: "/dev/ttyUSB1".to_string(),
            chip_type: "esp32".to_string(),
            mode: Mode::Develop,
            mac_address: None,
            raw_log_path: None,
            started_at: now,
        });
        session.record(StageOutcome::new(StageId::Rtc, StageStatus::Pass, now, now));
        session.record(
            StageOutcome::new(StageId::Pressure, StageStatus::Pass, now, now)
                .with_measured(Some(101.3)),
        );
        session
    }

    #[test]
    fn row_flattens_statuses() {
        let row = SessionRow::from(&session());
        assert_eq!(row.rtc, "PASS");
        assert_eq!(row.pressure_value, Some(101.3));
        assert_eq!(row.button, "");
        assert_eq!(row.verdict, "INCOMPLETE");
    }

    #[test]
    fn aborted_row_carries_reason() {
        let mut s = session();
        s.abort(AbortReason::Disconnected("unplugged".to_string()), Utc::now());
        let row = SessionRow::from(&s);
        assert!(row.aborted);
        assert_eq!(row.verdict, "FAIL");
        assert_eq!(row.abort_reason, "disconnected: unplugged");
    }

    #[test]
    fn csv_has_header_and_one_line_per_row() {
        let rows = vec![SessionRow::from(&session()), SessionRow::from(&session())];
        let mut out = Vec::new();
        write_csv(&rows, &mut out).expect("write csv");
        let text = String::from_utf8(out).expect("utf8");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("session_id,started_at,ended_at,port"));
        assert!(lines[1].contains(",101.3,"));
    }

    #[test]
    fn empty_export_still_has_header() {
        let mut out = Vec::new();
        write_csv(&[], &mut out).expect("write csv");
        let text = String::from_utf8(out).expect("utf8");
        assert_eq!(text.lines().collect::<Vec<_>>(), vec![SESSION_COLUMNS.join(",")]);
    }

    #[test]
    fn header_matches_row_fields() {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.serialize(SessionRow::from(&session())).expect("serialize");
        let bytes = writer.into_inner().expect("into inner");
        let text = String::from_utf8(bytes).expect("utf8");
        assert_eq!(text.lines().next(), Some(SESSION_COLUMNS.join(",").as_str()));
    }
}
