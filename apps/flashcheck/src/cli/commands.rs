//! # CLI Command Implementations

use crate::api;
use crate::config::{CONFIG_TEMPLATE, StationConfig};
use crate::link;
use crate::runner::{self, SessionIo, SessionReport, SessionRunner};
use chrono::{Local, NaiveDate, Utc};
use flashcheck_core::{
    FlashcheckError, RedbStore, ResultStore, SerialRule, SessionContext, SessionRow, TestSession,
    serial_number::{compose_serial, next_sequence},
    write_csv,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Validate output path: the parent directory must exist.
fn validate_output_path(path: &Path) -> Result<PathBuf, FlashcheckError> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let canonical_parent = parent.canonicalize().map_err(|e| {
        FlashcheckError::Io(format!(
            "Invalid output directory '{}': {}",
            parent.display(),
            e
        ))
    })?;

    let filename = path
        .file_name()
        .ok_or_else(|| FlashcheckError::Io("Output path has no filename".to_string()))?;

    Ok(canonical_parent.join(filename))
}

fn open_store(config: &StationConfig) -> Result<RedbStore, FlashcheckError> {
    RedbStore::open(&config.database)
}

fn parse_day(value: &str) -> Result<NaiveDate, FlashcheckError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|_| {
        FlashcheckError::InvalidInput(format!("invalid date '{}': expected YYYY-MM-DD", value))
    })
}

/// Stored sessions, optionally only those started on `date` (UTC).
fn sessions_on(
    store: &dyn ResultStore,
    date: Option<&str>,
) -> Result<Vec<TestSession>, FlashcheckError> {
    let day = date.map(parse_day).transpose()?;
    Ok(store
        .sessions()?
        .into_iter()
        .filter(|s| day.is_none_or(|d| s.started_at.date_naive() == d))
        .collect())
}

fn print_json<T: serde::Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_default()
    );
}

// =============================================================================
// RUN COMMAND
// =============================================================================

/// Run one session per port, all sharing one store.
pub async fn cmd_run(
    config: &StationConfig,
    ports: &[String],
    mac: Option<String>,
    reset: bool,
    json_mode: bool,
    verbose: bool,
) -> Result<(), FlashcheckError> {
    if !config.test_after_flash {
        tracing::info!("test_after_flash is off, no session started");
        return Ok(());
    }
    if ports.is_empty() {
        return Err(FlashcheckError::InvalidInput(
            "at least one --port is required".to_string(),
        ));
    }
    if mac.is_some() && ports.len() > 1 {
        return Err(FlashcheckError::InvalidInput(
            "--mac applies to a single port".to_string(),
        ));
    }

    // A bad rule stops the station here, before any port is touched.
    let generator = config.serial_generator()?;
    let store: Arc<dyn ResultStore> = Arc::new(open_store(config)?);
    if let Some(dir) = &config.log_dir {
        std::fs::create_dir_all(dir).map_err(|e| {
            FlashcheckError::Io(format!("cannot create log dir {}: {}", dir.display(), e))
        })?;
    }

    let mut links = Vec::with_capacity(ports.len());
    for port in ports {
        let mut device = link::open(port, config.monitor_baud, config.line_flush())?;
        if reset {
            link::pulse_reset(device.writer.as_mut())?;
        }
        links.push(device);
    }

    // With several devices on one console there is no telling whose serial
    // number a typed line is, so the console is only attached to a lone port.
    let mut console = if links.len() == 1 {
        Some(runner::spawn_console())
    } else {
        None
    };

    let mut tasks = Vec::with_capacity(links.len());
    for device in links {
        let session_id = uuid::Uuid::new_v4().to_string();
        let context = SessionContext {
            raw_log_path: runner::raw_log_path(config.log_dir.as_deref(), &session_id)
                .map(|p| p.display().to_string()),
            session_id,
            port: device.port.clone(),
            chip_type: config.chip_type.clone(),
            mode: config.mode,
            mac_address: mac.clone(),
            started_at: Utc::now(),
        };
        let session_runner = SessionRunner {
            config: config.sequencer_config(),
            generator: generator.clone(),
            store: Arc::clone(&store),
        };
        let io = SessionIo {
            lines: device.lines,
            operator: console.take(),
            writer: device.writer,
        };
        tasks.push(tokio::spawn(async move {
            session_runner.run(context, io).await
        }));
    }

    let mut first_error = None;
    for task in tasks {
        match task.await {
            Ok(report) => {
                print_report(&report, json_mode, verbose);
                if let Some(e) = report.store_error {
                    first_error.get_or_insert(e);
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "session task failed");
                first_error.get_or_insert(FlashcheckError::Io(format!("session task: {}", e)));
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn print_report(report: &SessionReport, json_mode: bool, verbose: bool) {
    let session = &report.session;
    if json_mode {
        print_json(session);
        return;
    }

    let verdict = session
        .verdict
        .as_ref()
        .map(|v| v.to_string())
        .unwrap_or_else(|| "INCOMPLETE".to_string());
    println!();
    println!("Session {} on {}: {}", session.session_id, session.port, verdict);
    println!(
        "  Serial number: {}",
        session.serial_number.as_deref().unwrap_or("-")
    );
    if verbose {
        print_outcomes(session);
    }
    if let Some(e) = &report.store_error {
        println!("  NOT SAVED: {}", e);
    }
}

fn print_outcomes(session: &TestSession) {
    for outcome in &session.outcomes {
        let value = match (&outcome.measured, &outcome.detail) {
            (Some(m), _) => format!("{}", m),
            (None, Some(d)) => d.clone(),
            (None, None) => String::new(),
        };
        println!(
            "  {:<14} {:<8} {}",
            outcome.stage.name(),
            outcome.status.as_str(),
            value
        );
    }
    if let Some(reason) = &session.abort_reason {
        println!("  aborted: {}", reason);
    }
}

// =============================================================================
// QUERY COMMANDS
// =============================================================================

/// List stored sessions.
pub fn cmd_sessions(
    config: &StationConfig,
    date: Option<&str>,
    json_mode: bool,
) -> Result<(), FlashcheckError> {
    let store = open_store(config)?;
    let sessions = sessions_on(&store, date)?;

    if json_mode {
        let summaries: Vec<api::SessionSummary> =
            sessions.iter().map(api::SessionSummary::from).collect();
        print_json(&summaries);
        return Ok(());
    }

    if sessions.is_empty() {
        println!("No sessions.");
        return Ok(());
    }
    for session in &sessions {
        let summary = api::SessionSummary::from(session);
        println!(
            "{}  {}  {:<14} {:<12} {}",
            summary.started_at,
            summary.session_id,
            summary.port,
            summary.serial_number.as_deref().unwrap_or("-"),
            summary.verdict
        );
    }
    println!();
    println!("{} session(s)", sessions.len());
    Ok(())
}

/// Show one session.
pub fn cmd_show(config: &StationConfig, id: &str, json_mode: bool) -> Result<(), FlashcheckError> {
    let store = open_store(config)?;
    let session = store
        .session(id)?
        .ok_or_else(|| FlashcheckError::NotFound(format!("session {}", id)))?;

    if json_mode {
        print_json(&session);
        return Ok(());
    }

    println!("Session:   {}", session.session_id);
    println!("Port:      {}", session.port);
    println!("Chip:      {} ({})", session.chip_type, session.mode);
    println!("Started:   {}", session.started_at.to_rfc3339());
    if let Some(ended) = session.ended_at {
        println!("Ended:     {}", ended.to_rfc3339());
    }
    println!("MAC:       {}", session.mac_address.as_deref().unwrap_or("-"));
    println!("HW:        {}", session.hw_revision.as_deref().unwrap_or("-"));
    println!("Serial:    {}", session.serial_number.as_deref().unwrap_or("-"));
    if let Some(path) = &session.raw_log_path {
        println!("Raw log:   {}", path);
    }
    println!();
    print_outcomes(&session);
    println!();
    match &session.verdict {
        Some(v) => println!("Verdict:   {}", v),
        None => println!("Verdict:   INCOMPLETE"),
    }
    Ok(())
}

/// Export sessions as CSV rows.
pub fn cmd_export(
    config: &StationConfig,
    output: &Path,
    date: Option<&str>,
) -> Result<(), FlashcheckError> {
    let output = validate_output_path(output)?;
    let store = open_store(config)?;
    let rows: Vec<SessionRow> = sessions_on(&store, date)?
        .iter()
        .map(SessionRow::from)
        .collect();

    let file = std::fs::File::create(&output)
        .map_err(|e| FlashcheckError::Io(format!("cannot create {}: {}", output.display(), e)))?;
    write_csv(&rows, file)?;

    tracing::info!(rows = rows.len(), path = %output.display(), "sessions exported");
    println!("Exported {} session(s) to {}", rows.len(), output.display());
    Ok(())
}

// =============================================================================
// SERIAL LEDGER COMMANDS
// =============================================================================

/// Preview the serial number the next session would get.
pub fn cmd_serials_next(
    config: &StationConfig,
    date: Option<&str>,
    json_mode: bool,
) -> Result<(), FlashcheckError> {
    let generator = config.serial_generator()?.ok_or_else(|| {
        FlashcheckError::Config("no device_code_rule configured".to_string())
    })?;
    let day = match date {
        Some(d) => parse_day(d)?,
        None => Local::now().date_naive(),
    };
    let rule = generator.rule();
    let (SerialRule::Dated { width, .. }, Some(bucket)) = (rule, rule.bucket(day)) else {
        return Err(FlashcheckError::InvalidInput(format!(
            "rule '{}' is not sequence-based",
            rule
        )));
    };

    let store = open_store(config)?;
    let current = store.query_max_sequence(&bucket)?;
    let next = next_sequence(current, &bucket, *width)?;
    let serial = compose_serial(&bucket, next, *width);

    if json_mode {
        print_json(&serde_json::json!({
            "rule": rule.to_string(),
            "bucket": bucket,
            "current_max": current,
            "next_sequence": next,
            "next_serial": serial,
        }));
    } else {
        println!("Rule:   {}", rule);
        println!("Bucket: {}", bucket);
        println!("Next:   {}", serial);
    }
    Ok(())
}

/// List issued serial numbers.
pub fn cmd_serials_list(
    config: &StationConfig,
    bucket: Option<&str>,
    json_mode: bool,
) -> Result<(), FlashcheckError> {
    let store = open_store(config)?;
    let records = store.serial_records(bucket)?;

    if json_mode {
        print_json(&records);
        return Ok(());
    }
    for record in &records {
        println!(
            "{:<16} {}  {}",
            record.serial,
            record.issued_at.to_rfc3339(),
            record.session_id
        );
    }
    println!("{} record(s)", records.len());
    Ok(())
}

/// Verify the serial ledger. Problems are an error.
pub fn cmd_serials_verify(config: &StationConfig, json_mode: bool) -> Result<(), FlashcheckError> {
    let store = open_store(config)?;
    let report = store.verify_serial_ledger()?;

    if json_mode {
        print_json(&report);
    } else {
        println!(
            "Checked {} record(s) in {} bucket(s)",
            report.records_checked, report.buckets
        );
        for problem in &report.problems {
            println!("  {:?}", problem);
        }
    }

    if report.is_clean() {
        Ok(())
    } else {
        Err(FlashcheckError::Integrity(format!(
            "serial ledger has {} problem(s)",
            report.problems.len()
        )))
    }
}

// =============================================================================
// PORTS COMMAND
// =============================================================================

/// List serial ports.
pub fn cmd_ports(json_mode: bool) -> Result<(), FlashcheckError> {
    let ports = link::list_ports()?;
    if json_mode {
        print_json(&ports);
        return Ok(());
    }
    if ports.is_empty() {
        println!("No serial ports found.");
    }
    for port in &ports {
        println!(
            "{:<20} {:<10} {}",
            port.name,
            port.kind,
            port.description.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

// =============================================================================
// SERVE COMMAND
// =============================================================================

/// Start the query API.
pub async fn cmd_serve(config: &StationConfig, host: &str, port: u16) -> Result<(), FlashcheckError> {
    let store: Arc<dyn ResultStore> = Arc::new(open_store(config)?);

    println!("flashcheck query API starting...");
    println!();
    println!("  Host:     {}", host);
    println!("  Port:     {}", port);
    println!("  Database: {}", config.database.display());
    println!();
    println!("Endpoints:");
    println!("  GET /health");
    println!("  GET /sessions[?date=YYYY-MM-DD]");
    println!("  GET /sessions/{{id}}");
    println!("  GET /serials/{{bucket}}");
    println!("  GET /serials/verify");
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let addr = format!("{}:{}", host, port);
    api::run_server(&addr, store).await
}

// =============================================================================
// INIT COMMAND
// =============================================================================

/// Write the config template, then create the database it names.
pub fn cmd_init(
    config_path: &Path,
    database: Option<&Path>,
    force: bool,
) -> Result<(), FlashcheckError> {
    if config_path.exists() && !force {
        return Err(FlashcheckError::Config(format!(
            "{} already exists. Use --force to overwrite.",
            config_path.display()
        )));
    }
    std::fs::write(config_path, CONFIG_TEMPLATE).map_err(|e| {
        FlashcheckError::Io(format!("cannot write {}: {}", config_path.display(), e))
    })?;
    println!("Wrote station config to {}", config_path.display());

    let mut config = StationConfig::from_file(config_path)?;
    if let Some(db) = database {
        config.database = db.to_path_buf();
    }
    open_store(&config)?;
    println!("Initialized result database at {}", config.database.display());
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use flashcheck_core::{GenerateRequest, SerialNumberGenerator};

    fn config_in(dir: &Path, rule: &str) -> StationConfig {
        StationConfig {
            database: dir.join("station.redb"),
            device_code_rule: Some(rule.to_string()),
            log_dir: None,
            ..StationConfig::default()
        }
    }

    #[test]
    fn init_writes_loadable_config_and_database() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("flashcheck.toml");
        let db = dir.path().join("fresh.redb");

        cmd_init(&path, Some(&db), false).expect("init");
        assert!(db.exists());
        let config = StationConfig::from_file(&path).expect("load template");
        assert_eq!(config.rule(), None);
        assert_eq!(config.timeouts, StationConfig::default().timeouts);

        assert!(cmd_init(&path, Some(&db), false).is_err());
        cmd_init(&path, Some(&db), true).expect("forced init");
    }

    #[test]
    fn run_does_nothing_when_testing_disabled() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = StationConfig {
            test_after_flash: false,
            ..config_in(dir.path(), "YYMMDD+2digit")
        };
        let rt = tokio::runtime::Runtime::new().expect("runtime");
        rt.block_on(cmd_run(
            &config,
            &["/dev/does-not-exist".to_string()],
            None,
            false,
            false,
            false,
        ))
        .expect("no-op run");
        assert!(!config.database.exists());
    }

    #[test]
    fn bad_rule_fails_before_opening_ports() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = config_in(dir.path(), "YYMMDD+");
        let rt = tokio::runtime::Runtime::new().expect("runtime");
        let err = rt
            .block_on(cmd_run(
                &config,
                &["/dev/does-not-exist".to_string()],
                None,
                false,
                false,
                false,
            ))
            .expect_err("rule must be rejected");
        assert!(matches!(err, FlashcheckError::RuleParse { .. }));
    }

    #[test]
    fn export_filters_by_day() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = config_in(dir.path(), "YYMMDD+2digit");
        {
            let store = open_store(&config).expect("open");
            let started_at = chrono::DateTime::parse_from_rfc3339("2026-10-19T08:00:00Z")
                .expect("time")
                .with_timezone(&Utc);
            let mut session = TestSession::begin(SessionContext {
                session_id: "s1".to_string(),
                port: "/dev/ttyUSB0".to_string(),
                chip_type: "esp32".to_string(),
                mode: flashcheck_core::Mode::Develop,
                mac_address: None,
                raw_log_path: None,
                started_at,
            });
            session.finalize(started_at);
            store.append_session(&session).expect("append");
        }

        let out = dir.path().join("records.csv");
        cmd_export(&config, &out, Some("2026-10-19")).expect("export");
        let text = std::fs::read_to_string(&out).expect("read csv");
        assert!(text.starts_with("session_id,"));
        assert_eq!(text.lines().count(), 2);

        let other = dir.path().join("other.csv");
        cmd_export(&config, &other, Some("2026-10-20")).expect("export");
        let text = std::fs::read_to_string(&other).expect("read csv");
        assert_eq!(text.lines().count(), 1);
        assert!(text.starts_with("session_id,"));
    }

    #[test]
    fn serials_next_previews_without_reserving() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = config_in(dir.path(), "YYMMDD+2digit");
        let day = NaiveDate::from_ymd_opt(2026, 10, 19).expect("date");
        {
            let store = open_store(&config).expect("open");
            let generator = SerialNumberGenerator::from_rule("YYMMDD+2digit").expect("rule");
            generator
                .generate(
                    &store,
                    &GenerateRequest {
                        date: day,
                        now: Utc::now(),
                        session_id: "s1",
                        mac_address: None,
                    },
                )
                .expect("generate");
        }

        cmd_serials_next(&config, Some("2026-10-19"), true).expect("preview");
        let store = open_store(&config).expect("reopen");
        assert_eq!(store.query_max_sequence("261019").expect("max"), Some(1));
    }

    #[test]
    fn serials_next_rejects_mac_rule() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = config_in(dir.path(), "MAC6");
        assert!(matches!(
            cmd_serials_next(&config, None, false),
            Err(FlashcheckError::InvalidInput(_))
        ));
    }

    #[test]
    fn show_unknown_session_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = config_in(dir.path(), "YYMMDD+2digit");
        assert!(matches!(
            cmd_show(&config, "missing", false),
            Err(FlashcheckError::NotFound(_))
        ));
    }

    #[test]
    fn clean_ledger_verifies() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = config_in(dir.path(), "YYMMDD+2digit");
        cmd_serials_verify(&config, true).expect("empty ledger is clean");
    }
}
