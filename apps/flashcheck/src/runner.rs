//! # Session Runner
//!
//! Drives one `Sequencer` against a live link. Device lines, operator input
//! and the sequencer's deadline race in one `select!`; whichever comes first
//! is fed to the sequencer, and its actions are carried out before the next
//! race. Once the session finishes it is appended to the store.

use crate::link::{DeviceWriter, LinkItem};
use chrono::{DateTime, Local, Utc};
use flashcheck_core::{
    Action, FlashcheckError, GenerateRequest, Input, OperatorField, OperatorInput, ResultStore,
    Sequencer, SequencerConfig, SerialNumberGenerator, SessionContext, TestSession, extract_mac,
    match_line,
};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::Instrument;

// =============================================================================
// OPERATOR LINES
// =============================================================================

/// One line typed at the station console.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorLine {
    /// `hw <value>`
    HardwareVersion(String),
    /// `sn <value>`
    SerialNumber(String),
    /// Anything else; a serial number if one is awaited.
    Bare(String),
}

/// Parse a console line. Blank lines yield `None`.
#[must_use]
pub fn parse_operator_line(line: &str) -> Option<OperatorLine> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let (head, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    match head.to_ascii_lowercase().as_str() {
        "hw" => Some(OperatorLine::HardwareVersion(rest.trim().to_string())),
        "sn" => Some(OperatorLine::SerialNumber(rest.trim().to_string())),
        _ => Some(OperatorLine::Bare(line.to_string())),
    }
}

// =============================================================================
// SESSION I/O
// =============================================================================

/// Everything a session talks to.
pub struct SessionIo<W: DeviceWriter> {
    pub lines: mpsc::Receiver<LinkItem>,
    /// `None` when no console is attached to this session.
    pub operator: Option<mpsc::Receiver<OperatorLine>>,
    pub writer: W,
}

/// The result of one session.
#[derive(Debug)]
pub struct SessionReport {
    pub session: TestSession,
    /// Set when the finished session could not be persisted.
    pub store_error: Option<FlashcheckError>,
}

/// A session waiting to run.
pub struct SessionRunner {
    pub config: SequencerConfig,
    pub generator: Option<SerialNumberGenerator>,
    pub store: Arc<dyn ResultStore>,
}

impl SessionRunner {
    /// Run one session to completion.
    ///
    /// If `context.raw_log_path` is set, every device line is appended there
    /// with its arrival time; when the file cannot be created the session
    /// continues without it.
    pub async fn run<W: DeviceWriter>(
        &self,
        context: SessionContext,
        io: SessionIo<W>,
    ) -> SessionReport {
        let span = tracing::info_span!(
            "session",
            id = %context.session_id,
            port = %context.port
        );
        self.drive(context, io).instrument(span).await
    }

    async fn drive<W: DeviceWriter>(
        &self,
        mut context: SessionContext,
        mut io: SessionIo<W>,
    ) -> SessionReport {
        let mut raw_log = match context.raw_log_path.clone() {
            Some(path) => match tokio::fs::File::create(&path).await {
                Ok(file) => Some(tokio::io::BufWriter::new(file)),
                Err(e) => {
                    tracing::warn!(%path, error = %e, "raw log unavailable");
                    context.raw_log_path = None;
                    None
                }
            },
            None => None,
        };

        tracing::info!("session started");

        let mut seq = Sequencer::new(self.config.clone(), context);
        let mut driver = Driver {
            runner: self,
            writer: &mut io.writer,
            awaiting_serial: false,
        };

        if io.operator.is_none() {
            driver.apply(&mut seq, Input::OperatorClosed);
        }

        while !seq.is_finished() {
            let wait = seq.deadline().map(until);

            tokio::select! {
                biased;

                item = io.lines.recv() => match item {
                    Some(LinkItem::Line(line)) => {
                        tracing::debug!(target: "flashcheck::device", "{}", line.text);
                        if let Some(log) = raw_log.as_mut() {
                            let entry = format!("{} {}\n", line.arrived_at.to_rfc3339(), line.text);
                            if let Err(e) = log.write_all(entry.as_bytes()).await {
                                tracing::warn!(error = %e, "raw log write failed");
                            }
                        }
                        if seq.session().mac_address.is_none()
                            && let Some(mac) = extract_mac(&line.text)
                        {
                            tracing::info!(mac = %mac, "MAC address seen in log");
                            seq.observe_mac(mac);
                        }
                        if let Some(event) = match_line(&line) {
                            tracing::debug!(?event, "matched");
                            driver.apply(
                                &mut seq,
                                Input::Event { event, text: line.text, at: line.arrived_at },
                            );
                        }
                    }
                    Some(LinkItem::Disconnected(reason)) => {
                        tracing::warn!(%reason, "device disconnected");
                        driver.apply(&mut seq, Input::Disconnected(reason));
                    }
                    None => driver.apply(&mut seq, Input::Disconnected("link closed".to_string())),
                },

                line = recv_optional(&mut io.operator) => match line {
                    Some(line) => {
                        if let Some(input) = driver.operator_input(line) {
                            driver.apply(&mut seq, Input::Operator(input));
                        }
                    }
                    None => {
                        io.operator = None;
                        driver.apply(&mut seq, Input::OperatorClosed);
                    }
                },

                () = sleep_for(wait), if wait.is_some() => driver.apply(&mut seq, Input::Tick),
            }
        }

        if let Some(mut log) = raw_log
            && let Err(e) = log.flush().await
        {
            tracing::warn!(error = %e, "raw log flush failed");
        }

        let session = seq.into_session();
        let verdict = session
            .verdict
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| "INCOMPLETE".to_string());
        tracing::info!(%verdict, aborted = session.aborted, "session finished");

        let store_error = match self.store.append_session(&session) {
            Ok(()) => None,
            Err(e) => {
                tracing::error!(error = %e, "session could not be stored");
                Some(e)
            }
        };
        SessionReport {
            session,
            store_error,
        }
    }
}

// =============================================================================
// ACTION DRIVER
// =============================================================================

struct Driver<'a, W: DeviceWriter> {
    runner: &'a SessionRunner,
    writer: &'a mut W,
    awaiting_serial: bool,
}

impl<W: DeviceWriter> Driver<'_, W> {
    /// Feed `input` and carry out every resulting action, including the
    /// inputs those actions produce.
    fn apply(&mut self, seq: &mut Sequencer, input: Input) {
        let mut queue: VecDeque<Action> = seq.step(input, Utc::now()).into();
        while let Some(action) = queue.pop_front() {
            if let Some(next) = self.execute(seq, action) {
                queue.extend(seq.step(next, Utc::now()));
            }
        }
    }

    fn execute(&mut self, seq: &Sequencer, action: Action) -> Option<Input> {
        match action {
            Action::Send { stage, value } => match self.writer.send_line(&value) {
                Ok(()) => {
                    tracing::info!(%stage, %value, "sent to device");
                    println!("[{}] {} -> {}", seq.session().port, stage, value);
                    self.awaiting_serial = false;
                    Some(Input::Sent)
                }
                Err(e) => {
                    tracing::error!(%stage, error = %e, "write to device failed");
                    Some(Input::Disconnected(format!("write failed: {}", e)))
                }
            },
            Action::GenerateSerial => {
                let Some(generator) = self.runner.generator.as_ref() else {
                    return Some(Input::SerialFailed("no serial rule configured".to_string()));
                };
                let session = seq.session();
                let request = GenerateRequest {
                    date: Local::now().date_naive(),
                    now: Utc::now(),
                    session_id: &session.session_id,
                    mac_address: session.mac_address.as_deref(),
                };
                match generator.generate(self.runner.store.as_ref(), &request) {
                    Ok(issued) => {
                        tracing::info!(serial = %issued.serial, "serial number generated");
                        Some(Input::SerialGenerated(issued.serial))
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "serial number generation failed");
                        Some(Input::SerialFailed(e.to_string()))
                    }
                }
            }
            Action::AwaitOperator(OperatorField::SerialNumber) => {
                self.awaiting_serial = true;
                tracing::info!("waiting for operator serial number");
                println!("[{}] enter serial number:", seq.session().port);
                None
            }
            Action::StageFinished(outcome) => {
                match outcome.measured {
                    Some(measured) => tracing::info!(
                        stage = %outcome.stage,
                        status = %outcome.status,
                        measured,
                        "stage finished"
                    ),
                    None => tracing::info!(
                        stage = %outcome.stage,
                        status = %outcome.status,
                        "stage finished"
                    ),
                }
                None
            }
            Action::Notice(text) => {
                tracing::warn!("{}", text);
                None
            }
            Action::Finished => None,
        }
    }

    fn operator_input(&self, line: OperatorLine) -> Option<OperatorInput> {
        match line {
            OperatorLine::HardwareVersion(v) => Some(OperatorInput::HardwareVersion(v)),
            OperatorLine::SerialNumber(v) => Some(OperatorInput::SerialNumber(v)),
            OperatorLine::Bare(v) if self.awaiting_serial => Some(OperatorInput::SerialNumber(v)),
            OperatorLine::Bare(v) => {
                tracing::warn!(input = %v, "ignored console input; use `hw <value>` or `sn <value>`");
                None
            }
        }
    }
}

// =============================================================================
// HELPERS
// =============================================================================

fn until(deadline: DateTime<Utc>) -> std::time::Duration {
    deadline
        .signed_duration_since(Utc::now())
        .to_std()
        .unwrap_or(std::time::Duration::ZERO)
}

async fn sleep_for(wait: Option<std::time::Duration>) {
    match wait {
        Some(d) => tokio::time::sleep(d).await,
        None => std::future::pending().await,
    }
}

async fn recv_optional<T>(rx: &mut Option<mpsc::Receiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Forward console lines from stdin until it closes.
pub fn spawn_console() -> mpsc::Receiver<OperatorLine> {
    use tokio::io::AsyncBufReadExt;

    let (tx, rx) = mpsc::channel(16);
    tokio::spawn(async move {
        let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if let Some(parsed) = parse_operator_line(&line)
                        && tx.send(parsed).await.is_err()
                    {
                        return;
                    }
                }
                Ok(None) => return,
                Err(e) => {
                    tracing::warn!(error = %e, "console read failed");
                    return;
                }
            }
        }
    });
    rx
}

/// Raw log location for a session.
#[must_use]
pub fn raw_log_path(log_dir: Option<&std::path::Path>, session_id: &str) -> Option<PathBuf> {
    log_dir.map(|dir| dir.join(format!("{}.log", session_id)))
}

// =============================================================================
// TESTS
// =============================================================================
