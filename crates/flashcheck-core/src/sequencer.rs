//! # Stage Sequencer
//!
//! A plain state machine: [`Input`] in, [`Action`]s out.
//!
//! The sequencer never reads the clock and never touches I/O. The caller
//! feeds it matched events (with their arrival time), operator input,
//! generator results, write acknowledgements and timer ticks, and carries
//! out the returned actions (write to the device, ask the generator, tell
//! the operator, persist the finished session).
//!
//! ## Timing
//!
//! Each pending step may carry a deadline, exposed by [`Sequencer::deadline`].
//! An event counts for a stage only if it arrived strictly before that
//! stage's deadline. A tick does nothing unless the current deadline has
//! passed, so a stale timer cannot act on a later stage.
//!
//! ## Early events
//!
//! The device runs its own script and may print a later stage's signal
//! while an earlier stage is still waiting. After reset, the most recent
//! occurrence of every event kind is latched with its arrival time; a stage
//! consults the latch when entered and consumes what it uses.

use crate::primitives::{
    DEFAULT_BUTTON_PROMPT_TIMEOUT_MS, DEFAULT_BUTTON_WINDOW_MS, DEFAULT_FACTORY_MODE_WINDOW_MS,
    DEFAULT_PRESSURE_TIMEOUT_MS, DEFAULT_PROMPT_TIMEOUT_MS, DEFAULT_RESET_TIMEOUT_MS,
    DEFAULT_RTC_TIMEOUT_MS, MAX_OPERATOR_VALUE_LENGTH,
};
use crate::session::{SessionContext, TestSession};
use crate::stage::{SequencerState, StageId, StageOutcome, StageStatus};
use crate::{AbortReason, Event, EventKind};
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::BTreeMap;
use std::time::Duration;

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Per-stage timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageTimeouts {
    pub reset: Duration,
    pub factory_mode_window: Duration,
    pub rtc: Duration,
    pub pressure: Duration,
    /// Wait for the device to ask for a button press.
    pub button_prompt: Duration,
    /// Window for the press itself, counted from the prompt.
    pub button_window: Duration,
    /// Wait for the hardware-version and serial-number prompts.
    pub prompt: Duration,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            reset: Duration::from_millis(DEFAULT_RESET_TIMEOUT_MS),
            factory_mode_window: Duration::from_millis(DEFAULT_FACTORY_MODE_WINDOW_MS),
            rtc: Duration::from_millis(DEFAULT_RTC_TIMEOUT_MS),
            pressure: Duration::from_millis(DEFAULT_PRESSURE_TIMEOUT_MS),
            button_prompt: Duration::from_millis(DEFAULT_BUTTON_PROMPT_TIMEOUT_MS),
            button_window: Duration::from_millis(DEFAULT_BUTTON_WINDOW_MS),
            prompt: Duration::from_millis(DEFAULT_PROMPT_TIMEOUT_MS),
        }
    }
}

/// Behaviour switches for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SequencerConfig {
    pub timeouts: StageTimeouts,
    /// Watch for "Factory Configuration Mode"; otherwise the stage is SKIPPED.
    pub detect_factory_mode: bool,
    /// Sent at the hardware-version prompt unless the operator overrides it.
    pub default_hw_version: Option<String>,
    /// A serial-number rule is configured; ask the generator at the SN prompt.
    pub generate_serial: bool,
}

// =============================================================================
// INPUTS & ACTIONS
// =============================================================================

/// A value typed by the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorInput {
    HardwareVersion(String),
    SerialNumber(String),
}

/// Which value the sequencer is waiting for from the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorField {
    SerialNumber,
}

/// Everything the sequencer reacts to.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    /// A matched device event with the line it came from.
    Event {
        event: Event,
        text: String,
        at: DateTime<Utc>,
    },
    Operator(OperatorInput),
    /// The operator input channel closed.
    OperatorClosed,
    SerialGenerated(String),
    SerialFailed(String),
    /// The last `Action::Send` reached the device.
    Sent,
    /// Timer wake-up.
    Tick,
    Disconnected(String),
}

/// Side effects requested by the sequencer.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Write `value` followed by a newline to the device, then report `Input::Sent`.
    Send { stage: StageId, value: String },
    /// Ask the serial-number generator, then report `SerialGenerated`/`SerialFailed`.
    GenerateSerial,
    /// Tell the operator a value is needed.
    AwaitOperator(OperatorField),
    StageFinished(StageOutcome),
    /// Something worth logging that does not change the outcome.
    Notice(String),
    /// The session is finalized; collect it with [`Sequencer::into_session`].
    Finished,
}

// =============================================================================
// INTERNAL STATE
// =============================================================================

#[derive(Debug, Clone)]
struct Latched {
    event: Event,
    text: String,
    at: DateTime<Utc>,
    ordinal: u64,
}

/// The pending step of the current state.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Step {
    Expect {
        kind: EventKind,
        deadline: DateTime<Utc>,
    },
    ButtonWindow {
        prompt_ordinal: u64,
        deadline: DateTime<Utc>,
    },
    Generating,
    OperatorSerial,
    Sending {
        stage: StageId,
        value: String,
    },
    Idle,
}

impl Step {
    fn deadline(&self) -> Option<DateTime<Utc>> {
        match self {
            Step::Expect { deadline, .. } | Step::ButtonWindow { deadline, .. } => Some(*deadline),
            _ => None,
        }
    }
}

fn after(at: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(duration)
        .ok()
        .and_then(|d| at.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn clean_operator_value(raw: &str) -> Result<String, String> {
    let value = raw.trim();
    if value.is_empty() {
        return Err("empty value".to_string());
    }
    if value.len() > MAX_OPERATOR_VALUE_LENGTH {
        return Err(format!(
            "value longer than {} bytes",
            MAX_OPERATOR_VALUE_LENGTH
        ));
    }
    if value.chars().any(char::is_control) {
        return Err("value contains control characters".to_string());
    }
    Ok(value.to_string())
}

// =============================================================================
// SEQUENCER
// =============================================================================

/// Drives one session through its stages.
#[derive(Debug)]
pub struct Sequencer {
    config: SequencerConfig,
    session: TestSession,
    state: SequencerState,
    step: Step,
    entered_at: DateTime<Utc>,
    latched: BTreeMap<EventKind, Latched>,
    ordinal: u64,
    hw_override: Option<String>,
    queued_serial: Option<String>,
    generator_failed: bool,
    operator_closed: bool,
}

impl Sequencer {
    /// Start a session; the reset timeout runs from `context.started_at`.
    #[must_use]
    pub fn new(config: SequencerConfig, context: SessionContext) -> Self {
        let started_at = context.started_at;
        let deadline = after(started_at, config.timeouts.reset);
        Self {
            config,
            session: TestSession::begin(context),
            state: SequencerState::WaitReset,
            step: Step::Expect {
                kind: EventKind::Reset,
                deadline,
            },
            entered_at: started_at,
            latched: BTreeMap::new(),
            ordinal: 0,
            hw_override: None,
            queued_serial: None,
            generator_failed: false,
            operator_closed: false,
        }
    }

    #[must_use]
    pub fn state(&self) -> SequencerState {
        self.state
    }

    /// The session as recorded so far.
    #[must_use]
    pub fn session(&self) -> &TestSession {
        &self.session
    }

    /// When the current step times out, if it can.
    #[must_use]
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        if self.state.is_terminal() {
            None
        } else {
            self.step.deadline()
        }
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.state.is_terminal()
    }

    /// Record a MAC address seen in the device log.
    pub fn observe_mac(&mut self, mac: String) {
        self.session.note_mac(mac);
    }

    /// Consume the sequencer and return the session.
    #[must_use]
    pub fn into_session(self) -> TestSession {
        self.session
    }

    /// Apply one input observed at `now`.
    pub fn step(&mut self, input: Input, now: DateTime<Utc>) -> Vec<Action> {
        let mut actions = Vec::new();
        if self.state.is_terminal() {
            return actions;
        }

        match input {
            Input::Event { event, text, at } => {
                // Deadlines that passed before this line arrived fire first.
                self.run(at, &mut actions);
                if !self.state.is_terminal() {
                    self.latch(event, text, at, &mut actions);
                    self.run(at, &mut actions);
                }
            }
            Input::Tick => self.run(now, &mut actions),
            Input::Operator(op) => {
                self.on_operator(op, &mut actions);
                self.run(now, &mut actions);
            }
            Input::OperatorClosed => {
                self.operator_closed = true;
                if self.step == Step::OperatorSerial {
                    self.abort(AbortReason::OperatorUnavailable, now, &mut actions);
                }
            }
            Input::SerialGenerated(serial) => {
                self.on_generated(serial, now, &mut actions);
                self.run(now, &mut actions);
            }
            Input::SerialFailed(reason) => {
                if self.step == Step::Generating {
                    self.generator_failed = true;
                    actions.push(Action::Notice(format!(
                        "serial generator failed ({}); falling back to operator input",
                        reason
                    )));
                    self.request_operator_serial(now, &mut actions);
                    self.run(now, &mut actions);
                }
            }
            Input::Sent => {
                // The next stage may already have its event latched.
                self.on_sent(now, &mut actions);
                self.run(now, &mut actions);
            }
            Input::Disconnected(reason) => {
                self.abort(AbortReason::Disconnected(reason), now, &mut actions);
            }
        }
        actions
    }

    // -------------------------------------------------------------------------
    // Event handling
    // -------------------------------------------------------------------------

    fn latch(&mut self, event: Event, text: String, at: DateTime<Utc>, actions: &mut Vec<Action>) {
        let kind = event.kind();
        match (self.state, kind) {
            // Output before the reset banner belongs to the previous boot.
            (SequencerState::WaitReset, k) if k != EventKind::Reset => return,
            (SequencerState::WaitReset, _) => {}
            (state, EventKind::Reset) => {
                actions.push(Action::Notice(format!(
                    "device reset again during {}; ignoring",
                    state
                )));
                return;
            }
            (_, EventKind::FactoryMode) if !self.config.detect_factory_mode => return,
            _ => {}
        }
        self.ordinal = self.ordinal.saturating_add(1);
        self.latched.insert(
            kind,
            Latched {
                event,
                text,
                at,
                ordinal: self.ordinal,
            },
        );
    }

    /// Consume latched events and expire deadlines up to `t`.
    fn run(&mut self, t: DateTime<Utc>, actions: &mut Vec<Action>) {
        loop {
            if self.state.is_terminal() {
                return;
            }
            if self.consume_latched(actions) {
                continue;
            }
            match self.step.deadline() {
                Some(deadline) if deadline <= t => self.expire(deadline, actions),
                _ => return,
            }
        }
    }

    /// Take a latched event for `kind` that arrived before `deadline`.
    fn take_latched(&mut self, kind: EventKind, deadline: DateTime<Utc>) -> Option<Latched> {
        match self.latched.get(&kind) {
            Some(l) if l.at < deadline => self.latched.remove(&kind),
            _ => None,
        }
    }

    /// Returns true if the step advanced.
    fn consume_latched(&mut self, actions: &mut Vec<Action>) -> bool {
        match self.step.clone() {
            Step::Expect { kind, deadline } => {
                let Some(latched) = self.take_latched(kind, deadline) else {
                    return false;
                };
                self.on_expected(latched, actions);
                true
            }
            Step::ButtonWindow {
                prompt_ordinal,
                deadline,
            } => {
                let Some(confirm) = self.take_latched(EventKind::ButtonConfirmed, deadline) else {
                    return false;
                };
                if confirm.ordinal < prompt_ordinal {
                    // Printed before the prompt; not an answer to it.
                    return false;
                }
                let at = confirm.at.max(self.entered_at);
                let outcome =
                    StageOutcome::new(StageId::Button, StageStatus::Pass, self.entered_at, at)
                        .with_detail(confirm.text);
                self.record(outcome, actions);
                self.advance(at, actions);
                true
            }
            Step::Generating | Step::OperatorSerial | Step::Sending { .. } | Step::Idle => false,
        }
    }

    fn on_expected(&mut self, latched: Latched, actions: &mut Vec<Action>) {
        // A latched event completes the stage no earlier than its entry.
        let at = latched.at.max(self.entered_at);
        match self.state {
            SequencerState::WaitReset
            | SequencerState::WaitFactoryMode
            | SequencerState::Rtc
            | SequencerState::Pressure => {
                let Some(stage) = self.state.stage() else {
                    return;
                };
                let measured = match latched.event {
                    Event::PressureSignal(value) => value,
                    _ => None,
                };
                let outcome = StageOutcome::new(stage, StageStatus::Pass, self.entered_at, at)
                    .with_measured(measured)
                    .with_detail(latched.text);
                self.record(outcome, actions);
                self.advance(at, actions);
            }
            SequencerState::Button => {
                // The window runs from the prompt itself, even if it was latched.
                self.step = Step::ButtonWindow {
                    prompt_ordinal: latched.ordinal,
                    deadline: after(latched.at, self.config.timeouts.button_window),
                };
            }
            SequencerState::AwaitHwVersionPrompt => {
                let value = self
                    .hw_override
                    .clone()
                    .or_else(|| self.config.default_hw_version.clone());
                match value {
                    Some(value) => self.send(StageId::HwVersion, value, actions),
                    None => {
                        let outcome = StageOutcome::new(
                            StageId::HwVersion,
                            StageStatus::Fail,
                            self.entered_at,
                            at,
                        )
                        .with_detail("no hardware version configured or supplied");
                        self.record(outcome, actions);
                        self.advance(at, actions);
                    }
                }
            }
            SequencerState::AwaitSnPrompt => {
                if self.config.generate_serial {
                    self.step = Step::Generating;
                    actions.push(Action::GenerateSerial);
                } else {
                    self.request_operator_serial(at, actions);
                }
            }
            SequencerState::Aggregate | SequencerState::Done | SequencerState::Aborted => {}
        }
    }

    fn expire(&mut self, deadline: DateTime<Utc>, actions: &mut Vec<Action>) {
        match (self.state, self.step.clone()) {
            (SequencerState::WaitReset, _) => {
                let outcome = StageOutcome::new(
                    StageId::Reset,
                    StageStatus::Timeout,
                    self.entered_at,
                    deadline,
                );
                self.record(outcome, actions);
                self.abort(AbortReason::ResetNotObserved, deadline, actions);
            }
            // The factory-mode window closing is not a failure.
            (SequencerState::WaitFactoryMode, _) => self.advance(deadline, actions),
            (state, step) => {
                let Some(stage) = state.stage() else {
                    return;
                };
                let mut outcome =
                    StageOutcome::new(stage, StageStatus::Timeout, self.entered_at, deadline);
                if state == SequencerState::Button {
                    outcome = outcome.with_detail(match step {
                        Step::ButtonWindow { .. } => "button not pressed within window",
                        _ => "no button prompt",
                    });
                }
                self.record(outcome, actions);
                self.advance(deadline, actions);
            }
        }
    }

    // -------------------------------------------------------------------------
    // Operator, generator and write acknowledgements
    // -------------------------------------------------------------------------

    fn on_operator(&mut self, input: OperatorInput, actions: &mut Vec<Action>) {
        match input {
            OperatorInput::HardwareVersion(raw) => {
                let hw_pending = self.state < SequencerState::AwaitHwVersionPrompt
                    || (self.state == SequencerState::AwaitHwVersionPrompt
                        && matches!(self.step, Step::Expect { .. }));
                match clean_operator_value(&raw) {
                    Ok(value) if hw_pending => self.hw_override = Some(value),
                    Ok(value) => actions.push(Action::Notice(format!(
                        "hardware version '{}' ignored: already sent",
                        value
                    ))),
                    Err(reason) => actions.push(Action::Notice(format!(
                        "hardware version rejected: {}",
                        reason
                    ))),
                }
            }
            OperatorInput::SerialNumber(raw) => {
                let value = match clean_operator_value(&raw) {
                    Ok(value) => value,
                    Err(reason) => {
                        actions.push(Action::Notice(format!(
                            "serial number rejected: {}",
                            reason
                        )));
                        return;
                    }
                };
                if self.step == Step::OperatorSerial {
                    self.send(StageId::SerialNumber, value, actions);
                    return;
                }
                let sn_pending = self.state < SequencerState::AwaitSnPrompt
                    || (self.state == SequencerState::AwaitSnPrompt
                        && matches!(self.step, Step::Expect { .. } | Step::Generating));
                if !sn_pending {
                    actions.push(Action::Notice(format!(
                        "serial number '{}' ignored: already sent",
                        value
                    )));
                    return;
                }
                if self.config.generate_serial && !self.generator_failed {
                    actions.push(Action::Notice(format!(
                        "serial number '{}' kept as fallback; a serial rule is configured",
                        value
                    )));
                }
                self.queued_serial = Some(value);
            }
        }
    }

    fn on_generated(&mut self, serial: String, now: DateTime<Utc>, actions: &mut Vec<Action>) {
        if self.step != Step::Generating {
            return;
        }
        match clean_operator_value(&serial) {
            Ok(value) => self.send(StageId::SerialNumber, value, actions),
            Err(reason) => {
                self.generator_failed = true;
                actions.push(Action::Notice(format!(
                    "generated serial unusable ({}); falling back to operator input",
                    reason
                )));
                self.request_operator_serial(now, actions);
            }
        }
    }

    fn on_sent(&mut self, now: DateTime<Utc>, actions: &mut Vec<Action>) {
        let Step::Sending { stage, value } = self.step.clone() else {
            return;
        };
        match stage {
            StageId::HwVersion => self.session.hw_revision = Some(value.clone()),
            StageId::SerialNumber => self.session.serial_number = Some(value.clone()),
            _ => {}
        }
        let outcome =
            StageOutcome::new(stage, StageStatus::Pass, self.entered_at, now).with_detail(value);
        self.record(outcome, actions);
        self.advance(now, actions);
    }

    fn request_operator_serial(&mut self, now: DateTime<Utc>, actions: &mut Vec<Action>) {
        if let Some(value) = self.queued_serial.take() {
            self.send(StageId::SerialNumber, value, actions);
        } else if self.operator_closed {
            self.abort(AbortReason::OperatorUnavailable, now, actions);
        } else {
            self.step = Step::OperatorSerial;
            actions.push(Action::AwaitOperator(OperatorField::SerialNumber));
        }
    }

    // -------------------------------------------------------------------------
    // Transitions
    // -------------------------------------------------------------------------

    fn send(&mut self, stage: StageId, value: String, actions: &mut Vec<Action>) {
        actions.push(Action::Send {
            stage,
            value: value.clone(),
        });
        self.step = Step::Sending { stage, value };
    }

    fn record(&mut self, outcome: StageOutcome, actions: &mut Vec<Action>) {
        if self.session.record(outcome.clone()) {
            actions.push(Action::StageFinished(outcome));
        }
    }

    fn advance(&mut self, at: DateTime<Utc>, actions: &mut Vec<Action>) {
        match self.state.next() {
            Some(next) => self.enter(next, at, actions),
            None => self.step = Step::Idle,
        }
    }

    fn enter(&mut self, state: SequencerState, at: DateTime<Utc>, actions: &mut Vec<Action>) {
        self.state = state;
        self.entered_at = at;
        let timeouts = self.config.timeouts;
        let expect = |kind, timeout| Step::Expect {
            kind,
            deadline: after(at, timeout),
        };

        self.step = match state {
            SequencerState::WaitReset => expect(EventKind::Reset, timeouts.reset),
            SequencerState::WaitFactoryMode => {
                if !self.config.detect_factory_mode {
                    let outcome =
                        StageOutcome::new(StageId::FactoryMode, StageStatus::Skipped, at, at);
                    self.record(outcome, actions);
                    self.advance(at, actions);
                    return;
                }
                expect(EventKind::FactoryMode, timeouts.factory_mode_window)
            }
            SequencerState::Rtc => expect(EventKind::Rtc, timeouts.rtc),
            SequencerState::Pressure => expect(EventKind::Pressure, timeouts.pressure),
            SequencerState::Button => expect(EventKind::ButtonPrompt, timeouts.button_prompt),
            SequencerState::AwaitHwVersionPrompt => {
                expect(EventKind::HwVersionPrompt, timeouts.prompt)
            }
            SequencerState::AwaitSnPrompt => expect(EventKind::SnPrompt, timeouts.prompt),
            SequencerState::Aggregate => {
                self.session.finalize(at);
                self.state = SequencerState::Done;
                actions.push(Action::Finished);
                Step::Idle
            }
            SequencerState::Done | SequencerState::Aborted => Step::Idle,
        };
    }

    fn abort(&mut self, reason: AbortReason, at: DateTime<Utc>, actions: &mut Vec<Action>) {
        if self.state.is_terminal() {
            return;
        }
        self.session.abort(reason, at);
        self.state = SequencerState::Aborted;
        self.step = Step::Idle;
        actions.push(Action::Finished);
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Mode;
    use chrono::TimeZone;

    fn t(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_760_000_000_000 + ms)
            .single()
            .expect("valid timestamp")
    }

    fn context() -> SessionContext {
        SessionContext {
            session_id: "test".to_string(),
            port: "/dev/ttyUSB0".to_string(),
            chip_type: "esp32".to_string(),
            mode: Mode::Develop,
            mac_address: None,
            raw_log_path: None,
            started_at: t(0),
        }
    }

    fn config() -> SequencerConfig {
        SequencerConfig {
            default_hw_version: Some("HW1.0".to_string()),
            ..SequencerConfig::default()
        }
    }

    fn event(seq: &mut Sequencer, event: Event, at: i64) -> Vec<Action> {
        seq.step(
            Input::Event {
                event,
                text: "line".to_string(),
                at: t(at),
            },
            t(at),
        )
    }

    fn status(seq: &Sequencer, stage: StageId) -> Option<StageStatus> {
        seq.session().outcome(stage).map(|o| o.status)
    }

    #[test]
    fn starts_waiting_for_reset() {
        let seq = Sequencer::new(config(), context());
        assert_eq!(seq.state(), SequencerState::WaitReset);
        assert_eq!(seq.deadline(), Some(t(DEFAULT_RESET_TIMEOUT_MS as i64)));
    }

    #[test]
    fn output_before_reset_is_ignored() {
        let mut seq = Sequencer::new(config(), context());
        event(&mut seq, Event::RtcSignal, 10);
        event(&mut seq, Event::ResetDetected, 20);
        assert_eq!(status(&seq, StageId::Reset), Some(StageStatus::Pass));
        // Factory mode skipped, now waiting in RTC; the pre-reset RTC line did not count.
        assert_eq!(status(&seq, StageId::FactoryMode), Some(StageStatus::Skipped));
        assert_eq!(seq.state(), SequencerState::Rtc);
    }

    #[test]
    fn reset_timeout_aborts() {
        let mut seq = Sequencer::new(config(), context());
        let actions = seq.step(Input::Tick, t(DEFAULT_RESET_TIMEOUT_MS as i64));
        assert!(actions.contains(&Action::Finished));
        let session = seq.into_session();
        assert!(session.aborted);
        assert_eq!(session.abort_reason, Some(AbortReason::ResetNotObserved));
        assert_eq!(
            session.outcome(StageId::Reset).map(|o| o.status),
            Some(StageStatus::Timeout)
        );
    }

    #[test]
    fn early_tick_does_nothing() {
        let mut seq = Sequencer::new(config(), context());
        assert!(seq.step(Input::Tick, t(5)).is_empty());
        assert_eq!(seq.state(), SequencerState::WaitReset);
    }

    #[test]
    fn factory_mode_detected_when_configured() {
        let mut seq = Sequencer::new(
            SequencerConfig {
                detect_factory_mode: true,
                ..config()
            },
            context(),
        );
        event(&mut seq, Event::ResetDetected, 0);
        assert_eq!(seq.state(), SequencerState::WaitFactoryMode);
        event(&mut seq, Event::FactoryModeDetected, 500);
        assert_eq!(status(&seq, StageId::FactoryMode), Some(StageStatus::Pass));
        assert_eq!(seq.state(), SequencerState::Rtc);
    }

    #[test]
    fn factory_window_elapses_without_entry() {
        let mut seq = Sequencer::new(
            SequencerConfig {
                detect_factory_mode: true,
                ..config()
            },
            context(),
        );
        event(&mut seq, Event::ResetDetected, 0);
        seq.step(Input::Tick, t(DEFAULT_FACTORY_MODE_WINDOW_MS as i64));
        assert_eq!(seq.state(), SequencerState::Rtc);
        assert_eq!(status(&seq, StageId::FactoryMode), None);
    }

    #[test]
    fn rtc_at_deadline_is_timeout() {
        let mut seq = Sequencer::new(config(), context());
        event(&mut seq, Event::ResetDetected, 0);
        let deadline = seq.deadline().expect("rtc deadline");
        assert_eq!(deadline, t(DEFAULT_RTC_TIMEOUT_MS as i64));
        // Arrives exactly at the deadline: too late.
        event(&mut seq, Event::RtcSignal, DEFAULT_RTC_TIMEOUT_MS as i64);
        assert_eq!(status(&seq, StageId::Rtc), Some(StageStatus::Timeout));
        assert_eq!(seq.state(), SequencerState::Pressure);
    }

    #[test]
    fn latched_event_answers_later_stage() {
        let mut seq = Sequencer::new(config(), context());
        event(&mut seq, Event::ResetDetected, 0);
        // Pressure printed while RTC is still pending.
        event(&mut seq, Event::PressureSignal(Some(99.5)), 100);
        event(&mut seq, Event::RtcSignal, 200);
        assert_eq!(status(&seq, StageId::Rtc), Some(StageStatus::Pass));
        assert_eq!(status(&seq, StageId::Pressure), Some(StageStatus::Pass));
        assert_eq!(seq.session().pressure(), Some(99.5));
        assert_eq!(seq.state(), SequencerState::Button);
    }

    #[test]
    fn confirmation_before_prompt_does_not_count() {
        let mut seq = Sequencer::new(config(), context());
        event(&mut seq, Event::ResetDetected, 0);
        event(&mut seq, Event::RtcSignal, 10);
        event(&mut seq, Event::PressureSignal(Some(1.0)), 20);
        event(&mut seq, Event::ButtonConfirmed, 30);
        event(&mut seq, Event::ButtonPromptDetected, 40);
        assert_eq!(seq.state(), SequencerState::Button);
        event(&mut seq, Event::ButtonConfirmed, 50);
        assert_eq!(status(&seq, StageId::Button), Some(StageStatus::Pass));
    }

    #[test]
    fn operator_override_replaces_default_hw_version() {
        let mut seq = Sequencer::new(config(), context());
        seq.step(
            Input::Operator(OperatorInput::HardwareVersion(" HW2.1 ".to_string())),
            t(0),
        );
        event(&mut seq, Event::ResetDetected, 0);
        event(&mut seq, Event::RtcSignal, 10);
        event(&mut seq, Event::PressureSignal(Some(1.0)), 20);
        event(&mut seq, Event::ButtonPromptDetected, 30);
        event(&mut seq, Event::ButtonConfirmed, 40);
        let actions = event(&mut seq, Event::HwVersionPrompt, 50);
        assert_eq!(
            actions,
            vec![Action::Send {
                stage: StageId::HwVersion,
                value: "HW2.1".to_string()
            }]
        );
        // No outcome until the write is acknowledged.
        assert_eq!(status(&seq, StageId::HwVersion), None);
        seq.step(Input::Sent, t(55));
        assert_eq!(status(&seq, StageId::HwVersion), Some(StageStatus::Pass));
        assert_eq!(seq.session().hw_revision.as_deref(), Some("HW2.1"));
    }

    #[test]
    fn missing_hw_version_fails_stage() {
        let mut seq = Sequencer::new(SequencerConfig::default(), context());
        event(&mut seq, Event::ResetDetected, 0);
        event(&mut seq, Event::RtcSignal, 10);
        event(&mut seq, Event::PressureSignal(None), 20);
        event(&mut seq, Event::ButtonPromptDetected, 30);
        event(&mut seq, Event::ButtonConfirmed, 40);
        event(&mut seq, Event::HwVersionPrompt, 50);
        assert_eq!(status(&seq, StageId::HwVersion), Some(StageStatus::Fail));
        assert_eq!(seq.state(), SequencerState::AwaitSnPrompt);
    }

    fn at_sn_prompt(config: SequencerConfig) -> (Sequencer, Vec<Action>) {
        let mut seq = Sequencer::new(config, context());
        event(&mut seq, Event::ResetDetected, 0);
        event(&mut seq, Event::RtcSignal, 10);
        event(&mut seq, Event::PressureSignal(Some(1.0)), 20);
        event(&mut seq, Event::ButtonPromptDetected, 30);
        event(&mut seq, Event::ButtonConfirmed, 40);
        event(&mut seq, Event::HwVersionPrompt, 50);
        seq.step(Input::Sent, t(51));
        let actions = event(&mut seq, Event::SnPrompt, 60);
        (seq, actions)
    }

    #[test]
    fn serial_from_operator_when_no_rule() {
        let (mut seq, actions) = at_sn_prompt(config());
        assert_eq!(
            actions,
            vec![Action::AwaitOperator(OperatorField::SerialNumber)]
        );
        // Waiting for the operator has no deadline.
        assert_eq!(seq.deadline(), None);
        let actions = seq.step(
            Input::Operator(OperatorInput::SerialNumber("SN-42".to_string())),
            t(90_000),
        );
        assert_eq!(
            actions,
            vec![Action::Send {
                stage: StageId::SerialNumber,
                value: "SN-42".to_string()
            }]
        );
        let actions = seq.step(Input::Sent, t(90_001));
        assert!(actions.contains(&Action::Finished));
        let session = seq.into_session();
        assert!(session.passed());
        assert_eq!(session.serial_number.as_deref(), Some("SN-42"));
    }

    #[test]
    fn generator_failure_falls_back_to_operator() {
        let (mut seq, actions) = at_sn_prompt(SequencerConfig {
            generate_serial: true,
            ..config()
        });
        assert_eq!(actions, vec![Action::GenerateSerial]);
        let actions = seq.step(Input::SerialFailed("store locked".to_string()), t(61));
        assert!(actions.contains(&Action::AwaitOperator(OperatorField::SerialNumber)));
        let actions = seq.step(Input::OperatorClosed, t(62));
        assert!(actions.contains(&Action::Finished));
        let session = seq.into_session();
        assert_eq!(session.abort_reason, Some(AbortReason::OperatorUnavailable));
    }

    #[test]
    fn serial_prompt_seen_before_hw_ack_is_answered_on_ack() {
        let mut seq = Sequencer::new(
            SequencerConfig {
                generate_serial: true,
                ..config()
            },
            context(),
        );
        event(&mut seq, Event::ResetDetected, 0);
        event(&mut seq, Event::RtcSignal, 10);
        event(&mut seq, Event::PressureSignal(Some(1.0)), 20);
        event(&mut seq, Event::ButtonPromptDetected, 30);
        event(&mut seq, Event::ButtonConfirmed, 40);
        event(&mut seq, Event::SnPrompt, 45);
        event(&mut seq, Event::HwVersionPrompt, 50);

        let actions = seq.step(Input::Sent, t(51));
        assert!(actions.contains(&Action::GenerateSerial));
        assert_eq!(status(&seq, StageId::HwVersion), Some(StageStatus::Pass));
        assert_eq!(seq.state(), SequencerState::AwaitSnPrompt);
    }

    #[test]
    fn disconnect_while_waiting_for_operator_serial_aborts() {
        let (mut seq, actions) = at_sn_prompt(config());
        assert_eq!(
            actions,
            vec![Action::AwaitOperator(OperatorField::SerialNumber)]
        );
        let actions = seq.step(Input::Disconnected("unplugged".to_string()), t(70));
        assert!(actions.contains(&Action::Finished));
        assert!(seq.is_finished());
        let session = seq.into_session();
        assert!(session.aborted);
        assert_eq!(
            session.abort_reason,
            Some(AbortReason::Disconnected("unplugged".to_string()))
        );
        assert!(session.outcome(StageId::SerialNumber).is_none());
        assert_eq!(
            session.outcome(StageId::HwVersion).map(|o| o.status),
            Some(StageStatus::Pass)
        );
    }

    #[test]
    fn disconnect_leaves_in_flight_stage_unrecorded() {
        let mut seq = Sequencer::new(config(), context());
        event(&mut seq, Event::ResetDetected, 0);
        event(&mut seq, Event::RtcSignal, 10);
        let actions = seq.step(Input::Disconnected("unplugged".to_string()), t(20));
        assert_eq!(actions, vec![Action::Finished]);
        assert!(seq.is_finished());
        assert_eq!(seq.deadline(), None);
        let session = seq.into_session();
        assert!(session.aborted);
        assert!(session.outcome(StageId::Pressure).is_none());
        assert!(!session.passed());
    }

    #[test]
    fn inputs_after_finish_are_ignored() {
        let mut seq = Sequencer::new(config(), context());
        seq.step(Input::Disconnected("gone".to_string()), t(1));
        assert!(event(&mut seq, Event::ResetDetected, 2).is_empty());
        assert!(seq.step(Input::Tick, t(1_000_000)).is_empty());
    }

    #[test]
    fn second_reset_is_noticed_not_latched() {
        let mut seq = Sequencer::new(config(), context());
        event(&mut seq, Event::ResetDetected, 0);
        let actions = event(&mut seq, Event::ResetDetected, 10);
        assert!(matches!(actions.as_slice(), [Action::Notice(_)]));
        assert_eq!(seq.state(), SequencerState::Rtc);
    }
}
