//! # Station Configuration
//!
//! `StationConfig` is read from a TOML file (all keys optional), then
//! selected keys are overridden from `FLASHCHECK_*` environment variables.
//!
//! | Key                   | Env override                    |
//! |-----------------------|---------------------------------|
//! | `monitor_baud`        | `FLASHCHECK_MONITOR_BAUD`       |
//! | `test_after_flash`    | `FLASHCHECK_TEST_AFTER_FLASH`   |
//! | `device_code_rule`    | `FLASHCHECK_DEVICE_CODE_RULE`   |
//! | `default_hw_version`  | `FLASHCHECK_DEFAULT_HW_VERSION` |
//! | `chip_type`           | `FLASHCHECK_CHIP_TYPE`          |
//! | `mode`                | `FLASHCHECK_MODE`               |
//! | `database`            | `FLASHCHECK_DATABASE`           |
//! | `log_dir`             | `FLASHCHECK_LOG_DIR`            |
//!
//! The serial-number rule is parsed during [`StationConfig::load`], so a bad
//! rule stops the station before any session begins.

use flashcheck_core::primitives::{
    DEFAULT_BUTTON_PROMPT_TIMEOUT_MS, DEFAULT_BUTTON_WINDOW_MS, DEFAULT_FACTORY_MODE_WINDOW_MS,
    DEFAULT_LINE_FLUSH_MS, DEFAULT_MONITOR_BAUD, DEFAULT_PRESSURE_TIMEOUT_MS,
    DEFAULT_PROMPT_TIMEOUT_MS, DEFAULT_RESET_TIMEOUT_MS, DEFAULT_RTC_TIMEOUT_MS,
};
use flashcheck_core::{
    FlashcheckError, Mode, SequencerConfig, SerialNumberGenerator, StageTimeouts,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config file picked up from the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "flashcheck.toml";

/// Template written by `flashcheck init`.
pub const CONFIG_TEMPLATE: &str = r#"# flashcheck station configuration

# Baud rate of the device monitor port.
monitor_baud = 115200

# Run the self-test after flashing. When false, `flashcheck run` does nothing.
test_after_flash = true

# Serial-number rule, e.g. "YYMMDD+2digit", "SN:YYMMDD+3digit", "MAC6".
# Leave empty to type serial numbers by hand.
device_code_rule = ""

# Sent at the hardware-version prompt unless the operator types `hw <value>`.
# default_hw_version = "HW1.0"

chip_type = "esp32"
mode = "develop"
database = "flashcheck.redb"
log_dir = "logs"
detect_factory_mode = false

[timeouts]
reset_ms = 60000
factory_mode_window_ms = 2000
rtc_ms = 10000
pressure_ms = 10000
button_prompt_ms = 30000
button_window_ms = 10000
prompt_ms = 30000
line_flush_ms = 100
"#;

// =============================================================================
// TIMEOUTS
// =============================================================================

/// Per-stage timeouts in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimeoutConfig {
    pub reset_ms: u64,
    pub factory_mode_window_ms: u64,
    pub rtc_ms: u64,
    pub pressure_ms: u64,
    pub button_prompt_ms: u64,
    pub button_window_ms: u64,
    pub prompt_ms: u64,
    pub line_flush_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            reset_ms: DEFAULT_RESET_TIMEOUT_MS,
            factory_mode_window_ms: DEFAULT_FACTORY_MODE_WINDOW_MS,
            rtc_ms: DEFAULT_RTC_TIMEOUT_MS,
            pressure_ms: DEFAULT_PRESSURE_TIMEOUT_MS,
            button_prompt_ms: DEFAULT_BUTTON_PROMPT_TIMEOUT_MS,
            button_window_ms: DEFAULT_BUTTON_WINDOW_MS,
            prompt_ms: DEFAULT_PROMPT_TIMEOUT_MS,
            line_flush_ms: DEFAULT_LINE_FLUSH_MS,
        }
    }
}

impl TimeoutConfig {
    fn stage_timeouts(&self) -> StageTimeouts {
        StageTimeouts {
            reset: Duration::from_millis(self.reset_ms),
            factory_mode_window: Duration::from_millis(self.factory_mode_window_ms),
            rtc: Duration::from_millis(self.rtc_ms),
            pressure: Duration::from_millis(self.pressure_ms),
            button_prompt: Duration::from_millis(self.button_prompt_ms),
            button_window: Duration::from_millis(self.button_window_ms),
            prompt: Duration::from_millis(self.prompt_ms),
        }
    }
}

// =============================================================================
// STATION CONFIG
// =============================================================================

/// Everything a station needs to run sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StationConfig {
    pub monitor_baud: u32,
    pub test_after_flash: bool,
    /// Empty or absent means manual serial entry.
    pub device_code_rule: Option<String>,
    pub default_hw_version: Option<String>,
    pub chip_type: String,
    pub mode: Mode,
    pub database: PathBuf,
    /// Where raw session logs go; `None` disables them.
    pub log_dir: Option<PathBuf>,
    pub detect_factory_mode: bool,
    pub timeouts: TimeoutConfig,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            monitor_baud: DEFAULT_MONITOR_BAUD,
            test_after_flash: true,
            device_code_rule: None,
            default_hw_version: None,
            chip_type: "esp32".to_string(),
            mode: Mode::Develop,
            database: PathBuf::from("flashcheck.redb"),
            log_dir: Some(PathBuf::from("logs")),
            detect_factory_mode: false,
            timeouts: TimeoutConfig::default(),
        }
    }
}

impl StationConfig {
    /// Load from `path` (or `flashcheck.toml` if present), apply environment
    /// overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self, FlashcheckError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None if Path::new(DEFAULT_CONFIG_FILE).is_file() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, FlashcheckError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            FlashcheckError::Config(format!("cannot read '{}': {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    /// Parse TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, FlashcheckError> {
        toml::from_str(text).map_err(|e| FlashcheckError::Config(e.to_string()))
    }

    /// Apply `FLASHCHECK_*` overrides from `lookup`.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), FlashcheckError> {
        if let Some(v) = lookup("FLASHCHECK_MONITOR_BAUD") {
            self.monitor_baud = v.trim().parse().map_err(|_| {
                FlashcheckError::Config(format!("FLASHCHECK_MONITOR_BAUD: invalid baud '{}'", v))
            })?;
        }
        if let Some(v) = lookup("FLASHCHECK_TEST_AFTER_FLASH") {
            self.test_after_flash = parse_bool("FLASHCHECK_TEST_AFTER_FLASH", &v)?;
        }
        if let Some(v) = lookup("FLASHCHECK_DEVICE_CODE_RULE") {
            self.device_code_rule = Some(v);
        }
        if let Some(v) = lookup("FLASHCHECK_DEFAULT_HW_VERSION") {
            self.default_hw_version = Some(v);
        }
        if let Some(v) = lookup("FLASHCHECK_CHIP_TYPE") {
            self.chip_type = v;
        }
        if let Some(v) = lookup("FLASHCHECK_MODE") {
            self.mode = v
                .parse()
                .map_err(|e| FlashcheckError::Config(format!("FLASHCHECK_MODE: {}", e)))?;
        }
        if let Some(v) = lookup("FLASHCHECK_DATABASE") {
            self.database = PathBuf::from(v);
        }
        if let Some(v) = lookup("FLASHCHECK_LOG_DIR") {
            self.log_dir = if v.trim().is_empty() {
                None
            } else {
                Some(PathBuf::from(v))
            };
        }
        Ok(())
    }

    /// Reject values that cannot drive a session.
    pub fn validate(&self) -> Result<(), FlashcheckError> {
        if self.monitor_baud == 0 {
            return Err(FlashcheckError::Config(
                "monitor_baud must be positive".to_string(),
            ));
        }
        let t = &self.timeouts;
        if [
            t.reset_ms,
            t.rtc_ms,
            t.pressure_ms,
            t.button_prompt_ms,
            t.button_window_ms,
            t.prompt_ms,
            t.line_flush_ms,
        ]
        .contains(&0)
        {
            return Err(FlashcheckError::Config(
                "stage timeouts must be positive".to_string(),
            ));
        }
        self.serial_generator().map(|_| ())
    }

    /// The configured rule, trimmed; empty counts as none.
    #[must_use]
    pub fn rule(&self) -> Option<&str> {
        self.device_code_rule
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
    }

    /// Build the generator for the configured rule, if any.
    pub fn serial_generator(&self) -> Result<Option<SerialNumberGenerator>, FlashcheckError> {
        self.rule().map(SerialNumberGenerator::from_rule).transpose()
    }

    /// Sequencer settings for one session.
    #[must_use]
    pub fn sequencer_config(&self) -> SequencerConfig {
        SequencerConfig {
            timeouts: self.timeouts.stage_timeouts(),
            detect_factory_mode: self.detect_factory_mode,
            default_hw_version: self
                .default_hw_version
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string),
            generate_serial: self.rule().is_some(),
        }
    }

    #[must_use]
    pub fn line_flush(&self) -> Duration {
        Duration::from_millis(self.timeouts.line_flush_ms)
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, FlashcheckError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(FlashcheckError::Config(format!(
            "{}: expected a boolean, got '{}'",
            key, other
        ))),
    }
}

// =============================================================================
// TESTS
// =============================================================================
