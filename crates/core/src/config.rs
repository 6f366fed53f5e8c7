//! Orchestrator configuration.
//!
//! One [`OrchestratorConfig`] record selects phase durations, the demo
//! timing rules, the dispatcher retry budget and the journey turnaround.
//! Every field has a default, so an empty TOML document is a valid config.
//!
//! ```toml
//! [phases]
//! in_flight_source = "fixed"
//! in_flight_minutes = 90
//!
//! [demo]
//! timing = "scaled"
//! speed_factor = 600
//!
//! [dispatcher]
//! timeout_secs = 5
//! max_attempts = 3
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Error;
use crate::result::Result;

/// Top-level configuration record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OrchestratorConfig {
    pub phases: PhaseDurations,
    pub demo: DemoConfig,
    pub dispatcher: DispatcherConfig,
    pub journey: JourneyConfig,
}

/// Where the in-flight duration comes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InFlightSource {
    /// Scheduled arrival minus scheduled departure when both are present,
    /// otherwise `in_flight_minutes`.
    #[default]
    Schedule,
    /// Always `in_flight_minutes`.
    Fixed,
}

/// Base phase durations in minutes (realtime mode).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PhaseDurations {
    pub scheduled_minutes: u64,
    pub boarding_minutes: u64,
    pub departed_minutes: u64,
    pub in_flight_minutes: u64,
    pub landed_minutes: u64,
    pub in_flight_source: InFlightSource,
}

impl Default for PhaseDurations {
    fn default() -> Self {
        Self {
            scheduled_minutes: 1,
            boarding_minutes: 1,
            departed_minutes: 1,
            in_flight_minutes: 120,
            landed_minutes: 1,
            in_flight_source: InFlightSource::Schedule,
        }
    }
}

/// How demo flights compress their phase durations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DemoTiming {
    /// Base minutes divided by `speed_factor`, floored at one second.
    #[default]
    Scaled,
    /// `fixed_phase_seconds` for every phase.
    Fixed,
}

/// Demo-mode activation and timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DemoConfig {
    pub speed_factor: u64,
    /// Flights whose identifier starts with this prefix run in demo mode
    /// even without the explicit flag.
    pub identifier_prefix: String,
    pub timing: DemoTiming,
    pub fixed_phase_seconds: u64,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            speed_factor: 1200,
            identifier_prefix: "DEMO".to_string(),
            timing: DemoTiming::Scaled,
            fixed_phase_seconds: 2,
        }
    }
}

/// Per-call policy for side-effect dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DispatcherConfig {
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: u32,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            max_attempts: 5,
            initial_backoff_ms: 100,
            max_backoff_ms: 5_000,
            backoff_multiplier: 2,
        }
    }
}

impl DispatcherConfig {
    /// Start-to-close timeout of a single attempt.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Backoff before retry number `attempt` (1-based; attempt 1 is the first retry).
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = u64::from(self.backoff_multiplier.max(1)).saturating_pow(exponent);
        let millis = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(millis)
    }
}

/// Multi-leg journey settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JourneyConfig {
    pub turnaround_secs: u64,
    /// Forward `cancelJourney` to the leg that is currently executing.
    pub cancel_active_leg: bool,
}

impl Default for JourneyConfig {
    fn default() -> Self {
        Self {
            turnaround_secs: 1,
            cancel_active_leg: false,
        }
    }
}

impl JourneyConfig {
    #[must_use]
    pub const fn turnaround(&self) -> Duration {
        Duration::from_secs(self.turnaround_secs)
    }
}

impl OrchestratorConfig {
    /// Parse and validate a TOML document.
    ///
    /// # Errors
    ///
    /// Returns `TomlParseFailed` for malformed input and `InvalidConfig`
    /// when a value is out of range.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(source).map_err(|e| Error::toml_parse_failed(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    ///
    /// # Errors
    ///
    /// Returns `FileReadFailed` when the file cannot be read, otherwise the
    /// errors of [`OrchestratorConfig::from_toml_str`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| Error::file_read_failed(path, e.to_string()))?;
        let config = Self::from_toml_str(&source)?;
        debug!(path = %path.display(), "Loaded orchestrator config");
        Ok(config)
    }

    /// Render as TOML.
    ///
    /// # Errors
    ///
    /// Returns `TomlSerializeFailed` if serialization fails.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::TomlSerializeFailed {
            reason: e.to_string(),
        })
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.demo.speed_factor == 0 {
            return Err(Error::invalid_config(
                "demo.speed_factor",
                "must be at least 1",
            ));
        }
        if self.demo.identifier_prefix.trim().is_empty() {
            return Err(Error::invalid_config(
                "demo.identifier_prefix",
                "must not be empty",
            ));
        }
        if self.demo.timing == DemoTiming::Fixed && self.demo.fixed_phase_seconds == 0 {
            return Err(Error::invalid_config(
                "demo.fixed_phase_seconds",
                "must be at least 1 when demo.timing = \"fixed\"",
            ));
        }
        if self.dispatcher.max_attempts == 0 {
            return Err(Error::invalid_config(
                "dispatcher.max_attempts",
                "must be at least 1",
            ));
        }
        if self.dispatcher.timeout_secs == 0 {
            return Err(Error::invalid_config(
                "dispatcher.timeout_secs",
                "must be at least 1",
            ));
        }
        if self.dispatcher.initial_backoff_ms > self.dispatcher.max_backoff_ms {
            return Err(Error::invalid_config(
                "dispatcher.initial_backoff_ms",
                "must not exceed dispatcher.max_backoff_ms",
            ));
        }
        Ok(())
    }
}
