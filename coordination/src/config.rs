//! Engine timing configuration.
//!
//! Sources, lowest priority first: defaults, an optional TOML file, then
//! `LOOP_*` environment variables.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::phase::Phase;

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Durations driving the timed phases, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Genres on screen before voting opens.
    pub announcement_ms: u64,
    /// Vote window, started by the first vote.
    pub vote_window_ms: u64,
    /// Time agents get to submit proposals.
    pub competition_ms: u64,
    pub construction_ms: u64,
    pub presentation_ms: u64,
    /// Pause in cleanup before the next iteration.
    pub settle_ms: u64,
    /// Countdown tick period (display only).
    pub tick_interval_ms: u64,
    /// Transitions kept in the in-memory log.
    pub transition_log_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            announcement_ms: 10_000,
            vote_window_ms: 30_000,
            competition_ms: 60_000,
            construction_ms: 20_000,
            presentation_ms: 45_000,
            settle_ms: 5_000,
            tick_interval_ms: 1_000,
            transition_log_capacity: 64,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by the environment.
    pub fn from_env() -> Self {
        Self::default().with_env()
    }

    /// Load from an optional TOML file, then apply the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::from_toml_str(&std::fs::read_to_string(path)?)?,
            None => Self::default(),
        };
        let config = config.with_env();
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn with_env(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply `LOOP_*` overrides from `lookup`. Unparseable values are
    /// logged and ignored.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let fields: [(&str, &mut u64); 7] = [
            ("LOOP_ANNOUNCEMENT_MS", &mut self.announcement_ms),
            ("LOOP_VOTE_WINDOW_MS", &mut self.vote_window_ms),
            ("LOOP_COMPETITION_MS", &mut self.competition_ms),
            ("LOOP_CONSTRUCTION_MS", &mut self.construction_ms),
            ("LOOP_PRESENTATION_MS", &mut self.presentation_ms),
            ("LOOP_SETTLE_MS", &mut self.settle_ms),
            ("LOOP_TICK_INTERVAL_MS", &mut self.tick_interval_ms),
        ];
        for (key, field) in fields {
            if let Some(raw) = lookup(key) {
                match raw.trim().parse::<u64>() {
                    Ok(value) => *field = value,
                    Err(e) => warn!(key, value = %raw, error = %e, "Ignoring invalid override"),
                }
            }
        }
        self
    }

    /// Reject zero-length windows. A zero tick interval disables ticks.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let windows = [
            ("announcement_ms", self.announcement_ms),
            ("vote_window_ms", self.vote_window_ms),
            ("competition_ms", self.competition_ms),
            ("construction_ms", self.construction_ms),
            ("presentation_ms", self.presentation_ms),
            ("settle_ms", self.settle_ms),
        ];
        for (name, value) in windows {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be greater than 0")));
            }
        }
        Ok(())
    }

    /// Timer started on entering `phase`, if the phase is timed.
    pub fn phase_timer(&self, phase: Phase) -> Option<Duration> {
        let ms = match phase {
            Phase::VotingAnnouncement => self.announcement_ms,
            Phase::AgentCompetition => self.competition_ms,
            Phase::SceneConstruction => self.construction_ms,
            Phase::ScenePresentation => self.presentation_ms,
            Phase::CleanupReset => self.settle_ms,
            _ => return None,
        };
        Some(Duration::from_millis(ms))
    }

    pub fn vote_window(&self) -> Duration {
        Duration::from_millis(self.vote_window_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}
