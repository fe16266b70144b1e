//! cutover.toml configuration parser.
//!
//! Every field is optional. `CutoverConfig::health()` and
//! `CutoverConfig::controller()` resolve the raw file into settings with
//! defaults applied and duration strings parsed.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::duration::{parse_duration, DurationError};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CutoverConfig {
    pub server: Option<ServerConfig>,
    pub health: Option<HealthConfig>,
    pub controller: Option<ControllerConfig>,
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    pub port: Option<u16>,
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Signals required in a window before a verdict other than inconclusive.
    pub min_signals: Option<usize>,
    /// How often to re-evaluate while the verdict is inconclusive.
    pub poll_interval: Option<String>,
    /// How long an inconclusive verdict may hold a step before proceeding.
    pub max_inconclusive_wait: Option<String>,
    /// How long received signals are kept in memory.
    pub signal_retention: Option<String>,
    pub probe_path: Option<String>,
    pub probe_interval: Option<String>,
    pub probe_timeout: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Minutes to keep the old blue fleet after a successful cutover.
    pub blue_fleet_retain_minutes: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. "info,cutover_rollout=debug".
    pub filter: Option<String>,
    /// Emit JSON lines instead of the human-readable format.
    pub json: Option<bool>,
}

/// Resolved health monitor settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthSettings {
    pub min_signals: usize,
    pub poll_interval: Duration,
    pub max_inconclusive_wait: Duration,
    pub signal_retention: Duration,
    pub probe_path: String,
    pub probe_interval: Duration,
    pub probe_timeout: Duration,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            min_signals: 1,
            poll_interval: Duration::from_secs(15),
            max_inconclusive_wait: Duration::from_secs(600),
            signal_retention: Duration::from_secs(3600),
            probe_path: "/healthz".to_string(),
            probe_interval: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(2),
        }
    }
}

/// Resolved controller settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerSettings {
    pub blue_fleet_retain: Duration,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            blue_fleet_retain: Duration::from_secs(60 * 60),
        }
    }
}

impl CutoverConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: CutoverConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn health(&self) -> Result<HealthSettings, DurationError> {
        let mut settings = HealthSettings::default();
        let Some(raw) = &self.health else {
            return Ok(settings);
        };

        if let Some(n) = raw.min_signals {
            settings.min_signals = n;
        }
        if let Some(s) = &raw.poll_interval {
            settings.poll_interval = parse_duration(s)?;
        }
        if let Some(s) = &raw.max_inconclusive_wait {
            settings.max_inconclusive_wait = parse_duration(s)?;
        }
        if let Some(s) = &raw.signal_retention {
            settings.signal_retention = parse_duration(s)?;
        }
        if let Some(path) = &raw.probe_path {
            settings.probe_path = path.clone();
        }
        if let Some(s) = &raw.probe_interval {
            settings.probe_interval = parse_duration(s)?;
        }
        if let Some(s) = &raw.probe_timeout {
            settings.probe_timeout = parse_duration(s)?;
        }
        Ok(settings)
    }

    pub fn controller(&self) -> ControllerSettings {
        let mut settings = ControllerSettings::default();
        if let Some(mins) = self
            .controller
            .as_ref()
            .and_then(|c| c.blue_fleet_retain_minutes)
        {
            settings.blue_fleet_retain = Duration::from_secs(mins.saturating_mul(60));
        }
        settings
    }

    pub fn port(&self) -> Option<u16> {
        self.server.as_ref().and_then(|s| s.port)
    }

    pub fn data_dir(&self) -> Option<&Path> {
        self.server.as_ref().and_then(|s| s.data_dir.as_deref())
    }

    pub fn log_filter(&self) -> Option<&str> {
        self.logging.as_ref().and_then(|l| l.filter.as_deref())
    }

    pub fn log_json(&self) -> bool {
        self.logging.as_ref().and_then(|l| l.json).unwrap_or(false)
    }
}
