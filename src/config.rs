//! Run configuration: built-in defaults, an optional JSON file, CLI overrides.
//!
//! JSON shape (every field optional):
//! {
//!   "format": "nina",
//!   "port": "/dev/ttyUSB0",
//!   "baud_rate": 115200,
//!   "log_path": "C:/Users/me/Documents/N.I.N.A/PolarAlignment/2024-03-09.log",
//!   "target_error_arcsec": 20.0,
//!   "max_safety_steps": 50000,
//!   "poll_interval_ms": 1000,
//!   "reply_timeout_ms": 1000
//! }

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use serde::Deserialize;

use crate::Result;
use crate::correction::{DEFAULT_MAX_SAFETY_STEPS, DEFAULT_TARGET_ERROR_ARCSEC, LoopSettings};
use crate::solver_log::LogFormat;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AlignConfig {
    pub format: LogFormat,
    pub port: Option<String>,
    pub baud_rate: u32,
    pub log_path: Option<PathBuf>,
    pub target_error_arcsec: f64,
    pub max_safety_steps: i64,
    pub poll_interval_ms: u64,
    pub reply_timeout_ms: u64,
}

impl Default for AlignConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            port: None,
            baud_rate: 115_200,
            log_path: None,
            target_error_arcsec: DEFAULT_TARGET_ERROR_ARCSEC,
            max_safety_steps: DEFAULT_MAX_SAFETY_STEPS,
            poll_interval_ms: 1000,
            reply_timeout_ms: 1000,
        }
    }
}

impl AlignConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config file {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("parse config file {}", path.display()))
    }

    /// Defaults, or the given file when there is one.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.target_error_arcsec.is_finite() && self.target_error_arcsec > 0.0) {
            bail!(
                "target_error_arcsec must be a positive number, got {}",
                self.target_error_arcsec
            );
        }
        if self.max_safety_steps <= 0 {
            bail!(
                "max_safety_steps must be positive, got {}",
                self.max_safety_steps
            );
        }
        if self.poll_interval_ms == 0 {
            bail!("poll_interval_ms must be positive");
        }
        if !(100..=2000).contains(&self.reply_timeout_ms) {
            bail!(
                "reply_timeout_ms must be within 100..=2000, got {}",
                self.reply_timeout_ms
            );
        }
        if self.baud_rate == 0 {
            bail!("baud_rate must be positive");
        }
        Ok(())
    }

    /// Serial port to use; there is no auto-detection.
    pub fn require_port(&self) -> Result<&str> {
        self.port
            .as_deref()
            .context("no serial port configured; pass --port or set \"port\" in the config file")
    }

    pub fn loop_settings(&self) -> LoopSettings {
        LoopSettings {
            target_error_arcsec: self.target_error_arcsec,
            max_safety_steps: self.max_safety_steps,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }
}
