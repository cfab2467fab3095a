// src/config.rs

//! Engine configuration.
//!
//! Loaded from TOML (all keys optional, sensible defaults), then
//! semantically validated. Example:
//!
//! ```toml
//! [engine]
//! cpu_workers = 8
//! io_inflight = 128
//! deadline_ms = 60000
//!
//! [engine.backoff]
//! base_ms = 200
//! multiplier = 2.0
//! max_ms = 100000
//! ```

use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub engine: EngineConfig,
}

/// Executor and retry knobs for one engine instance.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Worker threads for CPU-bound handlers.
    #[serde(default = "default_cpu_workers")]
    pub cpu_workers: usize,

    /// In-flight bound for I/O-bound and remote handlers.
    #[serde(default = "default_io_inflight")]
    pub io_inflight: usize,

    /// Exponential back-off between retry attempts.
    #[serde(default)]
    pub backoff: BackoffConfig,

    /// Run-wide deadline in milliseconds; unset means no deadline.
    #[serde(default)]
    pub deadline_ms: Option<u64>,
}

fn default_cpu_workers() -> usize {
    4
}

fn default_io_inflight() -> usize {
    64
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cpu_workers: default_cpu_workers(),
            io_inflight: default_io_inflight(),
            backoff: BackoffConfig::default(),
            deadline_ms: None,
        }
    }
}

/// Back-off between retries of one node.
///
/// `base_ms = 0` (the default) retries immediately. The delay for the n-th
/// retry is `base_ms * multiplier^(n-1)`, capped at `max_ms`.
#[derive(Debug, Clone, Deserialize)]
pub struct BackoffConfig {
    #[serde(default)]
    pub base_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    #[serde(default = "default_max_ms")]
    pub max_ms: u64,
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_ms() -> u64 {
    100_000
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: 0,
            multiplier: default_multiplier(),
            max_ms: default_max_ms(),
        }
    }
}

impl EngineConfig {
    /// Load and validate a TOML config file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::from_toml_str(&text)
    }

    /// Parse and validate TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(text).context("parsing engine config")?;
        file.engine.validate()?;
        Ok(file.engine)
    }

    /// Semantic validation over the parsed values.
    pub fn validate(&self) -> Result<()> {
        if self.cpu_workers == 0 {
            return Err(anyhow!("engine.cpu_workers must be >= 1 (got 0)"));
        }
        if self.io_inflight == 0 {
            return Err(anyhow!("engine.io_inflight must be >= 1 (got 0)"));
        }
        if self.backoff.multiplier < 1.0 {
            return Err(anyhow!(
                "engine.backoff.multiplier must be >= 1.0 (got {})",
                self.backoff.multiplier
            ));
        }
        Ok(())
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_ms.map(Duration::from_millis)
    }

    /// Delay before the given attempt number (attempt 2 is the first
    /// retry), capped at the configured ceiling.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        if self.backoff.base_ms == 0 || attempt < 2 {
            return Duration::ZERO;
        }

        let exponent = attempt.saturating_sub(2);
        let factor = self.backoff.multiplier.powi(exponent as i32);
        let ms = (self.backoff.base_ms as f64 * factor).min(self.backoff.max_ms as f64);
        Duration::from_millis(ms as u64)
    }
}
