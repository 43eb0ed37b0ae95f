//! pricewatch configuration.
//!
//! Loaded once at process start and passed by reference to every component.
//! The config file is resolved through a chain:
//!
//! 1. `--config <path>`: explicit per-invocation override
//! 2. `PRICEWATCH_CONFIG` env var: set once by the scheduler
//! 3. `~/.pricewatch/config.toml`: default location
//!
//! Loading only fails on unreadable or unparsable files. Semantic problems
//! (no recipient, empty whitelist, inverted price bounds) are reported by
//! [`Config::problems`] and surfaced by the pre-flight health check.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs, io};

use serde::Deserialize;

use crate::model::Step;
use crate::retry::RetryPolicy;

/// Errors that can occur while locating or reading the config file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not determine home directory")]
    NoHome,

    #[error("no config file found at {0}")]
    NotFound(PathBuf),

    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("invalid config at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// pricewatch configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    /// Who receives the daily report.
    #[serde(default)]
    pub recipient: String,

    /// Vendor phone numbers whose messages are collected.
    #[serde(default)]
    pub vendors: Vec<String>,

    /// Tracing filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub paths: Paths,

    #[serde(default)]
    pub messenger: Messenger,

    #[serde(default)]
    pub validation: Validation,

    /// Retry policies keyed by step (`collect`, `store`, `deliver`).
    #[serde(default)]
    pub retry: BTreeMap<String, RetrySettings>,

    /// Breaker settings keyed by operation-class.
    #[serde(default)]
    pub breaker: BTreeMap<String, BreakerSettings>,
}

/// Directories the run reads and writes.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Paths {
    pub data_dir: PathBuf,
    pub output_dir: PathBuf,
    pub audit_dir: PathBuf,
    pub state_dir: PathBuf,
}

impl Default for Paths {
    fn default() -> Self {
        let root = base_dir().unwrap_or_else(|| PathBuf::from(".pricewatch"));
        Self {
            data_dir: root.join("data"),
            output_dir: root.join("output"),
            audit_dir: root.join("audit"),
            state_dir: root.join("state"),
        }
    }
}

/// Hand-off points shared with the messaging-automation driver.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Messenger {
    /// Where the driver drops collected messages, one JSON file each.
    pub inbox_dir: PathBuf,

    /// Where outgoing reports are queued for the driver to send.
    pub outbox_dir: PathBuf,

    /// Present while the driver holds an established session.
    pub session_file: PathBuf,
}

impl Default for Messenger {
    fn default() -> Self {
        let root = base_dir()
            .unwrap_or_else(|| PathBuf::from(".pricewatch"))
            .join("messenger");
        Self {
            inbox_dir: root.join("inbox"),
            outbox_dir: root.join("outbox"),
            session_file: root.join("session"),
        }
    }
}

/// Bounds applied by the validator.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Validation {
    #[serde(default = "default_min_price")]
    pub min_price: f64,

    #[serde(default = "default_max_price")]
    pub max_price: f64,

    #[serde(default = "default_freetext_max_len")]
    pub freetext_max_len: usize,
}

impl Default for Validation {
    fn default() -> Self {
        Self {
            min_price: default_min_price(),
            max_price: default_max_price(),
            freetext_max_len: default_freetext_max_len(),
        }
    }
}

/// Retry settings for one step, as written in the config file.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_jitter_fraction")]
    pub jitter_fraction: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_fraction: default_jitter_fraction(),
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            jitter_fraction: self.jitter_fraction,
        }
    }
}

/// Breaker settings for one operation-class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BreakerSettings {
    #[serde(default = "default_threshold")]
    pub threshold: u32,

    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

impl BreakerSettings {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_min_price() -> f64 {
    100.0
}
fn default_max_price() -> f64 {
    999_999_999.0
}
fn default_freetext_max_len() -> usize {
    1000
}
fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    5_000
}
fn default_max_delay_ms() -> u64 {
    60_000
}
fn default_jitter_fraction() -> f64 {
    0.2
}
fn default_threshold() -> u32 {
    3
}
fn default_cooldown_secs() -> u64 {
    300
}

/// `~/.pricewatch`.
fn base_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".pricewatch"))
}

impl Config {
    /// Resolve the config path and load it.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = Self::resolve_path(explicit)?;
        Self::load_from(&path)
    }

    /// Load config from a specific file.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = match fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ConfigError::NotFound(path.to_path_buf()));
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        Self::parse(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// The config path after applying the resolution chain.
    pub fn resolve_path(explicit: Option<&Path>) -> Result<PathBuf, ConfigError> {
        // 1. Explicit --config flag.
        if let Some(path) = explicit {
            return Ok(path.to_path_buf());
        }

        // 2. PRICEWATCH_CONFIG environment variable.
        if let Ok(path) = env::var("PRICEWATCH_CONFIG")
            && !path.is_empty()
        {
            return Ok(PathBuf::from(path));
        }

        // 3. ~/.pricewatch/config.toml.
        base_dir()
            .map(|d| d.join("config.toml"))
            .ok_or(ConfigError::NoHome)
    }

    /// Retry policy for a step, falling back to the defaults.
    pub fn retry_policy(&self, step: Step) -> RetryPolicy {
        self.retry
            .get(step.key())
            .copied()
            .unwrap_or_default()
            .policy()
    }

    /// Breaker settings for an operation-class, falling back to the defaults.
    pub fn breaker_settings(&self, class: &str) -> BreakerSettings {
        self.breaker.get(class).copied().unwrap_or_default()
    }

    /// Everything wrong with this config. Empty means usable.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if self.recipient.trim().is_empty() {
            problems.push("recipient is empty".to_string());
        }
        if self.vendors.is_empty() {
            problems.push("vendors whitelist is empty".to_string());
        }

        let v = &self.validation;
        if !(v.min_price > 0.0 && v.min_price <= v.max_price) {
            problems.push(format!(
                "validation bounds must satisfy 0 < min-price <= max-price (got {} and {})",
                v.min_price, v.max_price
            ));
        }
        if v.freetext_max_len == 0 {
            problems.push("validation.freetext-max-len must be positive".to_string());
        }

        for (step, r) in &self.retry {
            if !["collect", "store", "deliver"].contains(&step.as_str()) {
                problems.push(format!("retry.{step}: not a retried step"));
            }
            if r.max_attempts == 0 {
                problems.push(format!("retry.{step}.max-attempts must be at least 1"));
            }
            if r.base_delay_ms > r.max_delay_ms {
                problems.push(format!(
                    "retry.{step}: base-delay-ms exceeds max-delay-ms"
                ));
            }
            if !(0.0..=1.0).contains(&r.jitter_fraction) {
                problems.push(format!(
                    "retry.{step}.jitter-fraction must be within [0, 1]"
                ));
            }
        }

        for (class, b) in &self.breaker {
            if b.threshold == 0 {
                problems.push(format!("breaker.{class}.threshold must be at least 1"));
            }
        }

        problems
    }
}
