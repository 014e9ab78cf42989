//! Engine configuration, read from TOML
use anyhow::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::Level;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<&LogLevel> for Level {
    fn from(level: &LogLevel) -> Self {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub db_path: PathBuf,
    /// deadline applied to every engine operation
    pub request_timeout_ms: u64,
    /// retry once on a concurrent modification when the caller didn't pin a version
    pub retry_on_conflict: bool,
    pub log_level: LogLevel,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("help-coordination.db"),
            request_timeout_ms: 5_000,
            retry_on_conflict: true,
            log_level: LogLevel::Info,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(contents: &str) -> anyhow::Result<Self> {
        let config: EngineConfig = toml::from_str(contents).context("invalid engine config")?;
        if config.request_timeout_ms == 0 {
            anyhow::bail!("request_timeout_ms must be greater than zero");
        }
        Ok(config)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        Self::from_toml_str(&contents)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Installs the global fmt subscriber. `RUST_LOG` overrides the configured level. Fails if a
/// subscriber is already installed.
pub fn setup_tracing(log_level: &LogLevel) -> anyhow::Result<()> {
    let level: Level = log_level.into();
    let default_filter = format!("help_coordination={level}");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))
}
