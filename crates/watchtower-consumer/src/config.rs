//! Consumer configuration.
//!
//! The configuration lives in one YAML file (JSON is accepted too, being a
//! YAML subset). Its path comes from `--config`/`-c`, else from
//! `WATCHTOWER_CONFIG`, else `watchtower-alert.yaml` in the working
//! directory. `NATS_URL` overrides `brokers` so deployments can point at a
//! broker without editing the file.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use watchtower_annotate::AnnotationConfig;
use watchtower_sinks::{SinkKind, SinksConfig};

use crate::error::ConfigError;

/// Config file used when no path is given.
pub const DEFAULT_CONFIG_PATH: &str = "watchtower-alert.yaml";

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Complete consumer configuration.
///
/// Unknown keys are rejected so a misspelled sink list cannot silently
/// fall back to its default.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConsumerConfig {
    /// Default log filter when `RUST_LOG` is unset.
    #[serde(default = "default_logging")]
    pub logging: String,
    /// Log line format.
    #[serde(default)]
    pub log_format: LogFormat,
    /// NATS server URL.
    #[serde(default = "default_brokers")]
    pub brokers: String,
    /// Subject alerts are published on.
    #[serde(default = "default_topic")]
    pub topic: String,
    /// Queue group shared by all consumer instances.
    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,
    /// Sinks receiving alerts, in delivery order.
    #[serde(default = "default_sink_list")]
    pub alert_sinks: Vec<SinkKind>,
    /// Sinks receiving detector error events, in delivery order.
    #[serde(default = "default_sink_list")]
    pub error_sinks: Vec<SinkKind>,
    /// Sinks receiving timer ticks, in delivery order.
    #[serde(default = "default_sink_list")]
    pub timer_sinks: Vec<SinkKind>,
    /// Seconds between timer ticks.
    #[serde(default = "default_timer_interval")]
    pub timer_interval: i64,
    /// Longest single wait on the stream, in seconds.
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
    /// Entity lookup settings.
    #[serde(default)]
    pub annotation: AnnotationConfig,
    /// Per-sink configuration blocks.
    #[serde(default)]
    pub sinks: SinksConfig,
}

impl ConsumerConfig {
    /// Load, apply environment overrides and validate.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if it does not parse, or
    /// [`ConfigError::Invalid`] if validation fails.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config = Self::parse(&contents)?;
        config.apply_env_overrides(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string without validating it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML or
    /// names an unknown sink.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yml::from_str(yaml)?)
    }

    /// Override values from the environment.
    ///
    /// - `NATS_URL` overrides `brokers`
    pub fn apply_env_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(url) = var("NATS_URL") {
            self.brokers = url;
        }
    }

    /// Check ranges and the blocks of every enabled sink.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first problem.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timer_interval <= 0 {
            return Err(ConfigError::Invalid(
                "timer_interval must be positive".to_owned(),
            ));
        }
        if self.poll_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "poll_timeout_secs must be positive".to_owned(),
            ));
        }
        if self.topic.trim().is_empty() {
            return Err(ConfigError::Invalid("topic is required".to_owned()));
        }
        self.sinks
            .validate(&self.enabled_sinks())
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Every sink named in any of the three lists.
    pub fn enabled_sinks(&self) -> BTreeSet<SinkKind> {
        self.alert_sinks
            .iter()
            .chain(&self.error_sinks)
            .chain(&self.timer_sinks)
            .copied()
            .collect()
    }

    /// Stream poll wait.
    pub const fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }
}

/// Resolve the config file path from arguments, then the environment.
pub fn config_path(
    args: impl IntoIterator<Item = String>,
    var: impl Fn(&str) -> Option<String>,
) -> PathBuf {
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-c" | "--config" | "--config-file" => {
                if let Some(path) = args.next() {
                    return PathBuf::from(path);
                }
            }
            other => {
                if let Some(path) = other
                    .strip_prefix("--config=")
                    .or_else(|| other.strip_prefix("--config-file="))
                {
                    return PathBuf::from(path);
                }
            }
        }
    }
    var("WATCHTOWER_CONFIG").map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from)
}

fn default_logging() -> String {
    "info".to_owned()
}

fn default_brokers() -> String {
    "nats://localhost:4222".to_owned()
}

fn default_topic() -> String {
    "watchtower".to_owned()
}

fn default_consumer_group() -> String {
    "watchtower-alert-consumer".to_owned()
}

fn default_sink_list() -> Vec<SinkKind> {
    vec![SinkKind::Log]
}

const fn default_timer_interval() -> i64 {
    60
}

const fn default_poll_timeout_secs() -> u64 {
    10
}
