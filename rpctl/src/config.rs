//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable
//! overrides. The file path defaults to `config.yaml` and can be set via
//! `-f` or the `RPCTL_CONFIG` environment variable.
//!
//! Sources are merged in order (later overrides earlier):
//!
//! 1. **YAML config file** - base configuration
//! 2. **Environment variables** - `RPCTL_`-prefixed, `__` for nesting, e.g.
//!    `RPCTL_WORKER__MAX_OPERATION_CONCURRENCY=8`
//!
//! Durations use humantime strings (`"30s"`, `"2m"`).

use std::collections::HashMap;
use std::time::Duration;

use clap::Parser;
use figment::providers::{Env, Format, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::worker::WorkerOptions;

/// Simple CLI args - just for specifying the config file.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "RPCTL_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    #[arg(long)]
    pub validate: bool,
}

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    /// Provider location stamped on request contexts, operation-status ids,
    /// and polling URLs. Must be non-empty.
    pub location: String,
    /// Fixed URL prefix stripped before resource-id parsing. Empty means
    /// the base is derived per request from `/planes/` / `/subscriptions/`.
    pub path_base: String,
    /// Provider namespaces served by this instance; each gets its
    /// operation-status and operation-result routes registered.
    pub provider_namespaces: Vec<String>,
    /// Capability declarations for dynamic resource types, keyed by fully
    /// qualified type name (e.g. `Applications.Test/recipeResources`).
    pub resource_types: HashMap<String, Vec<String>>,
    /// Advisory `Retry-After` surfaced to pollers.
    #[serde(with = "humantime_serde")]
    pub retry_after: Duration,
    /// Async worker tuning.
    pub worker: WorkerSettings,
    /// In-memory queue tuning (lease length and poll cadence).
    pub queue: QueueSettings,
    /// Enable the Prometheus endpoint at `/internal/metrics`
    pub enable_metrics: bool,
    /// Enable OpenTelemetry OTLP export for distributed tracing
    pub enable_otel_export: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            location: "global".to_string(),
            path_base: String::new(),
            provider_namespaces: Vec::new(),
            resource_types: HashMap::new(),
            retry_after: Duration::from_secs(60),
            worker: WorkerSettings::default(),
            queue: QueueSettings::default(),
            enable_metrics: false,
            enable_otel_export: false,
        }
    }
}

impl Config {
    /// Load configuration from the YAML file and environment overrides.
    pub fn load(args: &Args) -> anyhow::Result<Config> {
        let config: Config = Figment::new()
            .merge(Yaml::file(&args.config))
            .merge(Env::prefixed("RPCTL_").split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.location.is_empty() {
            anyhow::bail!("location must not be empty");
        }
        if self.worker.max_operation_concurrency == 0 {
            anyhow::bail!("worker.max_operation_concurrency must be at least 1");
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Async worker tuning; see [`WorkerOptions`] for the semantics.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkerSettings {
    pub max_operation_concurrency: usize,
    pub max_operation_retry_count: u32,
    #[serde(with = "humantime_serde")]
    pub message_extend_margin: Duration,
    #[serde(with = "humantime_serde")]
    pub min_message_lock_duration: Duration,
    #[serde(with = "humantime_serde")]
    pub deduplication_duration: Duration,
    #[serde(with = "humantime_serde")]
    pub default_operation_timeout: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        let defaults = WorkerOptions::default();
        Self {
            max_operation_concurrency: defaults.max_operation_concurrency,
            max_operation_retry_count: defaults.max_operation_retry_count,
            message_extend_margin: defaults.message_extend_margin,
            min_message_lock_duration: defaults.min_message_lock_duration,
            deduplication_duration: defaults.deduplication_duration,
            default_operation_timeout: defaults.default_operation_timeout,
        }
    }
}

impl From<&WorkerSettings> for WorkerOptions {
    fn from(settings: &WorkerSettings) -> Self {
        WorkerOptions {
            max_operation_concurrency: settings.max_operation_concurrency,
            max_operation_retry_count: settings.max_operation_retry_count,
            message_extend_margin: settings.message_extend_margin,
            min_message_lock_duration: settings.min_message_lock_duration,
            deduplication_duration: settings.deduplication_duration,
            default_operation_timeout: settings.default_operation_timeout,
        }
    }
}

/// In-memory queue tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueueSettings {
    #[serde(with = "humantime_serde")]
    pub lock_duration: Duration,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            lock_duration: Duration::from_secs(60),
            poll_interval: Duration::from_millis(20),
        }
    }
}

impl From<&QueueSettings> for sluice::QueueOptions {
    fn from(settings: &QueueSettings) -> Self {
        sluice::QueueOptions {
            lock_duration: settings.lock_duration,
            poll_interval: settings.poll_interval,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.bind_address(), "127.0.0.1:8080");
        assert_eq!(config.worker.max_operation_concurrency, 3);
        assert_eq!(config.worker.default_operation_timeout, Duration::from_secs(120));
        assert_eq!(config.retry_after, Duration::from_secs(60));
    }

    #[test]
    fn yaml_and_env_overrides_merge() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "config.yaml",
                r#"
port: 9999
location: westus
provider_namespaces:
  - Applications.Test
resource_types:
  Applications.Test/recipeResources:
    - SupportsRecipes
worker:
  default_operation_timeout: 30s
"#,
            )?;
            jail.set_env("RPCTL_PORT", "7777");
            jail.set_env("RPCTL_WORKER__MAX_OPERATION_CONCURRENCY", "8");

            let args = Args {
                config: "config.yaml".to_string(),
                validate: false,
            };
            let config = Config::load(&args).expect("config should load");
            assert_eq!(config.port, 7777, "env overrides yaml");
            assert_eq!(config.location, "westus");
            assert_eq!(config.worker.max_operation_concurrency, 8);
            assert_eq!(
                config.worker.default_operation_timeout,
                Duration::from_secs(30)
            );
            assert_eq!(
                config.resource_types["Applications.Test/recipeResources"],
                vec!["SupportsRecipes".to_string()]
            );
            Ok(())
        });
    }

    #[test]
    fn empty_location_is_rejected() {
        let config = Config {
            location: String::new(),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
