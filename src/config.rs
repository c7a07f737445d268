//! Configuration management for slotmeter
//!
//! Parses TOML configuration files and provides typed access to settings.
//! Every section is optional; a missing file section falls back to the
//! defaults below. A few settings can also come from the environment, which
//! is how a host process usually hands them over.

use crate::error::{AppError, AppResult};
use crate::rules::source::DEFAULT_RULE_SOURCE;
use crate::slab::DEFAULT_SLOT_COUNT;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Environment variable naming the rule source file
pub const ENV_RULES: &str = "SLOTMETER_RULES";
/// Environment variable naming the collector `host:port`
pub const ENV_COLLECTOR: &str = "SLOTMETER_COLLECTOR";
/// Environment variable carrying the domain tag
pub const ENV_DOMAIN: &str = "SLOTMETER_DOMAIN";

/// Domain tag used when none (or an unusable one) is configured
pub const DEFAULT_DOMAIN: &str = "unknown";
/// Longest accepted domain tag, in bytes
pub const MAX_DOMAIN_LEN: usize = 64;
/// Default collector port
pub const DEFAULT_COLLECTOR_PORT: u16 = 10011;

/// Upper bound on configurable slot count
pub const MAX_SLOT_COUNT: usize = 4096;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub rules: RulesConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub exporter: ExporterConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Rule source configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RulesConfig {
    #[serde(default = "default_rules_path")]
    pub path: PathBuf,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            path: default_rules_path(),
        }
    }
}

fn default_rules_path() -> PathBuf {
    PathBuf::from(DEFAULT_RULE_SOURCE)
}

/// Counter store configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
    #[serde(default = "default_slot_count")]
    pub slot_count: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            slot_count: default_slot_count(),
        }
    }
}

fn default_store_path() -> PathBuf {
    PathBuf::from("metrics.dat")
}

fn default_slot_count() -> usize {
    DEFAULT_SLOT_COUNT
}

/// Collector/exporter configuration
///
/// Fields are private; the domain accessor applies the fallback rules so
/// callers never see an unusable tag.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExporterConfig {
    #[serde(default = "default_collector")]
    collector: String,
    #[serde(default = "default_domain")]
    domain: String,
    #[serde(default = "default_interval_ms")]
    interval_ms: u64,
    #[serde(default = "default_send_timeout_ms")]
    send_timeout_ms: u64,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            collector: default_collector(),
            domain: default_domain(),
            interval_ms: default_interval_ms(),
            send_timeout_ms: default_send_timeout_ms(),
        }
    }
}

fn default_collector() -> String {
    format!("127.0.0.1:{}", DEFAULT_COLLECTOR_PORT)
}

fn default_domain() -> String {
    DEFAULT_DOMAIN.to_string()
}

fn default_interval_ms() -> u64 {
    1000
}

fn default_send_timeout_ms() -> u64 {
    250
}

impl ExporterConfig {
    /// Collector address as configured
    pub fn collector(&self) -> &str {
        &self.collector
    }

    /// Collector split into host and port
    ///
    /// Only the `host:port` shape is checked here; the host may be a name
    /// that is resolved when the export socket is set up. IPv6 literals
    /// must be bracketed (`[::1]:10011`).
    pub fn collector_endpoint(&self) -> AppResult<(&str, u16)> {
        split_host_port(&self.collector).ok_or_else(|| {
            AppError::Config(format!(
                "exporter.collector '{}' is not a valid host:port address",
                self.collector
            ))
        })
    }

    /// Domain tag attached to every export record
    pub fn domain(&self) -> &str {
        normalize_domain(&self.domain)
    }

    /// Time between export ticks
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Upper bound on a single datagram send
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    /// Set the collector address
    pub fn with_collector(mut self, collector: impl Into<String>) -> Self {
        self.collector = collector.into();
        self
    }

    /// Set the domain tag
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }

    /// Set the tick interval in milliseconds
    pub fn with_interval_ms(mut self, interval_ms: u64) -> Self {
        self.interval_ms = interval_ms;
        self
    }

    /// Set the per-send timeout in milliseconds
    pub fn with_send_timeout_ms(mut self, send_timeout_ms: u64) -> Self {
        self.send_timeout_ms = send_timeout_ms;
        self
    }
}

fn split_host_port(addr: &str) -> Option<(&str, u16)> {
    let (host, port) = addr.trim().rsplit_once(':')?;
    let port = port.parse().ok()?;
    let bracketed = host.len() > 2 && host.starts_with('[') && host.ends_with(']');
    if host.is_empty()
        || (host.contains(':') && !bracketed)
        || host.contains(char::is_whitespace)
    {
        return None;
    }
    Some((host, port))
}

/// Apply the domain fallback: empty or over-long tags become `"unknown"`
pub fn normalize_domain(domain: &str) -> &str {
    let trimmed = domain.trim();
    if trimmed.is_empty() || trimmed.len() > MAX_DOMAIN_LEN {
        DEFAULT_DOMAIN
    } else {
        trimmed
    }
}

/// Observability configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let path_display = path.as_ref().display().to_string();

        // Phase 1: Read file (preserves io::Error context)
        let content =
            std::fs::read_to_string(path.as_ref()).map_err(|source| AppError::ConfigFileRead {
                path: path_display.clone(),
                source,
            })?;

        // Phase 2: Parse TOML (preserves toml::de::Error context)
        let config: Self =
            toml::from_str(&content).map_err(|source| AppError::ConfigParseFailed {
                path: path_display.clone(),
                source,
            })?;

        // Phase 3: Validate parsed config
        config
            .validate()
            .map_err(|e| AppError::ConfigValidationFailed {
                path: path_display,
                reason: e.to_string(),
            })?;

        Ok(config)
    }

    /// Override settings from the process environment
    pub fn apply_process_env(&mut self) -> AppResult<()> {
        self.apply_env(|key| std::env::var(key).ok())
    }

    /// Override settings from an environment lookup
    ///
    /// Recognises `SLOTMETER_RULES`, `SLOTMETER_COLLECTOR` and
    /// `SLOTMETER_DOMAIN`. Empty values are ignored. The result is
    /// re-validated.
    pub fn apply_env<F>(&mut self, lookup: F) -> AppResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(rules) = get(ENV_RULES) {
            tracing::debug!(path = %rules, "Rule source path taken from environment");
            self.rules.path = PathBuf::from(rules);
        }
        if let Some(collector) = get(ENV_COLLECTOR) {
            tracing::debug!(collector = %collector, "Collector address taken from environment");
            self.exporter.collector = collector;
        }
        if let Some(domain) = get(ENV_DOMAIN) {
            if normalize_domain(&domain) == DEFAULT_DOMAIN && domain.trim() != DEFAULT_DOMAIN {
                tracing::warn!(
                    length = domain.len(),
                    max = MAX_DOMAIN_LEN,
                    "Domain tag from environment is unusable, falling back to \"unknown\""
                );
            }
            self.exporter.domain = domain;
        }

        self.validate()
    }

    /// Validate configuration after parsing
    pub fn validate(&self) -> AppResult<()> {
        if self.store.slot_count == 0 {
            return Err(AppError::Config(
                "store.slot_count must be greater than 0".to_string(),
            ));
        }
        if self.store.slot_count > MAX_SLOT_COUNT {
            return Err(AppError::Config(format!(
                "store.slot_count cannot exceed {}, got {}",
                MAX_SLOT_COUNT, self.store.slot_count
            )));
        }

        let exporter = &self.exporter;
        if exporter.interval_ms == 0 || exporter.interval_ms > 3_600_000 {
            return Err(AppError::Config(format!(
                "exporter.interval_ms must be in 1..=3600000, got {}",
                exporter.interval_ms
            )));
        }
        if exporter.send_timeout_ms == 0 {
            return Err(AppError::Config(
                "exporter.send_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if exporter.send_timeout_ms > exporter.interval_ms {
            return Err(AppError::Config(format!(
                "exporter.send_timeout_ms ({}) cannot exceed exporter.interval_ms ({})",
                exporter.send_timeout_ms, exporter.interval_ms
            )));
        }
        exporter.collector_endpoint()?;

        Ok(())
    }
}

impl FromStr for Config {
    type Err = AppError;

    fn from_str(toml_str: &str) -> Result<Self, Self::Err> {
        let config: Config =
            toml::from_str(toml_str).map_err(|source| AppError::ConfigParseFailed {
                path: "<string>".to_string(),
                source,
            })?;

        config.validate()?;
        Ok(config)
    }
}
