//! Framework configuration
//!
//! Configuration comes from three layers, lowest first:
//! - built-in defaults ([`FrameworkConfig::default`])
//! - an optional TOML file ([`FrameworkConfig::from_file`])
//! - `RECOVERY_*` environment variables ([`ConfigBuilder::from_env`])
//!
//! ```toml
//! [executor]
//! retry_attempts = 5
//! pull_timeout_secs = 300
//!
//! [context]
//! default_ttl_secs = 1800
//!
//! [recovery]
//! http_proxy = "http://proxy.internal:3128"
//! ```

mod builder;
pub mod env;

pub use builder::ConfigBuilder;

use crate::executor::OperationKind;
use crate::{RecoveryError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default environment prefix
pub const ENV_PREFIX: &str = "RECOVERY_";

/// Upper bound for `context.default_ttl_secs` (30 days)
pub const MAX_CONTEXT_TTL_SECS: u64 = 30 * 24 * 60 * 60;

/// Retry and timeout defaults applied to new operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub retry_attempts: u32,
    pub backoff_step_ms: u64,
    pub pull_timeout_secs: u64,
    pub push_timeout_secs: u64,
    pub tag_timeout_secs: u64,
    pub build_timeout_secs: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            retry_attempts: 3,
            backoff_step_ms: 1_000,
            pull_timeout_secs: 600,
            push_timeout_secs: 900,
            tag_timeout_secs: 120,
            build_timeout_secs: 1_800,
        }
    }
}

impl ExecutorConfig {
    /// Backoff unit; attempt `n` is followed by `n * step`
    pub fn backoff_step(&self) -> Duration {
        Duration::from_millis(self.backoff_step_ms)
    }

    /// Per-attempt timeout for an operation kind
    pub fn timeout_for(&self, kind: OperationKind) -> Duration {
        let secs = match kind {
            OperationKind::Pull => self.pull_timeout_secs,
            OperationKind::Push => self.push_timeout_secs,
            OperationKind::Tag => self.tag_timeout_secs,
            OperationKind::Build => self.build_timeout_secs,
        };
        Duration::from_secs(secs)
    }
}

/// Context store lifetime settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    pub default_ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: 3_600,
            sweep_interval_secs: 900,
        }
    }
}

impl ContextConfig {
    /// Lifetime of entries written without an explicit TTL
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    /// How often the janitor removes expired entries
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Inputs for the built-in recovery strategies
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    pub enable_default_strategies: bool,
    pub http_proxy: Option<String>,
    pub corporate_dns: Option<String>,
    pub dns_servers: Vec<String>,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            enable_default_strategies: true,
            http_proxy: None,
            corporate_dns: None,
            dns_servers: vec![
                "8.8.8.8".to_string(),
                "8.8.4.4".to_string(),
                "1.1.1.1".to_string(),
            ],
        }
    }
}

/// Top-level configuration for a [`crate::Framework`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameworkConfig {
    pub executor: ExecutorConfig,
    pub context: ContextConfig,
    pub recovery: RecoveryConfig,
}

impl FrameworkConfig {
    /// Parse and validate a TOML file; missing sections keep their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let config = Self::parse_file(path.as_ref())?;
        config.validate()?;
        Ok(config)
    }

    /// File (if given) overlaid with `RECOVERY_*` variables, then validated
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_prefix(path, ENV_PREFIX)
    }

    /// Like [`FrameworkConfig::load`] with a custom variable prefix
    ///
    /// Validation runs once, after the overlay, so the environment can
    /// correct a value the file got wrong.
    pub fn load_with_prefix(path: Option<&Path>, prefix: &str) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::parse_file(path)?,
            None => Self::default(),
        };
        config.apply_env(prefix)?;
        config.validate()?;
        Ok(config)
    }

    fn parse_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RecoveryError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Ok(toml::from_str(&content)?)
    }

    fn apply_env(&mut self, prefix: &str) -> Result<()> {
        let key = |name: &str| env::build_env_key(prefix, name);

        if let Some(v) = env::get_env_parse(&key("retry_attempts"))? {
            self.executor.retry_attempts = v;
        }
        if let Some(v) = env::get_env_parse(&key("backoff_step_ms"))? {
            self.executor.backoff_step_ms = v;
        }
        if let Some(v) = env::get_env_parse(&key("pull_timeout_secs"))? {
            self.executor.pull_timeout_secs = v;
        }
        if let Some(v) = env::get_env_parse(&key("push_timeout_secs"))? {
            self.executor.push_timeout_secs = v;
        }
        if let Some(v) = env::get_env_parse(&key("tag_timeout_secs"))? {
            self.executor.tag_timeout_secs = v;
        }
        if let Some(v) = env::get_env_parse(&key("build_timeout_secs"))? {
            self.executor.build_timeout_secs = v;
        }
        if let Some(v) = env::get_env_parse(&key("context_ttl_secs"))? {
            self.context.default_ttl_secs = v;
        }
        if let Some(v) = env::get_env_parse(&key("sweep_interval_secs"))? {
            self.context.sweep_interval_secs = v;
        }
        if let Some(v) = env::get_env_bool(&key("enable_default_strategies"))? {
            self.recovery.enable_default_strategies = v;
        }

        // Prefixed values win over the conventional unprefixed ones.
        if let Some(v) = env::get_env(&key("http_proxy"))?.or(env::get_env("HTTP_PROXY")?) {
            self.recovery.http_proxy = Some(v);
        }
        if let Some(v) = env::get_env(&key("corporate_dns"))?.or(env::get_env("CORPORATE_DNS")?) {
            self.recovery.corporate_dns = Some(v);
        }
        if let Some(v) = env::get_env_list(&key("dns_servers"))? {
            self.recovery.dns_servers = v;
        }
        Ok(())
    }
}

impl ConfigBuilder for FrameworkConfig {
    fn validate(&self) -> Result<()> {
        let executor = &self.executor;
        if executor.retry_attempts == 0 {
            return Err(RecoveryError::Config(
                "executor.retry_attempts must be at least 1".to_string(),
            ));
        }
        let timeouts = [
            ("pull", executor.pull_timeout_secs),
            ("push", executor.push_timeout_secs),
            ("tag", executor.tag_timeout_secs),
            ("build", executor.build_timeout_secs),
        ];
        if let Some((kind, _)) = timeouts.iter().find(|(_, secs)| *secs == 0) {
            return Err(RecoveryError::Config(format!(
                "executor.{}_timeout_secs must be non-zero",
                kind
            )));
        }
        if self.context.default_ttl_secs == 0 {
            return Err(RecoveryError::Config(
                "context.default_ttl_secs must be non-zero".to_string(),
            ));
        }
        if self.context.default_ttl_secs > MAX_CONTEXT_TTL_SECS {
            return Err(RecoveryError::Config(format!(
                "context.default_ttl_secs must be at most {}",
                MAX_CONTEXT_TTL_SECS
            )));
        }
        if self.context.sweep_interval_secs == 0 {
            return Err(RecoveryError::Config(
                "context.sweep_interval_secs must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    fn from_env(prefix: &str) -> Result<Self> {
        let mut config = Self::default();
        config.apply_env(prefix)?;
        Ok(config)
    }

    fn merge(&mut self, other: Self) -> &mut Self {
        self.executor = other.executor;
        self.context = other.context;
        self.recovery.enable_default_strategies = other.recovery.enable_default_strategies;
        if other.recovery.http_proxy.is_some() {
            self.recovery.http_proxy = other.recovery.http_proxy;
        }
        if other.recovery.corporate_dns.is_some() {
            self.recovery.corporate_dns = other.recovery.corporate_dns;
        }
        if !other.recovery.dns_servers.is_empty() {
            self.recovery.dns_servers = other.recovery.dns_servers;
        }
        self
    }
}
