//! Ledger configuration.
//!
//! Sources, lowest precedence first:
//! 1. built-in defaults
//! 2. `config/stockledger.toml` (optional)
//! 3. environment variables `STOCKLEDGER__<FIELD>` (e.g. `STOCKLEDGER__SWEEP_INTERVAL_MS=500`)

use std::time::Duration;

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use serde::Deserialize;
use tracing::info;

pub const CONFIG_FILE: &str = "config/stockledger";
pub const ENV_PREFIX: &str = "STOCKLEDGER";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LedgerConfig {
    /// Deadline for one engine or catalog operation, store calls included.
    pub operation_timeout_ms: u64,
    /// Period of the notifier's reconciliation sweep.
    pub sweep_interval_ms: u64,
    /// Queue bound per watcher subscription.
    pub subscriber_queue_capacity: usize,
    /// Queue bound between committed operations and the notifier worker.
    pub notifier_queue_capacity: usize,
    /// Newest movements included in a movement snapshot; 0 means all.
    pub movement_snapshot_limit: usize,
    /// Re-plans after an optimistic commit conflict before giving up.
    pub max_conflict_retries: u32,
    /// Apply the destination capacity check to transfers.
    pub enforce_capacity_on_transfer: bool,
    pub log_level: String,
    pub bind_addr: String,
    #[serde(default)]
    pub database_url: Option<String>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            operation_timeout_ms: 10_000,
            sweep_interval_ms: 1_000,
            subscriber_queue_capacity: 16,
            notifier_queue_capacity: 1_024,
            movement_snapshot_limit: 100,
            max_conflict_retries: 3,
            enforce_capacity_on_transfer: true,
            log_level: "info".to_string(),
            bind_addr: "0.0.0.0:8080".to_string(),
            database_url: None,
        }
    }
}

impl LedgerConfig {
    /// Load from defaults, the optional config file, then the environment.
    pub fn load() -> Result<Self, ConfigError> {
        let config = defaults()?
            .add_source(File::with_name(CONFIG_FILE).required(false))
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        let loaded: LedgerConfig = config.try_deserialize()?;
        loaded.validate()?;

        info!(
            operation_timeout_ms = loaded.operation_timeout_ms,
            sweep_interval_ms = loaded.sweep_interval_ms,
            postgres = loaded.database_url.is_some(),
            "configuration loaded"
        );
        Ok(loaded)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.operation_timeout_ms == 0 {
            return Err(ConfigError::Message("operation_timeout_ms must be > 0".into()));
        }
        if self.sweep_interval_ms == 0 {
            return Err(ConfigError::Message("sweep_interval_ms must be > 0".into()));
        }
        if self.subscriber_queue_capacity == 0 || self.notifier_queue_capacity == 0 {
            return Err(ConfigError::Message("queue capacities must be > 0".into()));
        }
        Ok(())
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_subscriber_queue_capacity(mut self, capacity: usize) -> Self {
        self.subscriber_queue_capacity = capacity;
        self
    }

    pub fn with_notifier_queue_capacity(mut self, capacity: usize) -> Self {
        self.notifier_queue_capacity = capacity;
        self
    }

    pub fn with_movement_snapshot_limit(mut self, limit: usize) -> Self {
        self.movement_snapshot_limit = limit;
        self
    }

    pub fn with_max_conflict_retries(mut self, retries: u32) -> Self {
        self.max_conflict_retries = retries;
        self
    }

    pub fn with_capacity_on_transfer(mut self, enforce: bool) -> Self {
        self.enforce_capacity_on_transfer = enforce;
        self
    }
}

fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    let d = LedgerConfig::default();
    Config::builder()
        .set_default("operation_timeout_ms", d.operation_timeout_ms as i64)?
        .set_default("sweep_interval_ms", d.sweep_interval_ms as i64)?
        .set_default("subscriber_queue_capacity", d.subscriber_queue_capacity as i64)?
        .set_default("notifier_queue_capacity", d.notifier_queue_capacity as i64)?
        .set_default("movement_snapshot_limit", d.movement_snapshot_limit as i64)?
        .set_default("max_conflict_retries", d.max_conflict_retries as i64)?
        .set_default("enforce_capacity_on_transfer", d.enforce_capacity_on_transfer)?
        .set_default("log_level", d.log_level)?
        .set_default("bind_addr", d.bind_addr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    #[test]
    fn defaults_deserialize_to_default_struct() {
        let cfg: LedgerConfig = defaults().unwrap().build().unwrap().try_deserialize().unwrap();
        assert_eq!(cfg, LedgerConfig::default());
        assert_eq!(cfg.operation_timeout(), Duration::from_secs(10));
        assert_eq!(cfg.sweep_interval(), Duration::from_secs(1));
    }

    #[test]
    fn file_values_override_defaults() {
        let toml = r#"
            sweep_interval_ms = 250
            enforce_capacity_on_transfer = false
            database_url = "postgres://localhost/stock"
        "#;
        let cfg: LedgerConfig = defaults()
            .unwrap()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(cfg.sweep_interval_ms, 250);
        assert!(!cfg.enforce_capacity_on_transfer);
        assert_eq!(cfg.database_url.as_deref(), Some("postgres://localhost/stock"));
        assert_eq!(cfg.operation_timeout_ms, 10_000);
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let cfg = LedgerConfig::default().with_operation_timeout(Duration::ZERO);
        assert!(cfg.validate().is_err());
    }
}
