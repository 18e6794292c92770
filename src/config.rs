use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Top-level configuration for the central collector.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Logging verbosity (debug, info, warn, error). Default: "info".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Version reported to agents in the init response. Default: crate version.
    #[serde(default = "default_server_version")]
    pub server_version: String,

    /// Collector gRPC listener.
    #[serde(default)]
    pub grpc: GrpcConfig,

    /// Prometheus health metrics server configuration.
    #[serde(default)]
    pub health: HealthConfig,

    /// Alert dispatch configuration.
    #[serde(default)]
    pub alerting: AlertingConfig,

    /// Built-in in-memory store.
    #[serde(default)]
    pub store: StoreConfig,

    /// How often ingestion counts are logged. Default: 60s.
    #[serde(default = "default_stats_interval", with = "humantime_serde")]
    pub stats_interval: Duration,
}

/// Collector gRPC listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct GrpcConfig {
    /// Address to bind. Default: "0.0.0.0".
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Port to bind; 0 picks an ephemeral port. Default: 8181.
    #[serde(default = "default_grpc_port")]
    pub port: u16,
}

/// Prometheus health metrics server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthConfig {
    /// Listen address, ":port" shorthand binds all interfaces. Default: ":9090".
    #[serde(default = "default_health_addr")]
    pub addr: String,
}

/// Alert dispatch configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AlertingConfig {
    /// Capacity of the alert task queue. Default: 1024.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Outbound mail settings. An empty host disables alerting.
    #[serde(default)]
    pub smtp: SmtpConfig,
}

/// Built-in in-memory store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Records kept per write kind before the oldest are evicted. Default: 10000.
    #[serde(default = "default_retention")]
    pub retention: usize,
}

/// Outbound mail settings used by alert notifications.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SmtpConfig {
    #[serde(default)]
    pub host: String,

    #[serde(default = "default_smtp_port")]
    pub port: u16,

    #[serde(default)]
    pub from_email_address: String,
}

impl SmtpConfig {
    /// Alerting is enabled only when a mail host is configured.
    pub fn is_enabled(&self) -> bool {
        !self.host.trim().is_empty()
    }
}

// --- Default value functions ---

fn default_log_level() -> String {
    "info".to_string()
}

fn default_server_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_stats_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_grpc_port() -> u16 {
    8181
}

fn default_health_addr() -> String {
    ":9090".to_string()
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_smtp_port() -> u16 {
    25
}

fn default_retention() -> usize {
    crate::store::memory::DEFAULT_RETENTION
}

// --- Default trait impls ---

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            server_version: default_server_version(),
            grpc: GrpcConfig::default(),
            health: HealthConfig::default(),
            alerting: AlertingConfig::default(),
            store: StoreConfig::default(),
            stats_interval: default_stats_interval(),
        }
    }
}

impl Default for GrpcConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_grpc_port(),
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            addr: default_health_addr(),
        }
    }
}

impl Default for AlertingConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            smtp: SmtpConfig::default(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            retention: default_retention(),
        }
    }
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_smtp_port(),
            from_email_address: String::new(),
        }
    }
}

// --- Validation and loading ---

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        let cfg = Self::from_yaml(&data)
            .with_context(|| format!("parsing config file {}", path.display()))?;

        Ok(cfg)
    }

    /// Parse and validate configuration from YAML text.
    pub fn from_yaml(data: &str) -> Result<Self> {
        let cfg: Config = serde_yaml::from_str(data)?;

        cfg.validate()?;

        Ok(cfg)
    }

    /// Validate the configuration for required fields and consistency.
    pub fn validate(&self) -> Result<()> {
        if self.grpc.bind_address.trim().is_empty() {
            bail!("grpc.bind_address is required");
        }

        if self.server_version.trim().is_empty() {
            bail!("server_version must not be empty");
        }

        if self.alerting.queue_capacity == 0 {
            bail!("alerting.queue_capacity must be positive");
        }

        if self.alerting.smtp.is_enabled() && self.alerting.smtp.port == 0 {
            bail!("alerting.smtp.port must be positive when alerting.smtp.host is set");
        }

        if self.store.retention == 0 {
            bail!("store.retention must be positive");
        }

        if self.stats_interval.is_zero() {
            bail!("stats_interval must be positive");
        }

        Ok(())
    }

    /// Socket address string for the gRPC listener.
    pub fn grpc_addr(&self) -> String {
        format!("{}:{}", self.grpc.bind_address, self.grpc.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let cfg = Config::default();
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.server_version, env!("CARGO_PKG_VERSION"));
        assert_eq!(cfg.grpc.bind_address, "0.0.0.0");
        assert_eq!(cfg.grpc.port, 8181);
        assert_eq!(cfg.health.addr, ":9090");
        assert_eq!(cfg.alerting.queue_capacity, 1024);
        assert_eq!(cfg.alerting.smtp.port, 25);
        assert!(!cfg.alerting.smtp.is_enabled());
        assert_eq!(cfg.store.retention, 10_000);
        assert_eq!(cfg.stats_interval, Duration::from_secs(60));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_parse_full_yaml() {
        let cfg = Config::from_yaml(
            r#"
log_level: debug
server_version: "9.9.9"
grpc:
  bind_address: 127.0.0.1
  port: 0
health:
  addr: ":9191"
alerting:
  queue_capacity: 16
  smtp:
    host: mail.example.com
    port: 587
    from_email_address: alerts@example.com
store:
  retention: 500
stats_interval: 15s
"#,
        )
        .unwrap();

        assert_eq!(cfg.log_level, "debug");
        assert_eq!(cfg.server_version, "9.9.9");
        assert_eq!(cfg.grpc_addr(), "127.0.0.1:0");
        assert_eq!(cfg.health.addr, ":9191");
        assert_eq!(cfg.alerting.queue_capacity, 16);
        assert_eq!(
            cfg.alerting.smtp,
            SmtpConfig {
                host: "mail.example.com".to_string(),
                port: 587,
                from_email_address: "alerts@example.com".to_string(),
            }
        );
        assert!(cfg.alerting.smtp.is_enabled());
        assert_eq!(cfg.store.retention, 500);
        assert_eq!(cfg.stats_interval, Duration::from_secs(15));
    }

    #[test]
    fn test_parse_empty_yaml_uses_defaults() {
        let cfg = Config::from_yaml("{}").unwrap();
        assert_eq!(cfg.grpc.port, 8181);
        assert_eq!(cfg.alerting.smtp.port, 25);
    }

    #[test]
    fn test_validation_empty_bind_address() {
        let cfg = Config {
            grpc: GrpcConfig {
                bind_address: " ".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("grpc.bind_address"));
    }

    #[test]
    fn test_validation_queue_capacity_zero() {
        let cfg = Config {
            alerting: AlertingConfig {
                queue_capacity: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("alerting.queue_capacity"));
    }

    #[test]
    fn test_validation_smtp_port_zero_with_host() {
        let cfg = Config {
            alerting: AlertingConfig {
                smtp: SmtpConfig {
                    host: "mail".to_string(),
                    port: 0,
                    from_email_address: String::new(),
                },
                ..Default::default()
            },
            ..Default::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("alerting.smtp.port"));

        // Without a host the port is irrelevant.
        let cfg = Config {
            alerting: AlertingConfig {
                smtp: SmtpConfig {
                    port: 0,
                    ..Default::default()
                },
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_validation_retention_zero() {
        let cfg = Config {
            store: StoreConfig { retention: 0 },
            ..Default::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("store.retention"));
    }

    #[test]
    fn test_validation_stats_interval_zero() {
        let cfg = Config {
            stats_interval: Duration::ZERO,
            ..Default::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("stats_interval"));
    }

    #[test]
    fn test_unknown_duration_rejected() {
        let err = Config::from_yaml("stats_interval: soon").unwrap_err();
        assert!(!err.to_string().is_empty());
    }
}
