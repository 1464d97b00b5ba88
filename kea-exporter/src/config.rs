//! Configuration for the Kea exporter.

use std::path::PathBuf;
use std::time::Duration;

use kea_common::LoggingConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load config: {0}")]
    Load(#[from] kea_common::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete exporter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExporterConfig {
    /// Kea endpoints: `http(s)://` URLs or control socket paths.
    #[serde(default)]
    pub targets: Vec<String>,

    /// Timeout of a single control request in seconds (default: 10).
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Budget for all requests to one endpoint within a scrape
    /// (default: three request timeouts).
    #[serde(default)]
    pub endpoint_timeout_secs: Option<u64>,

    /// How often module discovery and subnet tables are refreshed (default: 60).
    #[serde(default = "default_reload_interval")]
    pub reload_interval_secs: u64,

    /// Scrapes closer together than this reuse the previous page (default: 0).
    #[serde(default)]
    pub min_scrape_interval_secs: u64,

    /// Overall scrape deadline (default: endpoint budget + 5).
    #[serde(default)]
    pub scrape_deadline_secs: Option<u64>,

    /// Client certificate for HTTPS endpoints.
    #[serde(default)]
    pub tls: TlsConfig,

    /// Prometheus exposition settings.
    #[serde(default)]
    pub prometheus: PrometheusConfig,

    /// Statistic filtering settings.
    #[serde(default)]
    pub filters: FilterConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_timeout() -> u64 {
    10
}

fn default_reload_interval() -> u64 {
    60
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            targets: Vec::new(),
            timeout_secs: default_timeout(),
            endpoint_timeout_secs: None,
            reload_interval_secs: default_reload_interval(),
            min_scrape_interval_secs: 0,
            scrape_deadline_secs: None,
            tls: TlsConfig::default(),
            prometheus: PrometheusConfig::default(),
            filters: FilterConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Mutual TLS client identity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsConfig {
    /// PEM client certificate.
    #[serde(default)]
    pub client_cert: Option<PathBuf>,

    /// PEM private key for the client certificate.
    #[serde(default)]
    pub client_key: Option<PathBuf>,
}

/// Prometheus HTTP endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrometheusConfig {
    /// Address to listen on (default: "0.0.0.0:9547").
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Path for metrics endpoint (default: "/metrics").
    #[serde(default = "default_path")]
    pub path: String,

    /// Metric name prefix (default: "kea").
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

fn default_listen() -> String {
    "0.0.0.0:9547".to_string()
}

fn default_path() -> String {
    "/metrics".to_string()
}

fn default_prefix() -> String {
    "kea".to_string()
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            path: default_path(),
            prefix: default_prefix(),
        }
    }
}

/// Statistic filtering configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Glob patterns over raw statistic keys to skip.
    #[serde(default)]
    pub exclude_keys: Vec<String>,
}

impl FilterConfig {
    /// Compile the exclusion patterns.
    pub fn exclude_patterns(&self) -> Result<Vec<glob::Pattern>, ConfigError> {
        self.exclude_keys
            .iter()
            .map(|p| {
                glob::Pattern::new(p).map_err(|e| {
                    ConfigError::Validation(format!("invalid exclude pattern '{}': {}", p, e))
                })
            })
            .collect()
    }
}

impl ExporterConfig {
    /// Load configuration from a JSON5 file.
    ///
    /// Targets may still be empty; they can be supplied on the command line.
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self, ConfigError> {
        let config: ExporterConfig = kea_common::load_config(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: ExporterConfig = kea_common::parse_config(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate everything except the presence of targets.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "timeout_secs must be at least 1".to_string(),
            ));
        }

        if let Some(deadline) = self.scrape_deadline_secs
            && deadline == 0
        {
            return Err(ConfigError::Validation(
                "scrape_deadline_secs must be at least 1".to_string(),
            ));
        }

        if self.endpoint_timeout_secs == Some(0) {
            return Err(ConfigError::Validation(
                "endpoint_timeout_secs must be at least 1".to_string(),
            ));
        }

        if self.tls.client_cert.is_some() != self.tls.client_key.is_some() {
            return Err(ConfigError::Validation(
                "tls.client_cert and tls.client_key must be set together".to_string(),
            ));
        }

        if self.prometheus.listen.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::Validation(format!(
                "invalid listen address '{}'",
                self.prometheus.listen
            )));
        }

        if !self.prometheus.path.starts_with('/') {
            return Err(ConfigError::Validation(
                "prometheus.path must start with '/'".to_string(),
            ));
        }

        if self.prometheus.prefix.is_empty()
            || !self
                .prometheus
                .prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(ConfigError::Validation(format!(
                "invalid metric prefix '{}'",
                self.prometheus.prefix
            )));
        }

        self.filters.exclude_patterns()?;
        Ok(())
    }

    /// Fail when no target is configured.
    pub fn require_targets(&self) -> Result<(), ConfigError> {
        if self.targets.is_empty() {
            return Err(ConfigError::Validation(
                "at least one target is required".to_string(),
            ));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn reload_interval(&self) -> Duration {
        Duration::from_secs(self.reload_interval_secs)
    }

    pub fn min_scrape_interval(&self) -> Duration {
        Duration::from_secs(self.min_scrape_interval_secs)
    }

    /// Time one endpoint may take within a scrape.
    ///
    /// A reload issues up to three requests, so the default allows three
    /// request timeouts.
    pub fn endpoint_timeout(&self) -> Duration {
        Duration::from_secs(
            self.endpoint_timeout_secs
                .unwrap_or(self.timeout_secs.saturating_mul(3)),
        )
    }

    pub fn scrape_deadline(&self) -> Duration {
        self.scrape_deadline_secs
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.endpoint_timeout() + Duration::from_secs(5))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kea_common::LogFormat;

    #[test]
    fn test_defaults() {
        let config = ExporterConfig::parse("{}").unwrap();
        assert!(config.targets.is_empty());
        assert_eq!(config.timeout(), Duration::from_secs(10));
        assert_eq!(config.reload_interval(), Duration::from_secs(60));
        assert_eq!(config.endpoint_timeout(), Duration::from_secs(30));
        assert_eq!(config.scrape_deadline(), Duration::from_secs(35));
        assert_eq!(config.prometheus.listen, "0.0.0.0:9547");
        assert_eq!(config.prometheus.path, "/metrics");
        assert_eq!(config.prometheus.prefix, "kea");
        assert!(config.require_targets().is_err());
    }

    #[test]
    fn test_full_config() {
        let config = ExporterConfig::parse(
            r#"{
                // Control Agent plus a local DHCPv6 socket
                targets: ["http://kea:8000", "/run/kea/kea6-ctrl-socket"],
                timeout_secs: 3,
                endpoint_timeout_secs: 7,
                reload_interval_secs: 300,
                min_scrape_interval_secs: 5,
                scrape_deadline_secs: 20,
                tls: { client_cert: "/etc/kea/client.pem", client_key: "/etc/kea/client.key" },
                prometheus: { listen: "127.0.0.1:9100", path: "/kea", prefix: "dhcp" },
                filters: { exclude_keys: ["*.pool*"] },
                logging: { level: "debug", format: "json" },
            }"#,
        )
        .unwrap();

        assert_eq!(config.targets.len(), 2);
        assert_eq!(config.timeout(), Duration::from_secs(3));
        assert_eq!(config.endpoint_timeout(), Duration::from_secs(7));
        assert_eq!(config.min_scrape_interval(), Duration::from_secs(5));
        assert_eq!(config.scrape_deadline(), Duration::from_secs(20));
        assert_eq!(config.prometheus.prefix, "dhcp");
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.filters.exclude_patterns().unwrap().len(), 1);
        assert!(config.require_targets().is_ok());
    }

    #[test]
    fn test_validation_errors() {
        for content in [
            "{ timeout_secs: 0 }",
            "{ scrape_deadline_secs: 0 }",
            "{ endpoint_timeout_secs: 0 }",
            r#"{ tls: { client_cert: "/cert.pem" } }"#,
            r#"{ prometheus: { listen: "not an address" } }"#,
            r#"{ prometheus: { path: "metrics" } }"#,
            r#"{ prometheus: { prefix: "kea-exporter" } }"#,
        ] {
            let result = ExporterConfig::parse(content);
            assert!(
                matches!(result, Err(ConfigError::Validation(_))),
                "{content} should fail validation"
            );
        }
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exporter.json5");
        std::fs::write(&path, r#"{ targets: ["/run/kea/kea4-ctrl-socket"] }"#).unwrap();

        let config = ExporterConfig::load_from_file(&path).unwrap();
        assert_eq!(config.targets, vec!["/run/kea/kea4-ctrl-socket"]);

        let missing = ExporterConfig::load_from_file(dir.path().join("absent.json5"));
        assert!(matches!(missing, Err(ConfigError::Load(_))));
    }
}
