use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::discovery::DiscoveryConfig;
use crate::endpoint::{BalancingSettings, EndpointRecord, PessimizationConfig, DEFAULT_PORT};
use crate::error::{Error, Result};

/// Transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Bootstrap endpoint used for discovery, `host[:port]`
    pub endpoint: String,
    /// Database path sent with discovery and attached to every call
    pub database: String,
    pub use_tls: bool,
    /// PEM file with trusted CA certificates; native roots when unset
    pub ca_certificate_path: Option<String>,
    /// PEM bytes supplied programmatically, take precedence over the path
    #[serde(skip)]
    pub ca_certificate: Option<Vec<u8>>,
    pub max_inbound_message_size: usize,
    pub connect_timeout_secs: u64,
    /// Readiness wait for calls that carry no deadline
    pub default_deadline_secs: u64,
    /// Value of the SDK build info header
    pub build_info: String,
    pub discovery: DiscoveryConfig,
    pub balancing: BalancingSettings,
    pub pessimization: PessimizationConfig,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            endpoint: format!("localhost:{DEFAULT_PORT}"),
            database: String::new(),
            use_tls: false,
            ca_certificate_path: None,
            ca_certificate: None,
            max_inbound_message_size: 64 << 20, // 64 MiB
            connect_timeout_secs: 10,
            default_deadline_secs: 60,
            build_info: format!("ydb-transport/{}", env!("CARGO_PKG_VERSION")),
            discovery: DiscoveryConfig::default(),
            balancing: BalancingSettings::default(),
            pessimization: PessimizationConfig::default(),
        }
    }
}

impl TransportConfig {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> std::result::Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // YDB_DATABASE, YDB_DISCOVERY__PERIOD_SECS, ...
        builder = builder.add_source(
            Environment::with_prefix("YDB")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from environment variables only
    pub fn from_env() -> std::result::Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Parse `grpc[s]://host[:port][/database][?database=/path]`
    pub fn from_connection_string(connection_string: &str) -> Result<Self> {
        let url = url::Url::parse(connection_string)
            .map_err(|e| Error::Configuration(format!("invalid connection string: {e}")))?;

        let use_tls = match url.scheme() {
            "grpc" => false,
            "grpcs" => true,
            other => {
                return Err(Error::Configuration(format!(
                    "unsupported scheme {other}, expected grpc or grpcs"
                )))
            }
        };

        let host = url
            .host_str()
            .ok_or_else(|| Error::Configuration("connection string has no host".to_string()))?
            .trim_start_matches('[')
            .trim_end_matches(']');
        let port = url.port().unwrap_or(DEFAULT_PORT);

        let database = url
            .query_pairs()
            .find(|(k, _)| k == "database")
            .map(|(_, v)| v.into_owned())
            .or_else(|| {
                let path = url.path();
                (!path.is_empty() && path != "/").then(|| path.to_string())
            })
            .unwrap_or_default();

        Ok(Self {
            endpoint: EndpointRecord::new(host, port, 0).address(),
            database,
            use_tls,
            ..Default::default()
        })
    }

    #[must_use]
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    #[must_use]
    pub fn with_balancing(mut self, balancing: BalancingSettings) -> Self {
        self.balancing = balancing;
        self
    }

    #[must_use]
    pub fn with_ca_certificate(mut self, pem: Vec<u8>) -> Self {
        self.use_tls = true;
        self.ca_certificate = Some(pem);
        self
    }

    /// Discovery bootstrap endpoint
    pub fn bootstrap_endpoint(&self) -> Result<EndpointRecord> {
        EndpointRecord::parse(&self.endpoint)
    }

    /// Trusted CA bytes, reading the configured file if needed
    pub fn trusted_certificate(&self) -> Result<Option<Vec<u8>>> {
        if let Some(pem) = &self.ca_certificate {
            return Ok(Some(pem.clone()));
        }
        match &self.ca_certificate_path {
            Some(path) => Ok(Some(std::fs::read(path)?)),
            None => Ok(None),
        }
    }

    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    #[must_use]
    pub const fn default_deadline(&self) -> Duration {
        Duration::from_secs(self.default_deadline_secs)
    }
}
