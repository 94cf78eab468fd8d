use std::collections::HashMap;
use std::env;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::{AppError, Result};
use crate::scanner::DEFAULT_MAX_UNPACKED_BYTES;
use crate::scheduler::{DEFAULT_CONCURRENCY, DEFAULT_INSPECT_TIMEOUT};

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub port: u16,
    pub scan: ScanConfig,
    pub registry: RegistryConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScanConfig {
    /// Registry inspections allowed to run at the same time
    pub concurrency: usize,
    pub inspect_timeout_secs: u64,
    pub fetch_timeout_secs: u64,
    pub max_chart_bytes: u64,
    /// Budget for the decompressed contents of one chart
    pub max_unpacked_bytes: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    pub platform_os: String,
    pub platform_arch: String,
    /// Registries reached over plain HTTP
    #[serde(default)]
    pub insecure: Vec<String>,
    /// Basic credentials keyed by registry host. Only that host ever sees them.
    #[serde(default)]
    pub credentials: HashMap<String, RegistryCredentials>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistryCredentials {
    pub username: String,
    pub password: String,
}

impl ScanConfig {
    pub fn inspect_timeout(&self) -> Duration {
        Duration::from_secs(self.inspect_timeout_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "dev".into());

        let config = Config::builder()
            // Start with default values
            .set_default("port", 8080)?
            .set_default("scan.concurrency", DEFAULT_CONCURRENCY as u64)?
            .set_default("scan.inspect_timeout_secs", DEFAULT_INSPECT_TIMEOUT.as_secs())?
            .set_default("scan.fetch_timeout_secs", 60)?
            .set_default("scan.max_chart_bytes", 50 * 1024 * 1024)?
            .set_default("scan.max_unpacked_bytes", DEFAULT_MAX_UNPACKED_BYTES)?
            .set_default("registry.platform_os", "linux")?
            .set_default("registry.platform_arch", "amd64")?

            // Add configuration from files
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))

            // Add environment variables, e.g. CHARTSCAN_SCAN__CONCURRENCY=10
            .add_source(
                Environment::with_prefix("CHARTSCAN")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("registry.insecure")
                    .try_parsing(true),
            )

            .build()
            .map_err(|e| AppError::Config(e.to_string()))?;

        let config: AppConfig = config
            .try_deserialize()
            .map_err(|e| AppError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.scan.concurrency == 0 {
            return Err(AppError::Config("scan.concurrency must be at least 1".into()));
        }
        if self.scan.inspect_timeout_secs == 0 || self.scan.fetch_timeout_secs == 0 {
            return Err(AppError::Config("scan timeouts must be non-zero".into()));
        }
        if let Some(host) = self
            .registry
            .credentials
            .iter()
            .find_map(|(host, creds)| creds.username.is_empty().then_some(host))
        {
            return Err(AppError::Config(format!(
                "registry.credentials.{} needs a username",
                host
            )));
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            scan: ScanConfig {
                concurrency: DEFAULT_CONCURRENCY,
                inspect_timeout_secs: DEFAULT_INSPECT_TIMEOUT.as_secs(),
                fetch_timeout_secs: 60,
                max_chart_bytes: 50 * 1024 * 1024,
                max_unpacked_bytes: DEFAULT_MAX_UNPACKED_BYTES,
            },
            registry: RegistryConfig {
                platform_os: "linux".to_string(),
                platform_arch: "amd64".to_string(),
                insecure: Vec::new(),
                credentials: HashMap::new(),
            },
        }
    }
}
