//! Server configuration: built-in defaults, an optional TOML file, then
//! environment overrides.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::market::{Period, RetryPolicy, Universe};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub server: HttpConfig,
    pub market_data: MarketDataConfig,
    pub cache: CacheConfig,
    pub analytics: AnalyticsConfig,
    /// Companies behind the universe, top-performer and sector views
    pub universe: Universe,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
    /// Bearer token for API auth. Empty disables auth.
    pub api_token: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8001,
            api_token: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Yahoo,
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MarketDataConfig {
    pub provider: ProviderKind,
    /// JSON price file read by the `file` provider
    pub data_file: Option<PathBuf>,
    pub base_url: String,
    pub request_timeout_secs: u64,
    pub concurrency: usize,
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for MarketDataConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Yahoo,
            data_file: None,
            base_url: crate::market::YAHOO_BASE_URL.to_string(),
            request_timeout_secs: 10,
            concurrency: 10,
            max_retries: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 30_000,
        }
    }
}

impl MarketDataConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    pub quote_ttl_secs: u64,
    pub history_ttl_secs: u64,
    pub model_ttl_secs: u64,
    pub backtest_ttl_secs: u64,
    /// Entries per cache
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            quote_ttl_secs: 60,
            history_ttl_secs: 3600,
            model_ttl_secs: 86_400,
            backtest_ttl_secs: 86_400,
            capacity: 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnalyticsConfig {
    pub risk_free_rate: f64,
    pub monte_carlo_paths: usize,
    pub monte_carlo_seed: u64,
    pub default_period: Period,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            risk_free_rate: 0.02,
            monte_carlo_paths: 10_000,
            monte_carlo_seed: 42,
            default_period: Period::OneYear,
        }
    }
}

impl ServerConfig {
    /// Defaults, then the config file if one exists, then the environment.
    pub fn load() -> Result<Self> {
        let path = Self::config_path();
        let mut config = Self::load_from(path.as_deref())?;
        config.apply_env_overrides(|name| env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// `QUANT_CONFIG`, else `<config_dir>/quant-server/config.toml`.
    pub fn config_path() -> Option<PathBuf> {
        if let Ok(path) = env::var("QUANT_CONFIG") {
            return Some(PathBuf::from(path));
        }
        directories::ProjectDirs::from("", "", "quant-server").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Parse `path` when it exists; defaults otherwise.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path.filter(|p| p.exists()) else {
            return Ok(Self::default());
        };
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Invalid config file {}", path.display()))
    }

    /// Apply `QUANT_*` overrides read through `lookup`.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let var = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(bind) = var("QUANT_BIND") {
            self.server.bind = bind;
        }
        if let Some(port) = var("QUANT_PORT") {
            self.server.port = port
                .parse()
                .with_context(|| format!("QUANT_PORT is not a port number: {port}"))?;
        }
        if let Some(token) = lookup("QUANT_API_TOKEN") {
            self.server.api_token = token.trim().to_string();
        }
        if let Some(provider) = var("QUANT_PROVIDER") {
            self.market_data.provider = match provider.to_ascii_lowercase().as_str() {
                "yahoo" => ProviderKind::Yahoo,
                "file" => ProviderKind::File,
                other => bail!("QUANT_PROVIDER must be 'yahoo' or 'file', got '{other}'"),
            };
        }
        if let Some(file) = var("QUANT_DATA_FILE") {
            self.market_data.data_file = Some(PathBuf::from(file));
        }
        if let Some(url) = var("QUANT_YAHOO_BASE_URL") {
            self.market_data.base_url = url;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.market_data.provider == ProviderKind::File && self.market_data.data_file.is_none() {
            bail!("market_data.data_file is required when market_data.provider = \"file\"");
        }
        if self.market_data.concurrency == 0 {
            bail!("market_data.concurrency must be at least 1");
        }
        if self.market_data.initial_backoff_ms > self.market_data.max_backoff_ms {
            bail!("market_data.initial_backoff_ms exceeds max_backoff_ms");
        }
        if self.cache.capacity == 0 {
            bail!("cache.capacity must be at least 1");
        }
        if !self.analytics.risk_free_rate.is_finite() {
            bail!("analytics.risk_free_rate must be finite");
        }
        if self.analytics.monte_carlo_paths == 0 {
            bail!("analytics.monte_carlo_paths must be at least 1");
        }
        self.socket_addr().map(|_| ())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.server.bind, self.server.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.server.bind, self.server.port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.server.port, 8001);
        assert!(config.server.api_token.is_empty());
        assert_eq!(config.market_data.provider, ProviderKind::Yahoo);
        assert_eq!(config.market_data.concurrency, 10);
        assert_eq!(config.cache.quote_ttl_secs, 60);
        assert_eq!(config.cache.history_ttl_secs, 3600);
        assert_eq!(config.analytics.default_period, Period::OneYear);
        assert_eq!(config.market_data.retry_policy(), RetryPolicy::default());
        assert_eq!(config.universe.len(), 15);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[server]
port = 9000

[market_data]
provider = "file"
data_file = "prices.json"

[analytics]
default_period = "2y"
"#
        )
        .unwrap();

        let config = ServerConfig::load_from(Some(file.path())).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.bind, "0.0.0.0");
        assert_eq!(config.market_data.provider, ProviderKind::File);
        assert_eq!(config.market_data.max_retries, 3);
        assert_eq!(config.analytics.default_period, Period::TwoYears);
        assert_eq!(config.universe, Universe::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_universe_section_replaces_default() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[universe."aapl"]
name = "Apple Inc."
sector = "Technology"

[universe.MSFT]
name = "Microsoft Corp."
sector = "Technology"
"#
        )
        .unwrap();

        let config = ServerConfig::load_from(Some(file.path())).unwrap();
        assert_eq!(config.universe.symbols(), vec!["AAPL", "MSFT"]);
        assert_eq!(config.universe.get("msft").unwrap().name, "Microsoft Corp.");
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig::load_from(Some(&dir.path().join("nope.toml"))).unwrap();
        assert_eq!(config, ServerConfig::default());
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[analytics]\ndefault_period = \"10y\"").unwrap();
        assert!(ServerConfig::load_from(Some(file.path())).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("QUANT_PORT", "8100"),
            ("QUANT_API_TOKEN", "secret"),
            ("QUANT_PROVIDER", "FILE"),
            ("QUANT_DATA_FILE", "/tmp/prices.json"),
        ]
        .into();
        let mut config = ServerConfig::default();
        config
            .apply_env_overrides(|name| vars.get(name).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.server.port, 8100);
        assert_eq!(config.server.api_token, "secret");
        assert_eq!(config.market_data.provider, ProviderKind::File);
        assert_eq!(config.market_data.data_file, Some(PathBuf::from("/tmp/prices.json")));
        assert_eq!(config.socket_addr().unwrap().port(), 8100);
    }

    #[test]
    fn test_invalid_overrides() {
        let mut config = ServerConfig::default();
        assert!(config
            .apply_env_overrides(|name| (name == "QUANT_PORT").then(|| "http".to_string()))
            .is_err());
        assert!(config
            .apply_env_overrides(|name| (name == "QUANT_PROVIDER").then(|| "bloomberg".to_string()))
            .is_err());
    }

    #[test]
    fn test_file_provider_requires_data_file() {
        let mut config = ServerConfig::default();
        config.market_data.provider = ProviderKind::File;
        assert!(config.validate().is_err());
    }
}
