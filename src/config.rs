//! Configuration management for newrelic-exporter.
//!
//! This module handles loading, merging, and validating configuration from files
//! and CLI arguments. It supports YAML, JSON, and TOML formats. Keys keep the
//! dotted names of the exporter's historical YAML layout (`api.key`,
//! `web.listen-address`, ...).

use crate::cli::{Args, ConfigFormat};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;
use url::Url;

// Default configuration constants
pub const DEFAULT_API_SERVER: &str = "https://api.newrelic.com";
pub const DEFAULT_SERVICE: &str = "applications";
pub const DEFAULT_PERIOD: u64 = 60;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_CACHE_TIME: Duration = Duration::from_secs(3600);
pub const DEFAULT_TELEMETRY_PATH: &str = "/metrics";
pub const DEFAULT_LISTEN_ADDRESS: &str = "0.0.0.0:9126";

/// A statically configured application. Skips inventory lookups entirely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticApplication {
    pub id: u64,
    pub name: String,
}

/// Exporter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Upstream API
    #[serde(rename = "api.key", default)]
    pub api_key: Option<String>,
    #[serde(rename = "api.server", default)]
    pub api_server: Option<String>,
    /// Period in seconds passed to the metric-data endpoint
    #[serde(rename = "api.period", default)]
    pub period: Option<u64>,
    #[serde(rename = "api.timeout", default, with = "humantime_serde")]
    pub timeout: Option<Duration>,
    #[serde(rename = "api.service", default)]
    pub service: Option<String>,
    #[serde(rename = "api.apps", default)]
    pub apps: Option<Vec<StaticApplication>>,
    #[serde(rename = "api.metric-filters", default)]
    pub metric_filters: Option<Vec<String>>,
    #[serde(rename = "api.value-filters", default)]
    pub value_filters: Option<Vec<String>>,

    // Catalog caching
    #[serde(rename = "api.app-list-cache-time", default, with = "humantime_serde")]
    pub app_list_cache_time: Option<Duration>,
    #[serde(rename = "api.metric-names-cache-time", default, with = "humantime_serde")]
    pub metric_names_cache_time: Option<Duration>,

    /// Local traffic inspection only: disables certificate validation
    #[serde(rename = "api.debug-proxy-address", default)]
    pub debug_proxy_address: Option<String>,

    // Exposition server
    #[serde(rename = "web.telemetry-path", default)]
    pub telemetry_path: Option<String>,
    #[serde(rename = "web.listen-address", default)]
    pub listen_address: Option<String>,
    /// Upper bound for one scrape cycle. Unset means no deadline.
    #[serde(rename = "web.scrape-timeout", default, with = "humantime_serde")]
    pub scrape_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            api_server: Some(DEFAULT_API_SERVER.to_string()),
            period: Some(DEFAULT_PERIOD),
            timeout: Some(DEFAULT_TIMEOUT),
            service: Some(DEFAULT_SERVICE.to_string()),
            apps: None,
            metric_filters: None,
            value_filters: None,
            app_list_cache_time: Some(DEFAULT_CACHE_TIME),
            metric_names_cache_time: Some(DEFAULT_CACHE_TIME),
            debug_proxy_address: None,
            telemetry_path: Some(DEFAULT_TELEMETRY_PATH.to_string()),
            listen_address: Some(DEFAULT_LISTEN_ADDRESS.to_string()),
            scrape_timeout: None,
        }
    }
}

impl Config {
    pub fn api_server(&self) -> &str {
        self.api_server.as_deref().unwrap_or(DEFAULT_API_SERVER)
    }

    pub fn service(&self) -> &str {
        self.service.as_deref().unwrap_or(DEFAULT_SERVICE)
    }

    pub fn period(&self) -> u64 {
        self.period.unwrap_or(DEFAULT_PERIOD)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout.unwrap_or(DEFAULT_TIMEOUT)
    }

    pub fn app_list_cache_time(&self) -> Duration {
        self.app_list_cache_time.unwrap_or(DEFAULT_CACHE_TIME)
    }

    pub fn metric_names_cache_time(&self) -> Duration {
        self.metric_names_cache_time.unwrap_or(DEFAULT_CACHE_TIME)
    }

    pub fn metric_filters(&self) -> &[String] {
        self.metric_filters.as_deref().unwrap_or_default()
    }

    pub fn value_filters(&self) -> &[String] {
        self.value_filters.as_deref().unwrap_or_default()
    }

    pub fn telemetry_path(&self) -> &str {
        self.telemetry_path.as_deref().unwrap_or(DEFAULT_TELEMETRY_PATH)
    }

    pub fn listen_address(&self) -> &str {
        self.listen_address.as_deref().unwrap_or(DEFAULT_LISTEN_ADDRESS)
    }
}

/// Validate effective config (used by --check-config and at startup)
pub fn validate_effective_config(cfg: &Config) -> Result<(), Box<dyn std::error::Error>> {
    if cfg.api_key.as_deref().map_or(true, str::is_empty) {
        return Err("Cannot continue without an API key (api.key)".into());
    }

    if cfg.service().is_empty() {
        return Err("Cannot continue without a New Relic service selected (api.service)".into());
    }

    let server = Url::parse(cfg.api_server())
        .map_err(|e| format!("Could not parse API URL '{}': {}", cfg.api_server(), e))?;
    if !matches!(server.scheme(), "http" | "https") {
        return Err(format!("API URL must be http or https, got '{}'", server.scheme()).into());
    }

    if let Some(proxy) = cfg.debug_proxy_address.as_deref().filter(|p| !p.is_empty()) {
        Url::parse(proxy).map_err(|e| format!("Invalid debug proxy address '{}': {}", proxy, e))?;
    }

    if !cfg.telemetry_path().starts_with('/') {
        return Err(format!(
            "Telemetry path must start with '/', got '{}'",
            cfg.telemetry_path()
        )
        .into());
    }
    if cfg.telemetry_path() == "/" {
        return Err("Telemetry path '/' is reserved for the landing page".into());
    }

    cfg.listen_address()
        .parse::<SocketAddr>()
        .map_err(|e| format!("Invalid listen address '{}': {}", cfg.listen_address(), e))?;

    if cfg.scrape_timeout.is_some_and(|t| t.is_zero()) {
        return Err("web.scrape-timeout must be greater than zero".into());
    }

    Ok(())
}

/// Resolves configuration from CLI args, config file, and defaults.
/// This enforces precedence: CLI (if provided) > config file > default.
pub fn resolve_config(args: &Args) -> Result<Config, Box<dyn std::error::Error>> {
    let mut config = load_config(args.config.as_deref())?;

    if let Some(addr) = &args.listen_address {
        config.listen_address = Some(addr.clone());
    }
    if let Some(path) = &args.telemetry_path {
        config.telemetry_path = Some(path.clone());
    }

    Ok(config)
}

/// Loads configuration with multiple format support.
///
/// Without an explicit path the default locations are tried in order; if
/// none exists the built-in defaults are returned.
pub fn load_config(path: Option<&Path>) -> Result<Config, Box<dyn std::error::Error>> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => {
            let defaults = [
                "/etc/newrelic-exporter/config.yaml",
                "/etc/newrelic-exporter/config.yml",
                "./newrelic_exporter.yml",
                "./newrelic_exporter.yaml",
            ];

            match defaults.iter().find(|p| Path::new(p).exists()) {
                Some(p) => PathBuf::from(p),
                None => return Ok(Config::default()),
            }
        }
    };

    let content = fs::read_to_string(&path)?;
    let config = parse_config(&content, path.extension().and_then(|s| s.to_str()))?;
    info!("Loaded configuration from: {}", path.display());
    Ok(config)
}

/// Parses configuration text. The extension picks the format; YAML is the default.
pub fn parse_config(content: &str, extension: Option<&str>) -> Result<Config, Box<dyn std::error::Error>> {
    let config = match extension {
        Some("json") => serde_json::from_str(content)?,
        Some("toml") => toml::from_str(content)?,
        _ => serde_yaml::from_str(content)?,
    };
    Ok(config)
}

/// Renders configuration in the requested format with the API key redacted.
pub fn render_config(config: &Config, format: ConfigFormat) -> Result<String, Box<dyn std::error::Error>> {
    let mut redacted = config.clone();
    if redacted.api_key.is_some() {
        redacted.api_key = Some("<redacted>".to_string());
    }

    let output = match format {
        ConfigFormat::Json => serde_json::to_string_pretty(&redacted)?,
        // Going through a Value orders plain keys before the `api.apps` tables.
        ConfigFormat::Toml => toml::to_string_pretty(&toml::Value::try_from(&redacted)?)?,
        ConfigFormat::Yaml => serde_yaml::to_string(&redacted)?,
    };
    Ok(output)
}

/// Shows configuration in requested format
pub fn show_config(config: &Config, format: ConfigFormat) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", render_config(config, format)?);
    Ok(())
}
