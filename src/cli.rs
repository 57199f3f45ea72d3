//! CLI arguments for newrelic-exporter.
//!
//! This module defines the command-line interface structure using the clap library.

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Log level options for CLI parsing
#[derive(Debug, Clone, ValueEnum)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Configuration format options for output
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ConfigFormat {
    Yaml,
    Json,
    Toml,
}

/// Main CLI arguments structure
#[derive(Parser, Debug)]
#[command(
    name = "newrelic-exporter",
    about = "Prometheus exporter for New Relic application metrics",
    long_about = "Prometheus exporter for New Relic application metrics.\n\n\
                  Polls the New Relic REST API (v2) on every scrape and republishes application \
                  summaries and metric timeslices as Prometheus gauges. Application lists and \
                  metric-name catalogs are cached between scrapes.",
    version,
    propagate_version = true
)]
pub struct Args {
    /// Config file (YAML/JSON/TOML)
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Log level
    #[arg(long, value_enum, default_value = "info")]
    pub log_level: LogLevel,

    /// Address to listen on for telemetry (overrides web.listen-address)
    #[arg(long)]
    pub listen_address: Option<String>,

    /// Path under which to expose metrics (overrides web.telemetry-path)
    #[arg(long)]
    pub telemetry_path: Option<String>,

    /// Print effective merged config and exit
    #[arg(long)]
    pub show_config: bool,

    /// Output format for --show-config
    #[arg(long, value_enum, default_value = "yaml")]
    pub config_format: ConfigFormat,

    /// Validate config and exit (return code 1 on error)
    #[arg(long)]
    pub check_config: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_overrides() {
        let args = Args::parse_from([
            "newrelic-exporter",
            "-c",
            "/tmp/nr.yml",
            "--listen-address",
            "127.0.0.1:9999",
            "--log-level",
            "debug",
        ]);
        assert_eq!(args.config, Some(PathBuf::from("/tmp/nr.yml")));
        assert_eq!(args.listen_address.as_deref(), Some("127.0.0.1:9999"));
        assert!(matches!(args.log_level, LogLevel::Debug));
        assert!(!args.check_config);
    }
}
