//! New Relic Prometheus Exporter Library
//!
//! Polls the New Relic REST API (v2) and republishes application metrics as
//! Prometheus gauges. The HTTP server in `main.rs` is a thin layer over
//! [`Exporter`]; everything that talks to New Relic lives here.
//!
//! # Layout
//!
//! - [`api`]: authenticated, paginated transport and the typed endpoints
//! - [`cache`]: application inventory and metric-name catalogs with TTLs
//! - [`fetcher`]: chunked metric-data requests
//! - [`exporter`]: the scrape orchestrator and the Prometheus collector
//! - [`fanout`]: the scatter-gather primitive all of the above share
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use newrelic_exporter::{Config, Exporter, HttpTransport, NewRelicApi, TransportConfig};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config {
//!     api_key: Some("0123456789abcdef".to_string()),
//!     ..Config::default()
//! };
//!
//! let transport = HttpTransport::new(&TransportConfig {
//!     server: config.api_server().to_string(),
//!     api_key: "0123456789abcdef".to_string(),
//!     timeout: config.timeout(),
//!     debug_proxy: None,
//! })?;
//! let api = NewRelicApi::new(Arc::new(transport), config.service(), config.period());
//! let exporter = Exporter::new(&config, api)?;
//!
//! for family in exporter.collect().await {
//!     println!("{}", family.get_name());
//! }
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod exporter;
pub mod fanout;
pub mod fetcher;

// Re-export main types for convenience
pub use api::{HttpTransport, NewRelicApi, Pages, Transport, TransportConfig};
pub use cache::CatalogCache;
pub use config::Config;
pub use error::ApiError;
pub use exporter::Exporter;
