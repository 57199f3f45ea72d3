//! HTTP endpoint handlers for the exporter.
//!
//! - `<telemetry path>`: Prometheus metrics endpoint
//! - `/`: landing page

pub mod metrics;
pub mod root;

// Re-export handlers
pub use metrics::metrics_handler;
pub use root::root_handler;
