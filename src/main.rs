//! newrelic-exporter
//!
//! Prometheus exporter for New Relic application metrics with tracing logging.
//! This is the main entry point that initializes the server.

mod handlers;
mod state;

use axum::{routing::get, Router};
use clap::Parser;
use newrelic_exporter::cli::{Args, LogLevel};
use newrelic_exporter::config::{resolve_config, show_config, validate_effective_config, Config};
use newrelic_exporter::{Exporter, HttpTransport, NewRelicApi, TransportConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::{net::TcpListener, signal};
use tracing::{error, info, Level};

use handlers::{metrics_handler, root_handler};
use state::AppState;

/// Initializes tracing logging subsystem with configured log level.
fn setup_logging(args: &Args) {
    let log_level = match args.log_level {
        LogLevel::Off => Level::ERROR,
        LogLevel::Error => Level::ERROR,
        LogLevel::Warn => Level::WARN,
        LogLevel::Info => Level::INFO,
        LogLevel::Debug => Level::DEBUG,
        LogLevel::Trace => Level::TRACE,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");

    info!("Logging initialized with level: {:?}", args.log_level);
}

/// Builds the API client from the effective configuration.
fn build_api(config: &Config) -> Result<NewRelicApi, Box<dyn std::error::Error>> {
    let transport = HttpTransport::new(&TransportConfig {
        server: config.api_server().to_string(),
        api_key: config.api_key.clone().unwrap_or_default(),
        timeout: config.timeout(),
        debug_proxy: config.debug_proxy_address.clone(),
    })?;

    Ok(NewRelicApi::new(
        Arc::new(transport),
        config.service(),
        config.period(),
    ))
}

/// Main application entry point.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = resolve_config(&args)?;

    if args.check_config {
        if let Err(e) = validate_effective_config(&config) {
            eprintln!("❌ Configuration invalid: {}", e);
            std::process::exit(1);
        }
        println!("✅ Configuration is valid");
        return Ok(());
    }

    if args.show_config {
        return show_config(&config, args.config_format);
    }

    if let Err(e) = validate_effective_config(&config) {
        eprintln!("❌ Configuration invalid: {}", e);
        std::process::exit(1);
    }

    setup_logging(&args);

    info!("Starting newrelic-exporter {}", env!("CARGO_PKG_VERSION"));

    let api = build_api(&config)?;
    let exporter = Exporter::new(&config, api)?;

    let telemetry_path = config.telemetry_path().to_string();
    let state = Arc::new(AppState {
        exporter,
        telemetry_path: telemetry_path.clone(),
    });

    // Setup graceful shutdown signal handlers
    let shutdown_signal = async {
        let ctrl_c = async {
            signal::ctrl_c()
                .await
                .expect("Failed to install Ctrl+C handler");
        };

        #[cfg(unix)]
        let terminate = async {
            signal::unix::signal(signal::unix::SignalKind::terminate())
                .expect("Failed to install signal handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received SIGINT (Ctrl+C), shutting down gracefully...");
            }
            _ = terminate => {
                info!("Received SIGTERM, shutting down gracefully...");
            }
        }
    };

    let addr: SocketAddr = config.listen_address().parse()?;

    let app = Router::new()
        .route("/", get(root_handler))
        .route(&telemetry_path, get(metrics_handler))
        .with_state(state);

    let listener = TcpListener::bind(addr).await?;
    info!(
        "newrelic-exporter listening on http://{}{}",
        addr, telemetry_path
    );

    let server = axum::serve(listener, app);

    tokio::select! {
        result = server => {
            if let Err(e) = result {
                error!("Server error: {}", e);
                return Err(e.into());
            }
        }
        _ = shutdown_signal => {
            info!("Shutdown signal received, exiting...");
        }
    }

    info!("newrelic-exporter stopped gracefully");
    Ok(())
}
