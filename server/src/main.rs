//! SmartServe Server - Main entry point.
//!
//! This binary starts the SmartServe backend with:
//! - Structured JSON logging for production
//! - Graceful shutdown handling (SIGTERM/SIGINT)
//!
//! # Configuration
//!
//! See [`smartserve_server::config`] for environment variable configuration.
//!
//! # Example
//!
//! ```bash
//! # Development mode (built-in demo secrets)
//! SMARTSERVE_DEV_MODE=true cargo run --bin smartserve-server
//!
//! # Production mode
//! SECRET_KEY="long-random-secret" \
//! SMARTSERVE_USERS="biryanis:1:admin,captain1:1:captain" \
//! SMARTSERVE_SECRET_BIRYANIS="..." \
//! SMARTSERVE_SECRET_CAPTAIN1="..." \
//! PORT=8080 \
//! cargo run --release --bin smartserve-server
//! ```

use std::process::ExitCode;

use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use smartserve_server::config::Config;
use smartserve_server::routes::{create_router, AppState};

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "Failed to load configuration");
            eprintln!("Error: {err}");
            eprintln!();
            eprintln!("Required environment variables (unless SMARTSERVE_DEV_MODE=true):");
            eprintln!("  SECRET_KEY                    - Token signing secret");
            eprintln!("  SMARTSERVE_SECRET_<PRINCIPAL> - Secret for each principal, e.g.");
            eprintln!("                                  SMARTSERVE_SECRET_ROYALSPICE_SMARTSERVER_COM");
            eprintln!();
            eprintln!("Optional environment variables:");
            eprintln!("  PORT                          - HTTP server port (default: 8080)");
            eprintln!("  RUST_LOG                      - Log level filter (default: info)");
            eprintln!("  SMARTSERVE_DEV_MODE           - Allow development secrets ('true')");
            eprintln!("  SMARTSERVE_TOKEN_TTL_SECS     - Token lifetime (default: 86400)");
            eprintln!("  SMARTSERVE_USERS              - Format: principal:orgId[:role],...");
            return ExitCode::from(1);
        }
    };

    info!(
        port = config.port,
        dev_mode = config.dev_mode,
        principal_count = config.credentials.len(),
        restaurant_count = config.restaurants.len(),
        token_ttl_secs = config.token_ttl.as_secs(),
        "SmartServe server starting"
    );

    let port = config.port;
    let app = create_router(AppState::new(config));

    let bind_addr = format!("0.0.0.0:{port}");
    let listener = match TcpListener::bind(&bind_addr).await {
        Ok(listener) => {
            info!(port, address = %bind_addr, "Server listening");
            listener
        }
        Err(err) => {
            error!(error = %err, address = %bind_addr, "Failed to bind to address");
            return ExitCode::from(1);
        }
    };

    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());

    info!("Server ready to accept connections");

    if let Err(err) = server.await {
        error!(error = %err, "Server error");
        return ExitCode::from(1);
    }

    info!("Server shutdown complete");
    ExitCode::SUCCESS
}

/// Initialize structured logging with tracing.
///
/// JSON output, filtered by `RUST_LOG` (default `info`).
fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug,axum::rejection=trace"));

    let json_layer = fmt::layer()
        .json()
        .with_target(true)
        .with_level(true)
        .with_file(false)
        .with_line_number(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .init();
}

/// Resolves when SIGINT or SIGTERM is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
