//! Observe Relay front service.
//!
//! ```text
//!  client ──▶ /health, /api/users, /api/process, /api/metrics-demo
//!        ──▶ /api/logs-to-lambda ──(payload.metadata: traceId, spanId)──▶ log-processor
//!
//!  spans, metrics, logs ──▶ {OBSERVE_ENDPOINT}/v1/{traces,metrics,logs}
//! ```
//!
//! Shutdown order: stop accepting, drain in-flight requests, then flush
//! traces, metrics and logs.

use clap::Parser;
use std::path::PathBuf;
use tokio::net::TcpListener;

use observe_relay::config::{load_from_env, Role};
use observe_relay::http::HttpServer;
use observe_relay::lifecycle::{start_telemetry, Shutdown};

#[derive(Parser)]
#[command(name = "observe-relay")]
#[command(about = "Front HTTP service with OTLP export", long_about = None)]
struct Args {
    /// Optional TOML configuration file
    #[arg(short, long, env = "CONFIG_PATH")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = load_from_env(Role::Front, args.config.as_deref())?;

    let telemetry = start_telemetry(&config, &["observe_relay"])?;

    tracing::info!(
        service = %config.telemetry.service_name,
        version = %config.telemetry.service_version,
        environment = %config.telemetry.environment.as_str(),
        endpoint = %config.telemetry.endpoint,
        "OpenTelemetry initialized successfully"
    );

    let listener = TcpListener::bind(config.server.bind_address()).await?;

    let shutdown = Shutdown::new();
    shutdown.trigger_on_os_signal();

    let server = HttpServer::new(config, &telemetry)?;
    let served = server.run(listener, shutdown.subscribe()).await;

    telemetry.shutdown().await;
    served?;

    tracing::info!("Shutdown complete");
    Ok(())
}
