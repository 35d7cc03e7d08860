//! Log processor behind a local invocation harness.
//!
//! Telemetry records are written by the handler's own logger, so only this
//! binary's events are bridged to the log exporter.

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::TcpListener;

use observe_relay::config::{load_from_env, Role};
use observe_relay::lifecycle::{start_telemetry, Shutdown};
use observe_relay::processor::{InvocationServer, LogProcessor};

#[derive(Parser)]
#[command(name = "log-processor")]
#[command(about = "Log-processing function with a local HTTP harness", long_about = None)]
struct Args {
    /// Optional TOML configuration file
    #[arg(short, long, env = "CONFIG_PATH")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = load_from_env(Role::Processor, args.config.as_deref())?;

    let telemetry = start_telemetry(&config, &["log_processor"])?;

    tracing::info!(
        service = %config.telemetry.service_name,
        environment = %config.telemetry.environment.as_str(),
        region = %config.processor.aws_region,
        "Telemetry initialized"
    );

    let processor = LogProcessor::new(&telemetry, &config.processor.aws_region)?;
    let server = InvocationServer::new(
        processor,
        config.processor.function_name.as_deref(),
        Duration::from_secs(config.server.request_timeout_secs),
    );

    let listener = TcpListener::bind(config.server.bind_address()).await?;

    let shutdown = Shutdown::new();
    shutdown.trigger_on_os_signal();

    let served = server.run(listener, shutdown.subscribe()).await;

    telemetry.shutdown().await;
    served?;

    tracing::info!("Shutdown complete");
    Ok(())
}
