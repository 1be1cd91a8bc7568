//! Main entry point for the benchmark controller
//!
//! Wires the real services into the coordinator and runs the configured
//! benchmark to completion.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal;

use controller::{
    services::{RealBrokerSupervisor, RealCaptureManager, RealTransport},
    BenchSettings, ControllerError, Coordinator, RunReport,
};
use shared::{logging, process_debug, process_info, ProcessId};

/// Controller for distributed pub/sub load-generation benchmarks
#[derive(Parser)]
#[command(name = "controller")]
#[command(about = "Drives remote publishers through benchmark runs and reports delivery metrics")]
pub struct Args {
    /// Benchmark configuration file
    #[arg(long, env = "BENCH_CONFIG", default_value = "conf/config.json")]
    pub config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Connect to an externally managed broker instead of launching one
    #[arg(long)]
    pub no_broker: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenv::dotenv();
    let args = Args::parse();

    ProcessId::init_controller();
    logging::init_tracing_with_level(Some(&args.log_level));

    let mut settings = BenchSettings::load(&args.config)
        .await
        .with_context(|| format!("loading {}", args.config.display()))?;
    if args.no_broker {
        settings.broker.launch = false;
    }
    let settings = Arc::new(settings);

    process_info!(
        ProcessId::current(),
        "🖥️  Benchmark controller '{}' using {}",
        settings.client_id,
        args.config.display()
    );
    process_debug!(
        ProcessId::current(),
        "Broker {}:{} (launch: {}), capture: {}",
        settings.broker.host,
        settings.broker.port,
        settings.broker.launch,
        settings.capture.enable
    );

    let broker = RealBrokerSupervisor::new(&settings);
    let transport = RealTransport::new(settings.clone());
    let capture = RealCaptureManager::new(&settings);
    let mut coordinator = Coordinator::new(settings.clone(), broker, transport, capture);

    // Set up graceful shutdown
    let shutdown_sender = coordinator.get_shutdown_sender();
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                logging::log_shutdown(ProcessId::current(), "Received Ctrl+C signal");
                let _ = shutdown_sender.send(()).await;
            }
            Err(err) => {
                logging::log_error(ProcessId::current(), "Signal handling", &err);
            }
        }
    });

    let outcome = coordinator.run().await;
    let report_path = write_report(coordinator.report(), &settings.logging.folder).await?;
    process_info!(ProcessId::current(), "📄 Results written to {}", report_path.display());

    match outcome {
        Ok(_) | Err(ControllerError::Interrupted) => {
            logging::log_success(ProcessId::current(), "Controller stopped gracefully");
            Ok(())
        }
        Err(e) => Err(e).context("benchmark aborted"),
    }
}

/// Write the report as pretty JSON into the logging folder
async fn write_report(report: &RunReport, folder: &Path) -> Result<PathBuf> {
    tokio::fs::create_dir_all(folder)
        .await
        .with_context(|| format!("creating {}", folder.display()))?;

    let stamp = chrono::Utc::now().format("%d-%m-%Y_%H-%M-%S");
    let path = folder.join(format!("results-T{stamp}.json"));
    let json = serde_json::to_string_pretty(report)?;
    tokio::fs::write(&path, json)
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}
