// =============================================================================
// meridian — Main Entry Point
// =============================================================================
//
// Boots in safe mode: Demo environment, Paused trading, until the operator
// promotes the process to Live via configuration. `--dry-run` additionally
// forces Paused regardless of what the config file says, evaluating risk
// gates but never sending orders.
// =============================================================================

use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use meridian_core::broker::{BrokerBridge, MockBrokerSdk};
use meridian_core::config::MainConfig;
use meridian_core::error::AppError;
use meridian_core::orchestrator::Orchestrator;
use meridian_core::symbol_config::SymbolConfigSet;

#[derive(Parser, Debug)]
#[command(name = "meridian", about = "Autonomous forex/CFD execution core")]
struct Cli {
    /// Path to the main configuration file.
    #[arg(long, default_value = "config.json", env = "MERIDIAN_CONFIG")]
    config: String,

    /// Log verbosity, overriding the config file's `logging.level`.
    #[arg(long, value_parser = ["debug", "info", "warn", "error"])]
    log_level: Option<String>,

    /// Evaluate risk gates and run the full pipeline, but never send orders.
    #[arg(long)]
    dry_run: bool,
}

fn install_logging(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

async fn run() -> Result<(), AppError> {
    let _ = dotenv::dotenv();
    let cli = Cli::parse();

    let mut config = MainConfig::load(&cli.config).unwrap_or_else(|err| {
        warn!(error = %err, path = %cli.config, "failed to load main config, falling back to defaults");
        MainConfig::default()
    });

    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    install_logging(&config.logging.level);

    info!(
        broker_type = %config.broker.r#type,
        environment = %config.broker.environment,
        dry_run = cli.dry_run,
        "meridian starting up (safe mode: Demo + Paused until explicitly promoted)"
    );

    let symbol_configs = SymbolConfigSet::load(&config.paths.executor_config).unwrap_or_else(|err| {
        warn!(error = %err, path = %config.paths.executor_config, "failed to load symbol config, running with zero symbols");
        SymbolConfigSet::default()
    });

    if config.broker.r#type != "mock" {
        return Err(AppError::Fatal(
            "only the mock broker SDK ships with this build; a real connector must be wired in before broker.type=real can run".to_string(),
        ));
    }

    let sdk = Arc::new(MockBrokerSdk::new(config.trading.initial_balance));
    let bridge = Arc::new(BrokerBridge::new(sdk, std::time::Duration::from_secs(config.broker.request_timeout_s)));

    let session_path = std::path::Path::new(&config.paths.log_dir).join(".session_state");
    let mut orchestrator = Orchestrator::new(config.clone(), symbol_configs, bridge, session_path, cli.dry_run);

    orchestrator.run(&config.paths.models_dir).await.map_err(|err| AppError::Fatal(err.to_string()))?;

    info!("all subsystems running; awaiting shutdown signal");
    wait_for_shutdown_signal().await;

    orchestrator.shutdown().await;
    Ok(())
}

fn main() {
    let runtime = tokio::runtime::Runtime::new().expect("failed to build tokio runtime");
    match runtime.block_on(run()) {
        Ok(()) => std::process::exit(0),
        Err(err) => {
            error!(error = %err, "fatal error during startup or execution");
            std::process::exit(err.exit_code());
        }
    }
}
