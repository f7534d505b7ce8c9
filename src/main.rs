use anyhow::{Context, Result};
use clap::Parser;
use devgate::config::Config;
use devgate::gateway::GatewayRegistry;
use devgate::logging::{get_logger, init_logging};
use devgate::web::{self, AppState};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "devgate")]
#[command(version, about = "Serve configured field devices over HTTP")]
struct Args {
    /// Configuration file path (defaults to $DEVGATE_CONFIG, then the standard locations)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured bind host
    #[arg(long)]
    host: Option<String>,

    /// Override the configured port
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load_from(args.config.as_deref()).context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;
    init_logging(&config.logging).context("Failed to initialize logging")?;

    let logger = get_logger("main");
    logger.info(&format!(
        "devgate {} starting with {} device(s)",
        env!("APP_VERSION"),
        config.devices.len()
    ));

    let registry = GatewayRegistry::from_config(&config).context("Failed to build gateways")?;
    let ready = registry.startup_all().await;
    if ready < registry.len() {
        logger.warn(&format!(
            "{} of {} device(s) failed their startup probe; serving anyway",
            registry.len() - ready,
            registry.len()
        ));
    }

    let host = args.host.unwrap_or_else(|| config.web.host.clone());
    let port = args.port.unwrap_or(config.web.port);
    let state = AppState::new(registry.clone(), config);

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            get_logger("main").error(&format!("Failed to listen for shutdown signal: {}", e));
        }
    };
    let served = web::serve(state, &host, port, shutdown).await;

    registry.shutdown_all().await;
    logger.info("devgate stopped");
    served
}
