//! Command-line entry point for the Moonshot Sniper bot

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use moonshot_sniper::config::{EngineConfig, TradingMode};
use moonshot_sniper::events::TracingSink;
use moonshot_sniper::position::PositionManager;
use moonshot_sniper::providers::{DexScreenerClient, GoPlusClient, NoSmartMoney, SimulatedExecution};
use moonshot_sniper::storage::SqliteRepository;
use moonshot_sniper::MoonshotBot;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn, Level};

#[derive(Parser)]
#[command(name = "moonshot-sniper", version, about = "Multi-chain new-token sniper")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the bot until Ctrl-C
    Run {
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        mode: Option<TradingMode>,
        #[arg(long)]
        log_level: Option<String>,
    },
    /// Validate a configuration file and print a summary
    CheckConfig {
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Print the default configuration as TOML
    DefaultConfig,
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let config = match path {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => {
            let mut config = EngineConfig::default();
            config.apply_env_overrides();
            config.validate().context("Failed to validate default configuration")?;
            config
        }
    };
    Ok(config)
}

fn init_logging(level: &str) {
    let level = level.parse::<Level>().unwrap_or(Level::INFO);
    tracing_subscriber::fmt().with_max_level(level).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::DefaultConfig => {
            println!("{}", EngineConfig::default().to_toml_string()?);
            Ok(())
        }
        Command::CheckConfig { config } => {
            let config = load_config(config.as_deref())?;
            println!("Configuration OK");
            println!("  mode:              {:?}", config.trading.mode);
            println!("  starting capital:  ${:.2}", config.trading.starting_capital);
            println!("  chains:            {:?}", config.enabled_chains());
            println!(
                "  pools:             SAFE {}% / HUNT {}%",
                config.safe_pool.allocation_percent, config.hunt_pool.allocation_percent
            );
            println!("  take-profit levels: {}", config.take_profit.len());
            println!("  database:          {}", config.database.url);
            Ok(())
        }
        Command::Run { config, mode, log_level } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(mode) = mode {
                config.trading.mode = mode;
            }
            init_logging(log_level.as_deref().unwrap_or(&config.logging.level));
            run(config).await
        }
    }
}

async fn run(config: EngineConfig) -> Result<()> {
    if config.trading.mode == TradingMode::Live {
        bail!("live trading is not supported: no transaction builder is available, use simulation mode");
    }
    info!("Starting Moonshot Sniper");

    let repository = SqliteRepository::connect(&config.database.url).await?;
    let market = Arc::new(DexScreenerClient::new(&config.providers)?);
    let safety = Arc::new(GoPlusClient::new(&config.providers, config.safety_limits())?);
    let execution = Arc::new(SimulatedExecution::from_config(&config, None).with_prices(market.clone()));
    let events = Arc::new(TracingSink);

    let manager = PositionManager::new(&config, execution, repository.clone(), events.clone(), Utc::now())?
        .into_shared();
    let bot = MoonshotBot::new(
        config,
        market,
        safety,
        Arc::new(NoSmartMoney),
        repository,
        events,
        manager,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Ctrl-C received, shutting down"),
            Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
        }
        if shutdown_tx.send(true).is_err() {
            warn!("Shutdown signal dropped: bot already stopped");
        }
    });

    bot.run(shutdown_rx).await
}
