use anyhow::{Context, Result};
use challenge_sync::cli::{Args, ClientConfig, ConfigDiscovery, ExecutionMode, SimulateConfig};
use challenge_sync::simulation;
use std::path::Path;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mode = match args.mode() {
        Ok(mode) => mode,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(2);
        }
    };

    match mode {
        ExecutionMode::Simulate(config) => run_simulation(config).await,
        ExecutionMode::InitConfig(path) => {
            init_logging(None);
            init_config(&path)
        }
        ExecutionMode::ShowConfig => {
            init_logging(None);
            ConfigDiscovery::show_discovery_info();
            Ok(())
        }
    }
}

/// Install the subscriber. RUST_LOG wins over the configured filter.
fn init_logging(config: Option<&ClientConfig>) {
    let fallback = config
        .map(ClientConfig::log_filter)
        .unwrap_or(challenge_sync::env::DEFAULT_LOG_FILTER);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run_simulation(config: SimulateConfig) -> Result<()> {
    let client_config = match &config.config_override {
        Some(path) => ClientConfig::from_toml_file(path)
            .with_context(|| format!("Failed to load configuration from {:?}", path))?,
        None => ConfigDiscovery::discover_config().context("Failed to discover configuration")?,
    };
    init_logging(Some(&client_config));

    info!("Starting challenge sync simulation");
    let report = simulation::run(&config, &client_config).await?;
    report.print(config.verbose);
    Ok(())
}

fn init_config(path: &Path) -> Result<()> {
    let created = ConfigDiscovery::write_default_config(path)
        .with_context(|| format!("Failed to write configuration to {:?}", path))?;
    if created {
        println!("Created default configuration: {:?}", path);
    } else {
        println!("Configuration already exists, left unchanged: {:?}", path);
    }
    Ok(())
}
