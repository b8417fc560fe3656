//! conclave server entry point.

use anyhow::Result;
use clap::{Parser, Subcommand};
use conclave::bootstrap::{build_orchestrator, load_config, simulated_executor};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Parser)]
#[command(name = "conclave", version, about = "Agent dispatch server")]
struct Cli {
    /// Config file (defaults to $CONCLAVE_CONFIG or the platform config dir)
    #[arg(long, short)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP action server
    Serve {
        /// Override the configured port
        #[arg(long)]
        port: Option<u16>,
        /// Simulated execution delay per task
        #[arg(long, default_value_t = 0)]
        delay_ms: u64,
    },
    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref())?;
    conclave::logging::init(&config.logging);

    match cli.command.unwrap_or(Command::Serve {
        port: None,
        delay_ms: 0,
    }) {
        Command::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        Command::Serve { port, delay_ms } => {
            if let Some(port) = port {
                config.api.port = port;
            }
            serve(config, delay_ms).await
        }
    }
}

#[cfg(feature = "api")]
async fn serve(config: conclave::config::AppConfig, delay_ms: u64) -> Result<()> {
    let api = config.api.clone();
    let orchestrator = Arc::new(build_orchestrator(config, simulated_executor(delay_ms))?);
    conclave::api::ApiServer::new(api, orchestrator).run().await
}

#[cfg(not(feature = "api"))]
async fn serve(config: conclave::config::AppConfig, delay_ms: u64) -> Result<()> {
    let orchestrator = Arc::new(build_orchestrator(config, simulated_executor(delay_ms))?);
    tracing::warn!("Built without the `api` feature; waiting for ctrl-c");
    tokio::signal::ctrl_c().await?;
    orchestrator.shutdown();
    Ok(())
}
