//! modelops - Main Entry Point
//!
//! Runs one lifecycle stage per invocation.

use clap::Parser;
use modelops_lifecycle::cli::{cmd_import, cmd_info, cmd_publish, cmd_score, cmd_train, Cli, Commands};
use modelops_lifecycle::config::RuntimeConfig;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = RuntimeConfig::load(cli.config.as_deref())?;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_filter.as_str().into()),
        )
        .init();

    match cli.command {
        Commands::Train { context, no_generator } => {
            cmd_train(&config, &context, no_generator)?;
        }
        Commands::Score { context } => {
            cmd_score(&config, &context)?;
        }
        Commands::Publish {
            artifact,
            version,
            scaler_query,
            scaler_type,
        } => {
            cmd_publish(&config, &artifact, &version, &scaler_query, &scaler_type)?;
        }
        Commands::Import { csv, table } => {
            cmd_import(&config, &csv, &table)?;
        }
        Commands::Info { query } => {
            cmd_info(&config, &query)?;
        }
    }

    Ok(())
}
