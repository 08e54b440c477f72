//! # srcalc
//!
//! Surgical risk calculator: CLI and HTTP server.

use clap::Parser;
use srcalc::cli::{self, Cli, CliError, Commands};
use srcalc::config::AppConfig;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Cli::parse();

    let config = match AppConfig::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(args, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Cli, config: AppConfig) -> Result<(), CliError> {
    let db = args.db.unwrap_or_else(|| config.storage.db_path.clone());

    let output = match args.command {
        Commands::Init { catalog, force } => cli::cmd_init(&db, &catalog, force)?,
        Commands::Specialties => cli::cmd_specialties(&db)?,
        Commands::Variables { specialty } => cli::cmd_variables(&db, specialty)?,
        Commands::Patient { dfn } => cli::cmd_patient(&config, dfn)?,
        Commands::Calculate {
            specialty,
            values,
            dfn,
            json,
        } => cli::cmd_calculate(&config, &db, specialty, &values, dfn, json)?,
        Commands::Serve => return cli::cmd_serve(config, &db).await,
    };

    println!("{output}");
    Ok(())
}
