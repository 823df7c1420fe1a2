//! wheelvend - binary wheels for sandboxed Python runtimes
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;
use wheelvend::cli::{Cli, Commands};
use wheelvend::config::{Config, ConfigManager};
use wheelvend::error::VendResult;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> VendResult<ExitCode> {
    let cli = Cli::parse();
    let verbose = cli.verbose;

    match cli.command {
        // Commands that never touch configuration
        Commands::Version(args) => {
            init_logging(verbose, None);
            wheelvend::cli::commands::version(args).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Fingerprint(args) => {
            init_logging(verbose, None);
            wheelvend::cli::commands::fingerprint(args).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Vend(args) => {
            let (config, manager) = configure(cli.config, verbose).await?;
            wheelvend::cli::commands::vend(args, &config, manager.path()).await
        }
        Commands::Worker => {
            let (config, _) = configure(cli.config, verbose).await?;
            wheelvend::cli::commands::worker(&config).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Cache(args) => {
            let (config, _) = configure(cli.config, verbose).await?;
            wheelvend::cli::commands::cache(args, &config).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Config(args) => {
            let (config, manager) = configure(cli.config, verbose).await?;
            wheelvend::cli::commands::config(args, &config, &manager).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Load configuration, start logging and create the state directories
async fn configure(path: Option<PathBuf>, verbose: u8) -> VendResult<(Config, ConfigManager)> {
    let manager = match path {
        Some(path) => ConfigManager::with_path(path),
        None => ConfigManager::default(),
    };
    let config = manager.load().await?;
    init_logging(verbose, Some(&config));
    debug!("Loaded configuration from {}", manager.path().display());

    ConfigManager::ensure_state_dirs().await?;
    Ok((config, manager))
}

/// 0 = warn (spinners only), 1 = info, 2+ = debug. `RUST_LOG` wins when set.
fn init_logging(verbose: u8, config: Option<&Config>) {
    let verbose = if verbose == 0 && config.is_some_and(|c| c.general.verbose) {
        1
    } else {
        verbose
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| match verbose {
        0 => EnvFilter::new("wheelvend=warn"),
        1 => EnvFilter::new("wheelvend=info"),
        _ => EnvFilter::new("wheelvend=debug"),
    });

    let json = config.is_some_and(|c| c.general.log_format == "json");
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if json {
        builder.json().init();
    } else {
        builder.without_time().init();
    }
}
