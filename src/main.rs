//! imgcache - Edge cache for preset-transformed images
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use imgcache::cli::{Cli, Commands};
use imgcache::config::schema::LogFormat;
use imgcache::config::ConfigManager;
use imgcache::error::ImgCacheResult;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> ImgCacheResult<()> {
    let cli = Cli::parse();

    let config_manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };
    let config = config_manager.load().await?;

    init_logging(cli.verbose, config.general.log_format);

    match cli.command {
        Commands::Serve(args) => imgcache::cli::commands::serve(args, &config).await,
        Commands::ClearCache => imgcache::cli::commands::clear_cache(&config).await,
        Commands::Presets(args) => imgcache::cli::commands::presets(args),
        Commands::Key(args) => imgcache::cli::commands::key(args),
        Commands::Config(args) => {
            imgcache::cli::commands::config(args, &config, &config_manager).await
        }
    }
}

/// 0 = info, 1 = debug, 2+ = trace; RUST_LOG takes precedence
fn init_logging(verbose: u8, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| match verbose {
        0 => EnvFilter::new("imgcache=info"),
        1 => EnvFilter::new("imgcache=debug"),
        _ => EnvFilter::new("imgcache=trace"),
    });

    match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init(),
    }
}
