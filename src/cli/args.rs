//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// imgcache - Edge cache for preset-transformed images
///
/// Serves images from an origin, resized and re-encoded by an external
/// transform service according to named presets, and keeps every derived
/// image in an object store.
#[derive(Parser, Debug)]
#[command(name = "imgcache")]
#[command(author, version, long_about = None)]
#[command(about = "Edge cache for preset-transformed images")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "IMGCACHE_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the caching HTTP server
    Serve(ServeArgs),

    /// Delete every cached derived image
    ClearCache,

    /// List the available presets
    Presets(PresetsArgs),

    /// Print the cache key for an asset rendered with a preset
    Key(KeyArgs),

    /// Show or initialize configuration
    Config(ConfigArgs),
}

/// Arguments for the serve command
#[derive(Parser, Debug, Default)]
pub struct ServeArgs {
    /// Address to listen on (overrides server.bind)
    #[arg(short, long)]
    pub bind: Option<String>,

    /// Serve originals from this directory (overrides origin.root)
    #[arg(long)]
    pub origin_dir: Option<PathBuf>,

    /// Store derived images in this directory (overrides store.root)
    #[arg(long)]
    pub store_dir: Option<PathBuf>,

    /// Transform service base URL (overrides transformer.url)
    #[arg(long)]
    pub transformer_url: Option<String>,
}

/// Arguments for the presets command
#[derive(Parser, Debug)]
pub struct PresetsArgs {
    /// Output format
    #[arg(short, long, default_value = "table")]
    pub format: OutputFormat,
}

/// Arguments for the key command
#[derive(Parser, Debug)]
pub struct KeyArgs {
    /// Asset path, as it appears after /assets/
    pub path: String,

    /// Preset name
    pub preset: String,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Initialize default configuration
    Init {
        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },
}

/// Output format for listings
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON output
    Json,
    /// Simple text (one per line)
    Plain,
}
