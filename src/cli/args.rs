//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// wheelvend - binary wheels for sandboxed Python runtimes
///
/// Serves prebuilt wheels from a shared cache, or builds them once in a
/// disposable worker that matches the sandbox ABI.
#[derive(Parser, Debug)]
#[command(name = "wheelvend")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "WHEELVEND_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Get wheels for a set of requirements, building them if needed
    Vend(VendArgs),

    /// Show the orchestrator version
    Version(VersionArgs),

    /// Print the cache fingerprint of a request
    Fingerprint(FingerprintArgs),

    /// Run one build from WHEELVEND_* parameters (inside a worker)
    Worker,

    /// Inspect and clean the build cache
    Cache(CacheArgs),

    /// Show or initialize configuration
    Config(ConfigArgs),
}

/// Arguments for the vend command
#[derive(Parser, Debug)]
pub struct VendArgs {
    /// Runtime selector: 2 (python2.7) or 3 (python3.6)
    pub runtime: String,

    /// Requirement specifiers, e.g. numpy==1.15.0 (also `a/b` or quoted lists)
    #[arg(required = true)]
    pub requirements: Vec<String>,

    /// Extra OS package installed before the build (repeatable)
    #[arg(short, long = "extra", value_name = "PACKAGE")]
    pub extras: Vec<String>,

    /// List platform-specific wheels only
    #[arg(long)]
    pub minimal: bool,

    /// Print the response as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the version command
#[derive(Parser, Debug)]
pub struct VersionArgs {
    /// Print as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the fingerprint command
#[derive(Parser, Debug)]
pub struct FingerprintArgs {
    /// Runtime selector: 2 or 3
    pub runtime: String,

    /// Requirement specifiers
    #[arg(required = true)]
    pub requirements: Vec<String>,

    /// Extra OS package (repeatable)
    #[arg(short, long = "extra", value_name = "PACKAGE")]
    pub extras: Vec<String>,
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

/// Output format for list command
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON output
    Json,
    /// Simple text (one per line)
    Plain,
}

/// Arguments for the cache command
#[derive(Parser, Debug)]
pub struct CacheArgs {
    /// Subcommand for cache
    #[command(subcommand)]
    pub action: CacheAction,
}

/// Cache subcommands
#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// List cached and in-flight builds
    List {
        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Show the state of one fingerprint
    Show {
        /// Fingerprint (32 hex characters)
        fingerprint: String,
    },

    /// Remove build inputs, stale markers and abandoned builds
    Gc {
        /// Dry run - show what would be removed
        #[arg(long)]
        dry_run: bool,
    },
}
