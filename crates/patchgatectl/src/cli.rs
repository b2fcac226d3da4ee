//! Command line definition

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "patchgatectl")]
#[command(about = "Patchgate - safety-gated OS patching for installer media", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Config file (default: /etc/patchgate/config.toml, then ~/.config/patchgate/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the validation mode (compliant, bypass, audit_only)
    #[arg(long, global = true)]
    pub mode: Option<String>,

    /// Debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Machine-readable output
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Assess block devices as write targets
    Assess {
        /// Device paths, e.g. /dev/sdb
        #[arg(required = true)]
        devices: Vec<String>,

        /// Print confirmation prompts for this operation
        #[arg(long)]
        operation: Option<String>,
    },

    /// Score an operation from its risk flags
    Score(ScoreArgs),

    /// List catalog patch sets or validate a catalog file
    Catalog {
        /// Only sets for this OS family
        #[arg(long)]
        os: Option<String>,

        /// Validate a YAML catalog file instead of listing
        #[arg(long)]
        validate: Option<PathBuf>,
    },

    /// Build and review a plan for a machine
    Plan(SystemArgs),

    /// Build a plan and apply it to a mounted target
    Apply {
        #[command(flatten)]
        system: SystemArgs,

        /// Mounted installer media root
        #[arg(long)]
        target: PathBuf,

        /// Log what would happen without touching the target
        #[arg(long)]
        dry_run: bool,

        /// Consent level granted (basic, informed, expert)
        #[arg(long)]
        consent: Option<String>,

        /// Confirmation text for the consent
        #[arg(long, requires = "consent")]
        confirm: Option<String>,
    },

    /// Show recent audit records
    Audit {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Check host tools, privileges and source images
    Preflight {
        /// Source images to check
        files: Vec<PathBuf>,
    },
}

#[derive(Debug, Clone, Args)]
pub struct SystemArgs {
    #[arg(long)]
    pub manufacturer: String,

    #[arg(long)]
    pub model: String,

    #[arg(long, default_value = "x86_64")]
    pub arch: String,

    /// Installed RAM in GB; omit when unknown
    #[arg(long)]
    pub ram_gb: Option<f64>,

    /// OS family (macos, windows, linux)
    #[arg(long)]
    pub os: String,

    #[arg(long)]
    pub os_version: String,

    /// Restrict the plan to these patch set ids
    #[arg(long = "set")]
    pub sets: Vec<String>,
}

#[derive(Debug, Clone, Args)]
pub struct ScoreArgs {
    #[arg(long, default_value = "operation")]
    pub id: String,

    #[arg(long, default_value = "Unnamed operation")]
    pub name: String,

    #[arg(long = "type", default_value = "custom")]
    pub patch_type: String,

    #[arg(long, default_value = "unknown")]
    pub target: String,

    #[arg(long)]
    pub kernel: bool,

    #[arg(long)]
    pub bootloader: bool,

    #[arg(long)]
    pub firmware: bool,

    #[arg(long)]
    pub unsigned: bool,

    #[arg(long)]
    pub disables_security: bool,

    #[arg(long)]
    pub irreversible: bool,
}
