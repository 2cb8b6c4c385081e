use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "fleet-metrics", version, about = "Fleet metrics collector")]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml", global = true)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start the collector and its HTTP API (default)
    Start,

    /// Configuration management commands
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },

    /// Read stored metrics without a running server
    Query {
        #[command(subcommand)]
        action: QueryCommands,
    },

    /// Inspect or change per-application sync flags
    Sync {
        #[command(subcommand)]
        action: SyncCommands,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigCommands {
    /// Display the effective configuration
    Show,

    /// Validate configuration file
    Validate,
}

#[derive(Subcommand, Debug, Clone)]
pub enum QueryCommands {
    /// Metric names stored for a pod
    Names { application: String, pod: String },

    /// Tables in an application's store
    Tables { application: String },

    /// Retained values of one metric for a pod
    Detail {
        application: String,
        pod: String,
        metric: String,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum SyncCommands {
    /// Enable polling for an application (or `all`)
    On { application: String },

    /// Disable polling for an application (or `all`)
    Off { application: String },

    /// Show sync flags
    Status {
        /// Only this application
        application: Option<String>,
    },
}

impl Cli {
    /// Get the command to execute, defaulting to Start if none provided
    pub fn get_command(&self) -> Commands {
        self.command.clone().unwrap_or(Commands::Start)
    }
}
