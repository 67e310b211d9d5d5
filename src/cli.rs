//! Command-line interface for earshot
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// Always-listening speech recognition sessions
#[derive(Parser, Debug)]
#[command(
    name = "earshot",
    version,
    about = "Always-listening speech recognition sessions"
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Only print final transcripts and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose logging (-v: debug, -vv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a session against a recorded engine script
    Replay {
        /// JSON-lines script, one utterance per line
        script: PathBuf,

        /// Provision the configured model from the models directory
        /// instead of using a placeholder
        #[arg(long)]
        local: bool,

        /// Wake word that arms command routing (repeatable, overrides config)
        #[arg(long = "wake-word", value_name = "WORD")]
        wake_words: Vec<String>,

        /// Give up after this many seconds
        #[arg(long, value_name = "SECONDS", default_value = "30")]
        timeout: u64,
    },

    /// List model assets in the models directory
    Models,

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

/// Configuration actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Print the configuration file path
    Path,
}
