//! Command-line interface

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use commands::{ArtifactsCommand, HistoryCommand, ListenCommand, RunCommand, ValidateCommand};
use std::ffi::OsString;
use std::path::PathBuf;

/// The run succeeded (or nothing needed to run)
pub const EXIT_SUCCESS: i32 = 0;
/// A run failed
pub const EXIT_FAILURE: i32 = 1;
/// The workflow file could not be loaded or is invalid
pub const EXIT_CONFIG: i32 = 2;

/// Push-triggered coverage pipeline runner
#[derive(Debug, Parser, Clone)]
#[command(name = "covpipe")]
#[command(version)]
#[command(about = "Runs a coverage workflow for pushed commits", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Directory holding run history, artifacts and caches
    #[arg(long, global = true, env = "COVPIPE_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Print each step's captured output once the step finishes
    #[arg(short, long, global = true)]
    pub stream: bool,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the workflow for one push
    Run(RunCommand),

    /// Read push payloads (one JSON object per line) from stdin and run each
    Listen(ListenCommand),

    /// Validate a workflow file
    Validate(ValidateCommand),

    /// Show run history
    History(HistoryCommand),

    /// List archived artifacts
    Artifacts(ArtifactsCommand),
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }

    /// `--data-dir`, else the platform data directory
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .map(|d| d.join("covpipe"))
                .unwrap_or_else(|| PathBuf::from(".covpipe"))
        })
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.data_dir().join("artifacts")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.data_dir().join("cache")
    }
}
