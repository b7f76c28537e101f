//! CLI command definitions

use clap::{ArgGroup, Args};
use std::path::PathBuf;

/// Default workflow file name
pub const DEFAULT_WORKFLOW_FILE: &str = "covpipe.yml";

/// Run the workflow for one push
#[derive(Debug, Args, Clone)]
#[command(group(ArgGroup::new("trigger").required(true).args(["branch", "event"])))]
pub struct RunCommand {
    /// Path to workflow YAML file
    #[arg(short, long, default_value = DEFAULT_WORKFLOW_FILE)]
    pub file: PathBuf,

    /// Pushed branch (or full ref such as refs/heads/master)
    #[arg(long, requires = "commit")]
    pub branch: Option<String>,

    /// Pushed commit SHA
    #[arg(long, requires = "branch")]
    pub commit: Option<String>,

    /// GitHub-style push payload JSON (`ref` and `after` fields)
    #[arg(long, conflicts_with_all = ["branch", "commit"])]
    pub event: Option<PathBuf>,

    #[command(flatten)]
    pub options: ExecutionArgs,
}

/// Read push payloads from stdin, one JSON object per line
#[derive(Debug, Args, Clone)]
pub struct ListenCommand {
    /// Path to workflow YAML file
    #[arg(short, long, default_value = DEFAULT_WORKFLOW_FILE)]
    pub file: PathBuf,

    #[command(flatten)]
    pub options: ExecutionArgs,
}

/// Options shared by `run` and `listen`
#[derive(Debug, Args, Clone)]
pub struct ExecutionArgs {
    /// Repository to check out (URL or path); defaults to the current directory
    #[arg(long)]
    pub repo: Option<String>,

    /// Keep the run workspace after the run
    #[arg(long)]
    pub keep_workspace: bool,

    /// Don't save runs to history
    #[arg(long)]
    pub no_history: bool,

    /// Coverage upload endpoint
    #[arg(long, env = "COVPIPE_UPLOAD_URL")]
    pub upload_url: Option<String>,
}

/// Validate a workflow file
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to workflow YAML file
    #[arg(short, long, default_value = DEFAULT_WORKFLOW_FILE)]
    pub file: PathBuf,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show run history
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Workflow name to filter by
    #[arg(short, long)]
    pub workflow: Option<String>,

    /// Number of recent runs to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Show a single run
    #[arg(long)]
    pub run_id: Option<String>,

    /// List the workflows that have history instead of runs
    #[arg(long, conflicts_with_all = ["workflow", "run_id"])]
    pub workflows: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// List archived artifacts
#[derive(Debug, Args, Clone)]
pub struct ArtifactsCommand {
    /// Artifact name to filter by
    #[arg(short, long)]
    pub name: Option<String>,

    /// Only artifacts of this run
    #[arg(long)]
    pub run_id: Option<String>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}
