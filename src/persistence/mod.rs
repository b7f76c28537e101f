//! Persistence layer for run history

#[cfg(feature = "sqlite")]
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::SqliteRunStore;

use crate::core::{Run, RunStatus};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Summary of a finished (or abandoned) run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Unique run ID
    pub run_id: Uuid,

    /// Workflow name
    pub workflow: String,

    pub branch: String,

    pub commit: String,

    pub status: RunStatus,

    /// When the run started
    pub started_at: DateTime<Utc>,

    /// When the run reached a terminal status
    pub completed_at: Option<DateTime<Utc>>,

    /// Fraction of steps that ran, 0.0 to 1.0
    pub progress: f64,

    pub succeeded_steps: usize,

    pub failed_steps: usize,

    pub total_steps: usize,

    /// Failure description, secrets masked
    pub error: Option<String>,
}

impl RunSummary {
    /// Summarize a run
    pub fn from_run(run: &Run) -> Self {
        RunSummary {
            run_id: run.state.run_id,
            workflow: run.workflow.clone(),
            branch: run.branch.clone(),
            commit: run.commit.clone(),
            status: run.state.status,
            started_at: run.state.started_at.unwrap_or_else(Utc::now),
            completed_at: run.state.completed_at,
            progress: run.progress(),
            succeeded_steps: run.succeeded_count(),
            failed_steps: run.failed_count(),
            total_steps: run.steps.len(),
            error: run.state.error.clone(),
        }
    }
}

/// Trait for persistence backends
#[async_trait::async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// Save (or replace) a run summary
    async fn save_run(&self, run: &RunSummary) -> Result<()>;

    /// Load a run by ID
    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>>;

    /// Runs of one workflow, newest first
    async fn list_runs(&self, workflow: &str) -> Result<Vec<RunSummary>>;

    /// Newest runs across all workflows
    async fn recent_runs(&self, limit: usize) -> Result<Vec<RunSummary>>;

    /// All workflow names with history
    async fn list_workflows(&self) -> Result<Vec<String>>;
}

/// In-memory persistence (for testing or `--no-history`)
pub struct InMemoryPersistence {
    runs: tokio::sync::RwLock<std::collections::HashMap<Uuid, RunSummary>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self {
            runs: tokio::sync::RwLock::new(std::collections::HashMap::new()),
        }
    }
}

impl Default for InMemoryPersistence {
    fn default() -> Self {
        Self::new()
    }
}

fn newest_first(mut runs: Vec<RunSummary>) -> Vec<RunSummary> {
    runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
    runs
}

#[async_trait::async_trait]
impl PersistenceBackend for InMemoryPersistence {
    async fn save_run(&self, run: &RunSummary) -> Result<()> {
        self.runs.write().await.insert(run.run_id, run.clone());
        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>> {
        Ok(self.runs.read().await.get(&run_id).cloned())
    }

    async fn list_runs(&self, workflow: &str) -> Result<Vec<RunSummary>> {
        let runs = self.runs.read().await;
        Ok(newest_first(
            runs.values().filter(|r| r.workflow == workflow).cloned().collect(),
        ))
    }

    async fn recent_runs(&self, limit: usize) -> Result<Vec<RunSummary>> {
        let runs = self.runs.read().await;
        let mut all = newest_first(runs.values().cloned().collect());
        all.truncate(limit);
        Ok(all)
    }

    async fn list_workflows(&self) -> Result<Vec<String>> {
        let runs = self.runs.read().await;
        let mut names: Vec<String> = runs.values().map(|r| r.workflow.clone()).collect();
        names.sort();
        names.dedup();
        Ok(names)
    }
}
