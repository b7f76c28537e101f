//! Trigger listener - turns matching push events into runs

use crate::core::{config::WorkflowConfig, run::Run};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

const BRANCH_REF_PREFIX: &str = "refs/heads/";

/// A version-control push event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushEvent {
    /// Pushed ref, either `refs/heads/<branch>` or a bare branch name
    #[serde(rename = "ref")]
    pub git_ref: String,

    /// Commit the ref now points at
    #[serde(rename = "after")]
    pub commit: String,
}

impl PushEvent {
    pub fn new(git_ref: impl Into<String>, commit: impl Into<String>) -> Self {
        Self {
            git_ref: git_ref.into(),
            commit: commit.into(),
        }
    }

    /// Parse a push payload (`{"ref": ..., "after": ...}`); extra fields are ignored
    pub fn from_json(payload: &str) -> serde_json::Result<Self> {
        serde_json::from_str(payload)
    }

    /// Branch name with any `refs/heads/` prefix removed
    pub fn branch(&self) -> &str {
        self.git_ref
            .strip_prefix(BRANCH_REF_PREFIX)
            .unwrap_or(&self.git_ref)
    }

    pub fn is_tag(&self) -> bool {
        self.git_ref.starts_with("refs/tags/")
    }
}

/// Branch filter
#[derive(Debug, Clone)]
pub struct TriggerFilter {
    branches: Vec<String>,
}

impl TriggerFilter {
    pub fn new(branches: Vec<String>) -> Self {
        Self { branches }
    }

    pub fn from_config(config: &WorkflowConfig) -> Self {
        Self::new(config.branches().to_vec())
    }

    /// Exact branch-name equality; tag pushes never match
    pub fn matches(&self, event: &PushEvent) -> bool {
        !event.is_tag() && self.branches.iter().any(|b| b == event.branch())
    }
}

/// Builds a run for every push that passes the filter
#[derive(Debug, Clone)]
pub struct TriggerListener {
    config: WorkflowConfig,
    filter: TriggerFilter,
}

impl TriggerListener {
    pub fn new(config: WorkflowConfig) -> Self {
        let filter = TriggerFilter::from_config(&config);
        Self { config, filter }
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    /// `Some(run)` iff the event's branch is a configured trigger branch
    pub fn on_push(&self, event: &PushEvent) -> anyhow::Result<Option<Run>> {
        if !self.filter.matches(event) {
            debug!(
                "Ignoring push to '{}': not one of {:?}",
                event.git_ref,
                self.config.branches()
            );
            return Ok(None);
        }

        let run = Run::from_config(&self.config, event.branch(), &event.commit)?;
        info!(
            "Push to {} at {} accepted as run {}",
            event.branch(),
            event.commit,
            run.state.run_id
        );
        Ok(Some(run))
    }
}
