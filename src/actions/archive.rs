//! `archive` - retain workspace files as a named artifact

use crate::actions::{Action, ActionInputs};
use crate::artifacts::{ArchiveRequest, ArtifactStore};
use crate::core::RunContext;
use crate::execution::StepError;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

const INVALID_NAME_CHARS: &[char] = &['\\', '/', '"', ':', '<', '>', '|', '*', '?'];

pub fn validate_artifact_name(name: &str) -> Result<(), StepError> {
    if name.trim().is_empty() {
        return Err(StepError::MissingInput("name".to_string()));
    }
    if name.contains(INVALID_NAME_CHARS) {
        return Err(StepError::Action(format!(
            "artifact name '{}' is not valid. It cannot contain '\\', '/', '\"', ':', '<', '>', '|', '*', and '?'",
            name
        )));
    }
    Ok(())
}

pub struct ArchiveAction {
    store: Arc<dyn ArtifactStore>,
}

impl ArchiveAction {
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Action for ArchiveAction {
    fn name(&self) -> &str {
        "archive"
    }

    fn versions(&self) -> &[&str] {
        &["v1"]
    }

    async fn run(&self, inputs: &ActionInputs, context: &mut RunContext) -> Result<String, StepError> {
        let name = inputs.require("name")?;
        validate_artifact_name(name)?;

        let entries = inputs.list("path");
        if entries.is_empty() {
            return Err(StepError::MissingInput("path".to_string()));
        }

        let mut paths = Vec::with_capacity(entries.len());
        for entry in &entries {
            let path = context.resolve(entry);
            if !path.exists() {
                return Err(StepError::MissingArtifact(path));
            }
            paths.push(path);
        }

        let record = self
            .store
            .archive(ArchiveRequest {
                name: name.to_string(),
                run_id: context.run_id,
                workflow: context.workflow.clone(),
                branch: context.branch.clone(),
                commit: context.commit.clone(),
                base_dir: context.workspace().to_path_buf(),
                paths,
            })
            .await
            .map_err(|e| StepError::Action(format!("failed to archive '{}': {:#}", name, e)))?;

        info!("Archived {} file(s) as '{}'", record.files.len(), record.name);
        Ok(format!(
            "Archived {} file(s) as '{}' (id {})\n",
            record.files.len(),
            record.name,
            record.id
        ))
    }
}
