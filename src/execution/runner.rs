//! Push-to-run glue: trigger filter, workspace, context, engine and history

use crate::{
    core::{PushEvent, Run, RunContext, SecretStore, TriggerListener},
    execution::{ExecutionEngine, RunError},
    persistence::{PersistenceBackend, RunSummary},
    provision::Workspace,
};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Per-run settings that do not come from the workflow file
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Repository cloned by `checkout` when the step does not name one
    pub repository: Option<String>,

    /// Leave the workspace on disk after the run
    pub keep_workspace: bool,
}

/// A finished run and how it ended
#[derive(Debug)]
pub struct RunOutcome {
    pub run: Run,
    pub result: Result<(), RunError>,
    pub summary: RunSummary,
}

impl RunOutcome {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }
}

/// Turns push events into executed runs
pub struct Runner {
    listener: TriggerListener,
    engine: Arc<ExecutionEngine>,
    history: Arc<dyn PersistenceBackend>,
    options: RunOptions,
    cancel: CancellationToken,
}

impl Runner {
    pub fn new(
        listener: TriggerListener,
        engine: Arc<ExecutionEngine>,
        history: Arc<dyn PersistenceBackend>,
        options: RunOptions,
    ) -> Self {
        Self {
            listener,
            engine,
            history,
            options,
            cancel: CancellationToken::new(),
        }
    }

    /// Token cancelling the current and every later run
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn engine(&self) -> &ExecutionEngine {
        &self.engine
    }

    /// Run the workflow for `event`; `None` when the branch is not a trigger branch
    pub async fn handle_push(&self, event: &PushEvent) -> Result<Option<RunOutcome>> {
        let Some(mut run) = self.listener.on_push(event)? else {
            return Ok(None);
        };

        let run_id = run.state.run_id;
        let workspace = Workspace::create(&run_id.simple().to_string()[..8], self.options.keep_workspace)
            .context("Failed to create workspace")?;

        let secrets = SecretStore::from_env(&run.secret_names);
        for name in &run.secret_names {
            if secrets.get(name).is_none() {
                warn!("Secret {} is not set in the environment", name);
            }
        }

        let mut context = RunContext::new(
            run_id,
            run.workflow.clone(),
            run.branch.clone(),
            run.commit.clone(),
            workspace.path(),
            secrets,
        );
        context.repository = self.options.repository.clone();
        context.cancel = self.cancel.child_token();

        let result = self.engine.execute(&mut run, &mut context).await;

        let summary = RunSummary::from_run(&run);
        if let Err(e) = self.history.save_run(&summary).await {
            warn!("Failed to save run {} to history: {:#}", run_id, e);
        }

        if workspace.is_kept() {
            info!("Workspace kept at {}", workspace.path().display());
        }
        drop(workspace);

        Ok(Some(RunOutcome { run, result, summary }))
    }
}
