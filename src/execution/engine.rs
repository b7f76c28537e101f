//! Main execution engine - orchestrates an entire run

use crate::{
    core::{Run, RunContext, RunStatus, StepState},
    execution::{RunError, StepExecutor},
    provision::Provisioner,
};
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Events that can occur during a run
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    RunStarted {
        run_id: Uuid,
        workflow: String,
        branch: String,
        commit: String,
        total_steps: usize,
    },
    Provisioned {
        services: Vec<String>,
        toolchains: Vec<String>,
    },
    StepStarted {
        step: String,
        index: usize,
        total: usize,
    },
    StepOutput {
        step: String,
        output: String,
    },
    StepSucceeded {
        step: String,
    },
    StepFailed {
        step: String,
        error: String,
        continue_on_error: bool,
    },
    StepSkipped {
        step: String,
        reason: String,
    },
    RunCompleted {
        run_id: Uuid,
        status: RunStatus,
        error: Option<String>,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

/// Runs provisioning, steps, post-run hooks and teardown for one run at a time
pub struct ExecutionEngine {
    executor: Arc<StepExecutor>,
    provisioner: Provisioner,
    event_handlers: Arc<Mutex<Vec<EventHandler>>>,
}

impl ExecutionEngine {
    pub fn new(executor: StepExecutor, provisioner: Provisioner) -> Self {
        Self {
            executor: Arc::new(executor),
            provisioner,
            event_handlers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Add an event handler
    pub fn add_event_handler<F>(&self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        self.event_handlers.lock().push(Arc::new(handler));
    }

    /// Emit an event to all handlers
    fn emit_event(&self, event: ExecutionEvent) {
        let handlers = self.event_handlers.lock().clone();
        for handler in handlers.iter() {
            handler(event.clone());
        }
    }

    /// Execute the entire run
    ///
    /// Steps run in declared order and the first failing step halts the run
    /// unless it is marked `continue_on_error`; every later step is skipped.
    /// Services are stopped whatever the outcome.
    pub async fn execute(&self, run: &mut Run, context: &mut RunContext) -> Result<(), RunError> {
        let run_id = context.run_id;
        run.state.run_id = run_id;
        run.state.start()?;

        info!(
            "Starting run {} of '{}' for {}@{}",
            run_id, run.workflow, run.branch, run.commit
        );
        self.emit_event(ExecutionEvent::RunStarted {
            run_id,
            workflow: run.workflow.clone(),
            branch: run.branch.clone(),
            commit: run.commit.clone(),
            total_steps: run.steps.len(),
        });

        let outcome = self.execute_provisioned(run, context).await;
        self.finish(run, context, outcome)
    }

    async fn execute_provisioned(&self, run: &mut Run, context: &mut RunContext) -> Result<(), RunError> {
        for (key, value) in &run.env {
            let value = context
                .interpolate(value)
                .map_err(|e| RunError::Provisioning(format!("env {}: {}", key, e)))?;
            context.set_env(key.clone(), value);
        }

        let environment = match self.provisioner.provision(run, context).await {
            Ok(environment) => environment,
            Err(e) => {
                let error: RunError = e.into();
                self.skip_remaining(run, 0, "provisioning failed");
                return Err(error);
            }
        };
        self.emit_event(ExecutionEvent::Provisioned {
            services: environment.containers.iter().map(|c| c.service.clone()).collect(),
            toolchains: environment.toolchains.clone(),
        });

        let outcome = self.execute_steps(run, context).await;
        if outcome.is_ok() {
            self.run_post_hooks(context).await;
        }

        self.provisioner.teardown(&environment, context).await;
        outcome
    }

    async fn execute_steps(&self, run: &mut Run, context: &mut RunContext) -> Result<(), RunError> {
        let total = run.steps.len();

        for index in 0..total {
            if context.cancel.is_cancelled() {
                self.skip_remaining(run, index, "run was cancelled");
                return Err(RunError::Cancelled);
            }

            let name = run.steps[index].name.clone();
            let started_at = Utc::now();
            run.steps[index].state = StepState::Running { started_at };
            self.emit_event(ExecutionEvent::StepStarted {
                step: name.clone(),
                index,
                total,
            });

            let result = self.executor.execute(&run.steps[index], context).await;
            let step = &mut run.steps[index];

            match result {
                Ok(output) => {
                    if !output.is_empty() {
                        self.emit_event(ExecutionEvent::StepOutput {
                            step: name.clone(),
                            output: output.clone(),
                        });
                    }
                    step.state = StepState::Succeeded {
                        output,
                        started_at,
                        completed_at: Utc::now(),
                    };
                    self.emit_event(ExecutionEvent::StepSucceeded { step: name });
                }
                Err(e) => {
                    let message = context.masker.mask(&e.to_string());
                    let output = context.masker.mask(e.output());
                    let tolerated = step.continue_on_error && !e.is_cancelled();

                    if !output.is_empty() {
                        self.emit_event(ExecutionEvent::StepOutput {
                            step: name.clone(),
                            output: output.clone(),
                        });
                    }
                    step.state = StepState::Failed {
                        error: message.clone(),
                        output,
                        started_at,
                        failed_at: Utc::now(),
                    };
                    self.emit_event(ExecutionEvent::StepFailed {
                        step: name.clone(),
                        error: message.clone(),
                        continue_on_error: tolerated,
                    });

                    if tolerated {
                        warn!("Step {} failed but continues on error: {}", name, message);
                        continue;
                    }

                    error!("Step {} failed: {}", name, message);
                    self.skip_remaining(run, index + 1, &format!("step '{}' failed", name));
                    return Err(RunError::from_step(&name, e));
                }
            }
        }

        Ok(())
    }

    async fn run_post_hooks(&self, context: &RunContext) {
        for hook in context.post_run_hooks() {
            info!("Post-run: {}", hook.describe());
            if let Err(e) = hook.run(context).await {
                warn!("Post-run '{}' failed: {:#}", hook.describe(), e);
            }
        }
    }

    fn skip_remaining(&self, run: &mut Run, from: usize, reason: &str) {
        for step in run.steps.iter_mut().skip(from) {
            if step.state.is_terminal() {
                continue;
            }
            step.state = StepState::Skipped {
                reason: reason.to_string(),
            };
            self.emit_event(ExecutionEvent::StepSkipped {
                step: step.name.clone(),
                reason: reason.to_string(),
            });
        }
    }

    fn finish(
        &self,
        run: &mut Run,
        context: &RunContext,
        outcome: Result<(), RunError>,
    ) -> Result<(), RunError> {
        let error = outcome.as_ref().err().map(|e| context.masker.mask(&e.to_string()));

        match &error {
            None => run.state.succeed()?,
            Some(message) => run.state.fail(message.clone())?,
        }

        let status = run.state.status;
        info!("Run {} finished: {}", context.run_id, status.as_str());
        self.emit_event(ExecutionEvent::RunCompleted {
            run_id: context.run_id,
            status,
            error,
        });

        outcome
    }
}
