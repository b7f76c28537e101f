//! Step executor - runs a single step against the run context

use crate::{
    actions::{ActionInputs, ActionRegistry},
    core::{RunContext, Step, StepKind},
    execution::{
        process::{run_shell, ProcessError},
        StepError,
    },
};
use std::collections::BTreeMap;
use tokio::time::{timeout, Duration};
use tracing::{debug, info};

/// Executes one step: interpolation, dispatch, output masking
pub struct StepExecutor {
    registry: ActionRegistry,
}

impl StepExecutor {
    pub fn new(registry: ActionRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    /// Execute a step and return its masked output
    pub async fn execute(&self, step: &Step, context: &mut RunContext) -> Result<String, StepError> {
        info!("Executing step: {} ({})", step.name, context.masker.mask(&step.describe()));

        let step_env = interpolate_map(&step.env, context)?;

        let output = match &step.kind {
            StepKind::Command { run } => {
                let script = context.interpolate(run)?;
                debug!("Running: {}", context.masker.mask(&script));

                let result = run_shell(&script, context, &step_env, step.timeout_secs).await?;
                if !result.success() {
                    return Err(StepError::NonZeroExit {
                        code: result.exit_code,
                        output: result.output,
                    });
                }
                result.output
            }
            StepKind::Action { action, inputs } => {
                let resolved = self.registry.resolve(action)?;
                let inputs = ActionInputs::new(interpolate_map(inputs, context)?);

                // Step env is visible to the action's commands only while it runs
                let previous: Vec<(String, Option<String>)> = step_env
                    .into_iter()
                    .map(|(k, v)| {
                        let old = context.env.insert(k.clone(), v);
                        (k, old)
                    })
                    .collect();

                let result = match step.timeout_secs {
                    Some(secs) => timeout(Duration::from_secs(secs), resolved.run(&inputs, context))
                        .await
                        .unwrap_or(Err(StepError::Process(ProcessError::Timeout(secs)))),
                    None => resolved.run(&inputs, context).await,
                };

                for (key, old) in previous {
                    match old {
                        Some(value) => context.env.insert(key, value),
                        None => context.env.remove(&key),
                    };
                }
                result?
            }
        };

        Ok(context.masker.mask(&output))
    }
}

fn interpolate_map(
    values: &BTreeMap<String, String>,
    context: &RunContext,
) -> Result<BTreeMap<String, String>, StepError> {
    values
        .iter()
        .map(|(k, v)| Ok((k.clone(), context.interpolate(v)?)))
        .collect()
}
