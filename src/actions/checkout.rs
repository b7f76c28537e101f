//! `checkout` - materialise the pushed commit in the workspace

use crate::actions::{expect_success, Action, ActionInputs};
use crate::core::RunContext;
use crate::execution::{process::run_program, StepError};
use async_trait::async_trait;
use tracing::info;

pub struct CheckoutAction;

#[async_trait]
impl Action for CheckoutAction {
    fn name(&self) -> &str {
        "checkout"
    }

    fn versions(&self) -> &[&str] {
        &["v3", "v4"]
    }

    async fn run(&self, inputs: &ActionInputs, context: &mut RunContext) -> Result<String, StepError> {
        let repository = inputs
            .get("repository")
            .map(str::to_string)
            .or_else(|| context.repository.clone())
            .ok_or_else(|| StepError::MissingInput("repository".to_string()))?;
        let timeout = inputs.get_u64("timeout")?;

        info!("Checking out {} at {}", repository, context.commit);

        let mut output = expect_success(
            run_program(
                "git",
                ["clone", "--quiet", "--no-checkout", repository.as_str(), "."],
                context,
                timeout,
            )
            .await?,
        )?;

        output.push_str(&expect_success(
            run_program(
                "git",
                ["checkout", "--quiet", "--detach", context.commit.as_str()],
                context,
                timeout,
            )
            .await?,
        )?);

        Ok(output)
    }
}
