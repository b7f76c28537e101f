//! Step and run error taxonomy

use crate::core::{InterpolationError, StateError};
use crate::execution::process::ProcessError;
use std::path::PathBuf;
use thiserror::Error;

/// Why a single step failed
#[derive(Debug, Error)]
pub enum StepError {
    #[error("process exited with code {code}")]
    NonZeroExit { code: i32, output: String },

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("unknown action '{0}'")]
    UnknownAction(String),

    #[error("action '{name}' does not support version '{version}' (supported: {supported})")]
    UnsupportedVersion {
        name: String,
        version: String,
        supported: String,
    },

    #[error("missing required input '{0}'")]
    MissingInput(String),

    #[error("expression error: {0}")]
    Interpolation(#[from] InterpolationError),

    #[error("expected file not found: {}", .0.display())]
    MissingArtifact(PathBuf),

    #[error("{0}")]
    Action(String),
}

impl StepError {
    /// Output captured before the failure, if any
    pub fn output(&self) -> &str {
        match self {
            StepError::NonZeroExit { output, .. } => output,
            _ => "",
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, StepError::Process(ProcessError::Cancelled))
    }
}

/// Why a run failed
#[derive(Debug, Error)]
pub enum RunError {
    #[error("provisioning failed: {0}")]
    Provisioning(String),

    #[error("step '{step}' failed: {source}")]
    StepFailed {
        step: String,
        #[source]
        source: StepError,
    },

    #[error("expected file not found: {}", .0.display())]
    MissingArtifact(PathBuf),

    #[error("run was cancelled")]
    Cancelled,

    #[error(transparent)]
    State(#[from] StateError),
}

impl RunError {
    /// Categorize a step failure, surfacing missing artifacts and cancellation directly
    pub fn from_step(step: &str, error: StepError) -> Self {
        match error {
            StepError::MissingArtifact(path) => RunError::MissingArtifact(path),
            e if e.is_cancelled() => RunError::Cancelled,
            source => RunError::StepFailed {
                step: step.to_string(),
                source,
            },
        }
    }
}
