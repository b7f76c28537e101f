//! covpipe - a push-triggered coverage pipeline runner

pub mod actions;
pub mod artifacts;
pub mod cli;
pub mod core;
pub mod execution;
pub mod persistence;
pub mod provision;

// Re-export commonly used types
pub use actions::{Action, ActionInputs, ActionRegistry, ActionSettings};
pub use artifacts::{ArtifactRecord, ArtifactStore, LocalArtifactStore};
pub use core::{PushEvent, Run, RunContext, RunStatus, Step, StepState, TriggerListener};
pub use execution::{ExecutionEngine, ExecutionEvent, RunError, Runner, StepError, StepExecutor};
pub use provision::Provisioner;
