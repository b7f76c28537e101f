//! Run execution engine

pub mod engine;
pub mod error;
pub mod executor;
pub mod process;
pub mod runner;

pub use engine::{EventHandler, ExecutionEngine, ExecutionEvent};
pub use error::{RunError, StepError};
pub use executor::StepExecutor;
pub use process::{ProcessError, ProcessOutput};
pub use runner::{RunOptions, RunOutcome, Runner};
