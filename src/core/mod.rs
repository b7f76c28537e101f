//! Core domain models
//!
//! Workflows, runs, steps, their state, the run context handed to each step
//! and the trigger filter that turns push events into runs.

pub mod config;
pub mod context;
pub mod environment;
pub mod run;
pub mod secrets;
pub mod state;
pub mod step;
pub mod trigger;

pub use context::*;
pub use environment::*;
pub use run::*;
pub use secrets::*;
pub use state::*;
pub use step::*;
pub use trigger::*;
