//! Run domain model

use crate::core::{
    config::WorkflowConfig,
    environment::{ServiceContainer, Toolchain},
    state::{RunState, RunStatus, StepState},
    step::Step,
};

/// One execution of a workflow for a pushed commit
#[derive(Debug, Clone)]
pub struct Run {
    /// Workflow name
    pub workflow: String,

    pub branch: String,

    pub commit: String,

    /// Steps in declared order
    pub steps: Vec<Step>,

    pub services: Vec<ServiceContainer>,

    pub toolchains: Vec<Toolchain>,

    /// Names of secrets to load from the environment
    pub secret_names: Vec<String>,

    /// Workflow-level environment
    pub env: std::collections::BTreeMap<String, String>,

    /// Seconds to wait for service ports
    pub readiness_timeout_secs: u64,

    pub state: RunState,
}

impl Run {
    /// Create a pending run from a validated workflow
    pub fn from_config(
        config: &WorkflowConfig,
        branch: impl Into<String>,
        commit: impl Into<String>,
    ) -> anyhow::Result<Self> {
        Ok(Run {
            workflow: config.name.clone(),
            branch: branch.into(),
            commit: commit.into(),
            steps: config.step_list()?,
            services: config.service_containers()?,
            toolchains: config.toolchain_list(),
            secret_names: config.secrets.clone(),
            env: config.env.clone(),
            readiness_timeout_secs: config.readiness_timeout_secs(),
            state: RunState::new(),
        })
    }

    /// A bare run, mainly for tests and embedding
    pub fn new(workflow: impl Into<String>, branch: impl Into<String>, commit: impl Into<String>) -> Self {
        Run {
            workflow: workflow.into(),
            branch: branch.into(),
            commit: commit.into(),
            steps: Vec::new(),
            services: Vec::new(),
            toolchains: Vec::new(),
            secret_names: Vec::new(),
            env: Default::default(),
            readiness_timeout_secs: crate::core::config::DEFAULT_READINESS_TIMEOUT_SECS,
            state: RunState::new(),
        }
    }

    pub fn with_step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_service(mut self, service: ServiceContainer) -> Self {
        self.services.push(service);
        self
    }

    pub fn with_toolchain(mut self, toolchain: Toolchain) -> Self {
        self.toolchains.push(toolchain);
        self
    }

    pub fn status(&self) -> RunStatus {
        self.state.status
    }

    pub fn step(&self, name: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Names of steps that actually ran, in order
    pub fn executed_steps(&self) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|s| s.state.was_executed())
            .map(|s| s.name.as_str())
            .collect()
    }

    pub fn succeeded_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| matches!(s.state, StepState::Succeeded { .. }))
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| matches!(s.state, StepState::Failed { .. }))
            .count()
    }

    /// Fraction of steps in a terminal state (0.0 to 1.0)
    pub fn progress(&self) -> f64 {
        if self.steps.is_empty() {
            return if self.state.status.is_terminal() { 1.0 } else { 0.0 };
        }
        let done = self.steps.iter().filter(|s| s.state.is_terminal()).count();
        done as f64 / self.steps.len() as f64
    }
}
