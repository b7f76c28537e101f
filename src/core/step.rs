//! Step domain model

use crate::core::{config::StepConfig, state::StepState};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Reference to a reusable action, written `name@version`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ActionRef {
    pub name: String,
    pub version: String,
}

impl FromStr for ActionRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, version) = s
            .trim()
            .rsplit_once('@')
            .ok_or_else(|| format!("Action reference '{}' is missing '@version'", s))?;

        if name.is_empty() || version.is_empty() {
            return Err(format!("Invalid action reference '{}'", s));
        }

        Ok(ActionRef {
            name: name.to_string(),
            version: version.to_string(),
        })
    }
}

impl fmt::Display for ActionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

/// What a step executes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepKind {
    /// A registered action invoked with an input mapping
    Action {
        action: ActionRef,
        inputs: BTreeMap<String, String>,
    },
    /// A shell command
    Command { run: String },
}

/// A single step in a run
#[derive(Debug, Clone)]
pub struct Step {
    pub name: String,

    pub kind: StepKind,

    /// Best-effort: a failure is recorded but does not halt the run
    pub continue_on_error: bool,

    /// Extra environment for this step only
    pub env: BTreeMap<String, String>,

    /// Timeout in seconds, `None` for unbounded
    pub timeout_secs: Option<u64>,

    /// Runtime state
    pub state: StepState,
}

impl Step {
    pub fn command(name: impl Into<String>, run: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: StepKind::Command { run: run.into() },
            continue_on_error: false,
            env: BTreeMap::new(),
            timeout_secs: None,
            state: StepState::Pending,
        }
    }

    pub fn action(name: impl Into<String>, action: ActionRef) -> Self {
        Self {
            name: name.into(),
            kind: StepKind::Action {
                action,
                inputs: BTreeMap::new(),
            },
            continue_on_error: false,
            env: BTreeMap::new(),
            timeout_secs: None,
            state: StepState::Pending,
        }
    }

    pub fn with_input(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        if let StepKind::Action { inputs, .. } = &mut self.kind {
            inputs.insert(key.into(), value.into());
        }
        self
    }

    pub fn best_effort(mut self) -> Self {
        self.continue_on_error = true;
        self
    }

    /// Build a step from a validated step config
    pub fn from_config(config: &StepConfig) -> Result<Self, String> {
        let kind = match (&config.uses, &config.run) {
            (Some(uses), None) => StepKind::Action {
                action: uses.parse()?,
                inputs: config.inputs(),
            },
            (None, Some(run)) => StepKind::Command { run: run.clone() },
            _ => {
                return Err(format!(
                    "Step '{}' must set exactly one of 'uses' or 'run'",
                    config.name
                ))
            }
        };

        Ok(Step {
            name: config.name.clone(),
            kind,
            continue_on_error: config.continue_on_error,
            env: config.env.clone(),
            timeout_secs: config.timeout_secs,
            state: StepState::Pending,
        })
    }

    /// Short label for logs: the action reference or the first command line
    pub fn describe(&self) -> String {
        match &self.kind {
            StepKind::Action { action, .. } => action.to_string(),
            StepKind::Command { run } => {
                let first = run.lines().next().unwrap_or_default().trim();
                format!("run: {}", first)
            }
        }
    }
}
