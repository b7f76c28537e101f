//! Workflow configuration from YAML

use crate::core::{
    context::references,
    environment::{PortMapping, ServiceContainer, Toolchain},
    step::{ActionRef, Step},
};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

/// Default time allowed for service ports to accept connections
pub const DEFAULT_READINESS_TIMEOUT_SECS: u64 = 60;

/// Top-level workflow configuration loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Workflow name
    pub name: String,

    /// Trigger definition
    #[serde(rename = "on")]
    pub trigger: TriggerConfig,

    /// Auxiliary service containers keyed by service name
    #[serde(default)]
    pub services: BTreeMap<String, ServiceConfig>,

    /// Names of secrets read from the ambient environment
    #[serde(default)]
    pub secrets: Vec<String>,

    /// Environment shared by every step
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Toolchains installed before any step runs
    #[serde(default)]
    pub toolchains: Vec<ToolchainConfig>,

    /// Ordered steps
    pub steps: Vec<StepConfig>,

    /// Seconds to wait for service ports
    #[serde(default)]
    pub readiness_timeout_secs: Option<u64>,
}

/// `on:` block
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerConfig {
    pub push: PushTriggerConfig,
}

/// `on.push:` block
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushTriggerConfig {
    /// Branch names that start a run
    pub branches: Vec<String>,
}

/// Service container configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub image: String,

    /// `host:container` or `port`
    #[serde(default)]
    pub ports: Vec<String>,

    /// Entrypoint override
    #[serde(default)]
    pub entrypoint: Option<String>,

    /// Extra container options, whitespace separated
    #[serde(default)]
    pub options: Option<String>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// Toolchain configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolchainConfig {
    pub name: String,

    pub version: String,

    #[serde(default)]
    pub components: Vec<String>,

    /// Install command overriding the built-in recipe
    #[serde(default)]
    pub install: Option<String>,

    /// Version check command
    #[serde(default)]
    pub check: Option<String>,

    /// Directory added to PATH
    #[serde(default)]
    pub bin_dir: Option<String>,
}

/// Step configuration as defined in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepConfig {
    /// Step name, unique within the workflow
    pub name: String,

    /// Action reference (`name@version`)
    #[serde(default)]
    pub uses: Option<String>,

    /// Action inputs
    #[serde(default)]
    with: BTreeMap<String, Value>,

    /// Shell command
    #[serde(default)]
    pub run: Option<String>,

    /// Keep going when this step fails
    #[serde(default, alias = "continue-on-error")]
    pub continue_on_error: bool,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl StepConfig {
    /// Inputs as strings; scalars are rendered, lists joined by newlines
    pub fn inputs(&self) -> BTreeMap<String, String> {
        self.with
            .iter()
            .map(|(key, value)| (key.clone(), render_value(value)))
            .collect()
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Null => String::new(),
        Value::Sequence(items) => items
            .iter()
            .map(render_value)
            .collect::<Vec<_>>()
            .join("\n"),
        other => serde_yaml::to_string(other)
            .unwrap_or_default()
            .trim_end()
            .to_string(),
    }
}

impl WorkflowConfig {
    /// Load workflow configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse workflow configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: WorkflowConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the workflow configuration
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            anyhow::bail!("Workflow name must not be empty");
        }

        if self.trigger.push.branches.is_empty() {
            anyhow::bail!("on.push.branches must list at least one branch");
        }

        let mut seen_names = HashSet::new();
        for step in &self.steps {
            if step.name.trim().is_empty() {
                anyhow::bail!("Every step needs a name");
            }
            if !seen_names.insert(&step.name) {
                anyhow::bail!("Duplicate step name: {}", step.name);
            }

            match (&step.uses, &step.run) {
                (Some(uses), None) => {
                    uses.parse::<ActionRef>().map_err(|e| anyhow::anyhow!(e))?;
                }
                (None, Some(_)) => {
                    if !step.with.is_empty() {
                        anyhow::bail!("Step '{}' sets 'with' on a 'run' step", step.name);
                    }
                }
                (Some(_), Some(_)) => {
                    anyhow::bail!("Step '{}' sets both 'uses' and 'run'", step.name)
                }
                (None, None) => {
                    anyhow::bail!("Step '{}' needs either 'uses' or 'run'", step.name)
                }
            }
        }

        for (name, service) in &self.services {
            if service.image.trim().is_empty() {
                anyhow::bail!("Service '{}' has no image", name);
            }
            for port in &service.ports {
                port.parse::<PortMapping>()
                    .map_err(|e| anyhow::anyhow!("Service '{}': {}", name, e))?;
            }
        }

        for toolchain in &self.toolchains {
            if toolchain.version.trim().is_empty() {
                anyhow::bail!("Toolchain '{}' has no pinned version", toolchain.name);
            }
        }

        // Secrets must be declared so they are loaded into the run context
        let declared: HashSet<&str> = self.secrets.iter().map(String::as_str).collect();
        for (key, value) in &self.env {
            for (scope, name) in references(value) {
                if scope == "secrets" && !declared.contains(name.as_str()) {
                    anyhow::bail!("Workflow env '{}' references undeclared secret '{}'", key, name);
                }
            }
        }
        for step in &self.steps {
            let texts = step
                .run
                .iter()
                .cloned()
                .chain(step.inputs().into_values())
                .chain(step.env.values().cloned());
            for text in texts {
                for (scope, name) in references(&text) {
                    if scope == "secrets" && !declared.contains(name.as_str()) {
                        anyhow::bail!(
                            "Step '{}' references undeclared secret '{}'",
                            step.name,
                            name
                        );
                    }
                }
            }
        }

        Ok(())
    }

    pub fn readiness_timeout_secs(&self) -> u64 {
        self.readiness_timeout_secs
            .unwrap_or(DEFAULT_READINESS_TIMEOUT_SECS)
    }

    pub fn branches(&self) -> &[String] {
        &self.trigger.push.branches
    }

    /// Service containers in name order
    pub fn service_containers(&self) -> Result<Vec<ServiceContainer>> {
        self.services
            .iter()
            .map(|(name, service)| {
                let ports = service
                    .ports
                    .iter()
                    .map(|p| p.parse::<PortMapping>())
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(|e| anyhow::anyhow!("Service '{}': {}", name, e))?;

                Ok(ServiceContainer {
                    name: name.clone(),
                    image: service.image.clone(),
                    ports,
                    entrypoint: service.entrypoint.clone(),
                    options: service
                        .options
                        .as_deref()
                        .unwrap_or_default()
                        .split_whitespace()
                        .map(str::to_string)
                        .collect(),
                    env: service.env.clone(),
                })
            })
            .collect()
    }

    pub fn toolchain_list(&self) -> Vec<Toolchain> {
        self.toolchains
            .iter()
            .map(|t| Toolchain {
                name: t.name.clone(),
                version: t.version.clone(),
                components: t.components.clone(),
                install: t.install.clone(),
                check: t.check.clone(),
                bin_dir: t.bin_dir.clone(),
            })
            .collect()
    }

    pub fn step_list(&self) -> Result<Vec<Step>> {
        self.steps
            .iter()
            .map(|s| Step::from_config(s).map_err(|e| anyhow::anyhow!(e)))
            .collect()
    }
}
