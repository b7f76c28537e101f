//! Reusable actions invoked by `uses: name@version` steps

pub mod archive;
pub mod cache;
pub mod checkout;
pub mod coverage;
pub mod files;
pub mod upload;

use crate::artifacts::ArtifactStore;
use crate::core::{ActionRef, RunContext};
use crate::execution::{process::ProcessOutput, StepError};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

pub use archive::ArchiveAction;
pub use cache::{CacheAction, CacheStore};
pub use checkout::CheckoutAction;
pub use coverage::{CoverageAction, CoverageSummary, REPORT_FILE};
pub use upload::{UploadAction, DEFAULT_UPLOAD_URL};

/// A reusable unit of work resolved by name and version
#[async_trait]
pub trait Action: Send + Sync {
    fn name(&self) -> &str;

    /// Versions this implementation answers to
    fn versions(&self) -> &[&str];

    /// Run the action; the returned string is the step's (masked) output
    async fn run(&self, inputs: &ActionInputs, context: &mut RunContext) -> Result<String, StepError>;
}

/// Interpolated `with:` mapping of a step
#[derive(Debug, Clone, Default)]
pub struct ActionInputs {
    values: BTreeMap<String, String>,
}

impl ActionInputs {
    pub fn new(values: BTreeMap<String, String>) -> Self {
        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    pub fn require(&self, key: &str) -> Result<&str, StepError> {
        self.get(key)
            .ok_or_else(|| StepError::MissingInput(key.to_string()))
    }

    /// Multi-value input split on newlines and commas
    pub fn list(&self, key: &str) -> Vec<String> {
        self.get(key).map(files::split_list).unwrap_or_default()
    }

    pub fn get_u64(&self, key: &str) -> Result<Option<u64>, StepError> {
        match self.get(key) {
            None => Ok(None),
            Some(v) => v
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| StepError::Action(format!("input '{}' must be a number, got '{}'", key, v))),
        }
    }
}

/// Turn a finished process into step output, failing on non-zero exit
pub(crate) fn expect_success(output: ProcessOutput) -> Result<String, StepError> {
    if output.success() {
        Ok(output.output)
    } else {
        Err(StepError::NonZeroExit {
            code: output.exit_code,
            output: output.output,
        })
    }
}

/// Shared services for the built-in actions
#[derive(Clone)]
pub struct ActionSettings {
    pub artifact_store: Arc<dyn ArtifactStore>,
    pub cache_dir: PathBuf,
    pub upload_url: String,
}

/// Registry resolving action references
#[derive(Clone, Default)]
pub struct ActionRegistry {
    actions: HashMap<String, Arc<dyn Action>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding checkout, cache, coverage, upload and archive
    pub fn with_builtins(settings: &ActionSettings) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(CheckoutAction));
        registry.register(Arc::new(CacheAction::new(CacheStore::new(&settings.cache_dir))));
        registry.register(Arc::new(CoverageAction::default()));
        registry.register(Arc::new(UploadAction::new(settings.upload_url.clone())));
        registry.register(Arc::new(ArchiveAction::new(settings.artifact_store.clone())));
        registry
    }

    /// Register an action, replacing any previous one with the same name
    pub fn register(&mut self, action: Arc<dyn Action>) {
        self.actions.insert(action.name().to_string(), action);
    }

    pub fn resolve(&self, reference: &ActionRef) -> Result<Arc<dyn Action>, StepError> {
        let action = self
            .actions
            .get(&reference.name)
            .ok_or_else(|| StepError::UnknownAction(reference.name.clone()))?;

        if !action.versions().contains(&reference.version.as_str()) {
            return Err(StepError::UnsupportedVersion {
                name: reference.name.clone(),
                version: reference.version.clone(),
                supported: action.versions().join(", "),
            });
        }

        Ok(action.clone())
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.actions.keys().map(String::as_str).collect();
        names.sort();
        names
    }
}
