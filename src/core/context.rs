//! Run context - explicit ambient state handed to every step

use crate::core::secrets::{SecretMasker, SecretStore};
use async_trait::async_trait;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Failure to resolve a `${{ scope.name }}` expression
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InterpolationError {
    #[error("unknown expression scope '{0}'")]
    UnknownScope(String),

    #[error("'{scope}.{name}' is not defined")]
    Missing { scope: String, name: String },
}

/// Work deferred until every step has succeeded (e.g. saving a cache)
#[async_trait]
pub trait PostRunHook: Send + Sync {
    fn describe(&self) -> String;

    async fn run(&self, context: &RunContext) -> anyhow::Result<()>;
}

fn expression_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\$\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\.([A-Za-z0-9_\-]+)\s*\}\}")
            .expect("expression pattern is valid")
    })
}

/// Every `(scope, name)` pair referenced by `${{ scope.name }}` in `text`
pub fn references(text: &str) -> Vec<(String, String)> {
    expression_regex()
        .captures_iter(text)
        .map(|c| (c[1].to_string(), c[2].to_string()))
        .collect()
}

/// Execution context for one run
///
/// Secrets, environment, workspace and cache hooks live here instead of
/// being looked up from the process environment inside steps.
#[derive(Clone)]
pub struct RunContext {
    pub run_id: Uuid,
    pub workflow: String,
    pub branch: String,
    pub commit: String,

    /// Checkout root and working directory of every command
    pub workspace: PathBuf,

    /// Source repository for the checkout action
    pub repository: Option<String>,

    /// Environment passed to every command
    pub env: BTreeMap<String, String>,

    /// Directories prepended to PATH (installed toolchains)
    pub path_dirs: Vec<PathBuf>,

    pub secrets: SecretStore,
    pub masker: SecretMasker,

    /// Toolchain `name@version` pins, used to derive cache keys
    pub toolchain_pins: Vec<String>,

    pub cancel: CancellationToken,

    post_run: Vec<Arc<dyn PostRunHook>>,
}

impl RunContext {
    pub fn new(
        run_id: Uuid,
        workflow: impl Into<String>,
        branch: impl Into<String>,
        commit: impl Into<String>,
        workspace: impl Into<PathBuf>,
        secrets: SecretStore,
    ) -> Self {
        let masker = SecretMasker::from_store(&secrets);
        Self {
            run_id,
            workflow: workflow.into(),
            branch: branch.into(),
            commit: commit.into(),
            workspace: workspace.into(),
            repository: None,
            env: BTreeMap::new(),
            path_dirs: Vec::new(),
            secrets,
            masker,
            toolchain_pins: Vec::new(),
            cancel: CancellationToken::new(),
            post_run: Vec::new(),
        }
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// Resolve a path relative to the workspace
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.workspace.join(path)
        }
    }

    pub fn set_env(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.env.insert(key.into(), value.into());
    }

    pub fn add_path_dir(&mut self, dir: impl Into<PathBuf>) {
        let dir = dir.into();
        if !self.path_dirs.contains(&dir) {
            self.path_dirs.push(dir);
        }
    }

    pub fn register_post_run(&mut self, hook: Arc<dyn PostRunHook>) {
        self.post_run.push(hook);
    }

    pub fn post_run_hooks(&self) -> &[Arc<dyn PostRunHook>] {
        &self.post_run
    }

    /// Full environment for a child process, including run metadata and PATH
    pub fn command_env(&self, step_env: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        let mut env = self.env.clone();
        env.insert("CI".to_string(), "true".to_string());
        env.insert("COVPIPE_RUN_ID".to_string(), self.run_id.to_string());
        env.insert("COVPIPE_BRANCH".to_string(), self.branch.clone());
        env.insert("COVPIPE_COMMIT".to_string(), self.commit.clone());
        env.insert(
            "COVPIPE_WORKSPACE".to_string(),
            self.workspace.display().to_string(),
        );
        env.extend(step_env.iter().map(|(k, v)| (k.clone(), v.clone())));

        if !self.path_dirs.is_empty() {
            let inherited = std::env::var_os("PATH").unwrap_or_default();
            let dirs = self
                .path_dirs
                .iter()
                .cloned()
                .chain(std::env::split_paths(&inherited));
            if let Ok(joined) = std::env::join_paths(dirs) {
                env.insert("PATH".to_string(), joined.to_string_lossy().into_owned());
            }
        }

        env
    }

    /// Substitute `${{ secrets.X }}`, `${{ env.X }}` and `${{ run.X }}`
    pub fn interpolate(&self, text: &str) -> Result<String, InterpolationError> {
        let mut result = String::with_capacity(text.len());
        let mut last = 0;

        for caps in expression_regex().captures_iter(text) {
            let Some(whole) = caps.get(0) else { continue };
            let scope = &caps[1];
            let name = &caps[2];
            let value = self.lookup(scope, name)?;
            result.push_str(&text[last..whole.start()]);
            result.push_str(&value);
            last = whole.end();
        }

        result.push_str(&text[last..]);
        Ok(result)
    }

    fn lookup(&self, scope: &str, name: &str) -> Result<String, InterpolationError> {
        let missing = || InterpolationError::Missing {
            scope: scope.to_string(),
            name: name.to_string(),
        };

        match scope {
            "secrets" => self.secrets.get(name).map(str::to_string).ok_or_else(missing),
            "env" => self.env.get(name).cloned().ok_or_else(missing),
            "run" => match name {
                "id" => Ok(self.run_id.to_string()),
                "branch" => Ok(self.branch.clone()),
                "commit" => Ok(self.commit.clone()),
                "workflow" => Ok(self.workflow.clone()),
                "workspace" => Ok(self.workspace.display().to_string()),
                _ => Err(missing()),
            },
            other => Err(InterpolationError::UnknownScope(other.to_string())),
        }
    }
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("run_id", &self.run_id)
            .field("workflow", &self.workflow)
            .field("branch", &self.branch)
            .field("commit", &self.commit)
            .field("workspace", &self.workspace)
            .field("secrets", &self.secrets)
            .field("post_run", &self.post_run.len())
            .finish()
    }
}
