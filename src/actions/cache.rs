//! `cache` - restore a directory tree on the step, save it after a successful run

use crate::actions::{files::copy_tree, Action, ActionInputs};
use crate::core::{PostRunHook, RunContext};
use crate::execution::StepError;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Directory-backed cache, one immutable entry per key
#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
}

impl CacheStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn entry_dir(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entry_dir(key).is_dir()
    }

    /// Copy cached paths into the workspace; `false` on a miss
    pub fn restore(&self, key: &str, paths: &[String], workspace: &Path) -> std::io::Result<bool> {
        let entry = self.entry_dir(key);
        if !entry.is_dir() {
            return Ok(false);
        }

        for path in paths {
            let cached = entry.join(path);
            if cached.exists() {
                copy_tree(&cached, &workspace.join(path))?;
            }
        }
        Ok(true)
    }

    /// Store workspace paths under `key`; existing entries are never overwritten
    pub fn save(&self, key: &str, paths: &[String], workspace: &Path) -> std::io::Result<bool> {
        let entry = self.entry_dir(key);
        if entry.exists() {
            return Ok(false);
        }

        std::fs::create_dir_all(&self.root)?;
        let staging = tempfile::tempdir_in(&self.root)?;
        for path in paths {
            let source = workspace.join(path);
            if source.exists() {
                copy_tree(&source, &staging.path().join(path))?;
            }
        }

        let staged = staging.into_path();
        if let Err(e) = std::fs::rename(&staged, &entry) {
            let _ = std::fs::remove_dir_all(&staged);
            // Another run saved the same key first
            if entry.exists() {
                return Ok(false);
            }
            return Err(e);
        }
        Ok(true)
    }
}

/// Key derived from the workflow, toolchain pins and cached paths
pub fn derive_key(prefix: &str, context: &RunContext, paths: &[String]) -> String {
    let mut pins = context.toolchain_pins.clone();
    pins.sort();

    let mut hasher = Sha256::new();
    hasher.update(context.workflow.as_bytes());
    for pin in &pins {
        hasher.update(b"\0");
        hasher.update(pin.as_bytes());
    }
    for path in paths {
        hasher.update(b"\x01");
        hasher.update(path.as_bytes());
    }
    let digest = hex::encode(hasher.finalize());
    format!("{}-{}", prefix, &digest[..16])
}

struct SaveCache {
    store: CacheStore,
    key: String,
    paths: Vec<String>,
}

#[async_trait]
impl PostRunHook for SaveCache {
    fn describe(&self) -> String {
        format!("save cache {}", self.key)
    }

    async fn run(&self, context: &RunContext) -> anyhow::Result<()> {
        if self.store.save(&self.key, &self.paths, context.workspace())? {
            info!("Saved cache {}", self.key);
        } else {
            debug!("Cache {} already exists, not saving", self.key);
        }
        Ok(())
    }
}

pub struct CacheAction {
    store: CacheStore,
}

impl CacheAction {
    pub fn new(store: CacheStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Action for CacheAction {
    fn name(&self) -> &str {
        "cache"
    }

    fn versions(&self) -> &[&str] {
        &["v1"]
    }

    async fn run(&self, inputs: &ActionInputs, context: &mut RunContext) -> Result<String, StepError> {
        let prefix = inputs.get_or("key", "covpipe");
        let mut paths = inputs.list("paths");
        if paths.is_empty() {
            paths.push("target".to_string());
        }

        let key = derive_key(prefix, context, &paths);
        let hit = self
            .store
            .restore(&key, &paths, context.workspace())
            .map_err(|e| StepError::Action(format!("failed to restore cache {}: {}", key, e)))?;

        context.register_post_run(Arc::new(SaveCache {
            store: self.store.clone(),
            key: key.clone(),
            paths,
        }));

        let message = if hit {
            format!("Cache restored from key: {}", key)
        } else {
            format!("Cache not found for key: {}", key)
        };
        info!("{}", message);
        Ok(message + "\n")
    }
}
