//! Ephemeral per-run workspace

use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::info;

/// Checkout root of a run, removed on drop unless kept
#[derive(Debug)]
pub struct Workspace {
    path: PathBuf,
    dir: Option<TempDir>,
}

impl Workspace {
    /// Fresh temporary directory named after the run
    pub fn create(run_id: &str, keep: bool) -> io::Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix(&format!("covpipe-{}-", run_id))
            .tempdir()?;

        if keep {
            let path = dir.into_path();
            info!("Keeping workspace {}", path.display());
            return Ok(Self { path, dir: None });
        }

        Ok(Self {
            path: dir.path().to_path_buf(),
            dir: Some(dir),
        })
    }

    /// Use an existing directory; it is never removed
    pub fn existing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            dir: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the directory survives drop
    pub fn is_kept(&self) -> bool {
        self.dir.is_none()
    }
}
