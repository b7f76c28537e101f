//! Artifact store - named file sets retained after a run

pub mod local;

pub use local::LocalArtifactStore;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Metadata of one archived artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    /// Unique per archive call
    pub id: Uuid,

    /// Artifact name (e.g. `code-coverage-report`)
    pub name: String,

    pub run_id: Uuid,
    pub workflow: String,
    pub branch: String,
    pub commit: String,

    /// Retained files, relative to the artifact root
    pub files: Vec<String>,

    pub size_bytes: u64,

    pub created_at: DateTime<Utc>,
}

/// What to archive and where it came from
#[derive(Debug, Clone)]
pub struct ArchiveRequest {
    pub name: String,
    pub run_id: Uuid,
    pub workflow: String,
    pub branch: String,
    pub commit: String,

    /// Directory file names are made relative to
    pub base_dir: PathBuf,

    /// Absolute files or directories
    pub paths: Vec<PathBuf>,
}

/// Trait for artifact backends
#[async_trait::async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Store the files as a new artifact; never deduplicates
    async fn archive(&self, request: ArchiveRequest) -> Result<ArtifactRecord>;

    /// All artifacts, newest first, optionally filtered by name
    async fn list(&self, name: Option<&str>) -> Result<Vec<ArtifactRecord>>;

    /// Artifacts produced by one run
    async fn list_for_run(&self, run_id: Uuid) -> Result<Vec<ArtifactRecord>> {
        Ok(self
            .list(None)
            .await?
            .into_iter()
            .filter(|a| a.run_id == run_id)
            .collect())
    }

    async fn get(&self, id: Uuid) -> Result<Option<ArtifactRecord>>;

    /// Location of a retained file
    fn file_path(&self, record: &ArtifactRecord, file: &str) -> PathBuf;
}
