//! Directory-based artifact store
//!
//! Layout: `<root>/<artifact id>/manifest.json` plus `<root>/<artifact id>/files/...`

use crate::actions::files::{copy_tree, relative_name};
use crate::artifacts::{ArchiveRequest, ArtifactRecord, ArtifactStore};
use anyhow::{Context, Result};
use chrono::Utc;
use std::path::PathBuf;
use tracing::{debug, warn};
use uuid::Uuid;

const MANIFEST: &str = "manifest.json";
const FILES_DIR: &str = "files";

pub struct LocalArtifactStore {
    root: PathBuf,
}

impl LocalArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &std::path::Path {
        &self.root
    }

    fn artifact_dir(&self, id: Uuid) -> PathBuf {
        self.root.join(id.to_string())
    }

    fn read_manifest(&self, id: Uuid) -> Result<Option<ArtifactRecord>> {
        let path = self.artifact_dir(id).join(MANIFEST);
        if !path.is_file() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Ok(Some(serde_json::from_str(&content)?))
    }
}

#[async_trait::async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn archive(&self, request: ArchiveRequest) -> Result<ArtifactRecord> {
        let id = Uuid::new_v4();
        let dir = self.artifact_dir(id);
        let files_dir = dir.join(FILES_DIR);
        std::fs::create_dir_all(&files_dir)
            .with_context(|| format!("Failed to create {}", files_dir.display()))?;

        let mut files = Vec::new();
        let mut size_bytes = 0;
        for path in &request.paths {
            let name = relative_name(path, &request.base_dir);
            let target = files_dir.join(&name);
            let copied = copy_tree(path, &target)
                .with_context(|| format!("Failed to archive {}", path.display()))?;

            for rel in copied {
                let file = if rel.as_os_str().is_empty() {
                    name.clone()
                } else {
                    name.join(rel)
                };
                size_bytes += std::fs::metadata(files_dir.join(&file))
                    .map(|m| m.len())
                    .unwrap_or(0);
                files.push(file.to_string_lossy().into_owned());
            }
        }
        files.sort();

        let record = ArtifactRecord {
            id,
            name: request.name,
            run_id: request.run_id,
            workflow: request.workflow,
            branch: request.branch,
            commit: request.commit,
            files,
            size_bytes,
            created_at: Utc::now(),
        };

        let manifest = serde_json::to_string_pretty(&record)?;
        std::fs::write(dir.join(MANIFEST), manifest).context("Failed to write artifact manifest")?;
        debug!("Archived artifact {} ({}) at {}", record.name, id, dir.display());

        Ok(record)
    }

    async fn list(&self, name: Option<&str>) -> Result<Vec<ArtifactRecord>> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }

        let mut records = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            let Some(id) = entry
                .file_name()
                .to_str()
                .and_then(|s| Uuid::parse_str(s).ok())
            else {
                continue;
            };
            match self.read_manifest(id) {
                Ok(Some(record)) => {
                    if name.map_or(true, |n| record.name == n) {
                        records.push(record);
                    }
                }
                Ok(None) => {}
                Err(e) => warn!("Skipping unreadable artifact {}: {}", id, e),
            }
        }

        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    async fn get(&self, id: Uuid) -> Result<Option<ArtifactRecord>> {
        self.read_manifest(id)
    }

    fn file_path(&self, record: &ArtifactRecord, file: &str) -> PathBuf {
        self.artifact_dir(record.id).join(FILES_DIR).join(file)
    }
}
