//! Checkpoint storage backends
//!
//! The [`CheckpointStore`] trait is the persistence boundary of the
//! checkpoint system. Two backends ship with the crate:
//!
//! - [`MemoryCheckpointStore`] — everything in a `RwLock`-guarded map;
//!   the default for development and tests.
//! - [`FileCheckpointStore`] — one JSON file per checkpoint under a
//!   per-run directory, for state that must survive process restarts.
//!
//! Custom backends (databases, object stores) implement the same trait.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::fs;
use tracing::{debug, warn};

use crate::checkpoint::{Checkpoint, CheckpointId, CheckpointInfo};
use crate::error::{CheckpointError, Result};

/// Storage backend for checkpoints.
///
/// Implementations must treat stored checkpoints as immutable: `save` with
/// an ID that already exists overwrites with identical content (IDs are
/// content-derived), and `load` never mutates what is stored.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Persist a checkpoint.
    async fn save(&self, checkpoint: &Checkpoint) -> Result<()>;

    /// Load a checkpoint by ID.
    async fn load(&self, id: &CheckpointId) -> Result<Option<Checkpoint>>;

    /// List checkpoint handles for a run, ordered by step (oldest first).
    async fn list(&self, run_id: &str) -> Result<Vec<CheckpointInfo>>;

    /// Delete a checkpoint.
    async fn delete(&self, id: &CheckpointId) -> Result<()>;

    /// Delete every checkpoint belonging to a run.
    async fn delete_run(&self, run_id: &str) -> Result<()>;
}

/// In-memory checkpoint store.
///
/// Suitable for tests and single-process development; contents are lost
/// when the process exits.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    checkpoints: tokio::sync::RwLock<HashMap<CheckpointId, Checkpoint>>,
}

impl MemoryCheckpointStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored checkpoints, across all runs.
    pub async fn checkpoint_count(&self) -> usize {
        self.checkpoints.read().await.len()
    }

    /// Remove all checkpoints (test isolation helper).
    pub async fn clear(&self) {
        self.checkpoints.write().await.clear();
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        let mut store = self.checkpoints.write().await;
        store.insert(checkpoint.id.clone(), checkpoint.clone());
        Ok(())
    }

    async fn load(&self, id: &CheckpointId) -> Result<Option<Checkpoint>> {
        let store = self.checkpoints.read().await;
        Ok(store.get(id).cloned())
    }

    async fn list(&self, run_id: &str) -> Result<Vec<CheckpointInfo>> {
        let store = self.checkpoints.read().await;
        let mut infos: Vec<CheckpointInfo> = store
            .values()
            .filter(|cp| cp.run_id == run_id)
            .map(Checkpoint::info)
            .collect();
        infos.sort_by_key(|info| info.step);
        Ok(infos)
    }

    async fn delete(&self, id: &CheckpointId) -> Result<()> {
        let mut store = self.checkpoints.write().await;
        store.remove(id);
        Ok(())
    }

    async fn delete_run(&self, run_id: &str) -> Result<()> {
        let mut store = self.checkpoints.write().await;
        store.retain(|_, cp| cp.run_id != run_id);
        Ok(())
    }
}

/// File system backed checkpoint store.
///
/// Checkpoints are stored as individual JSON files organized by run:
/// ```text
/// {root}/
/// └── checkpoints/
///     └── {run_id}/
///         ├── {id}_step_{step}.json
///         └── ...
/// ```
pub struct FileCheckpointStore {
    root: PathBuf,
}

impl FileCheckpointStore {
    /// Create a store rooted at `root`, creating the directory tree if needed.
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join("checkpoints")).await?;
        debug!(root = %root.display(), "file checkpoint store initialized");
        Ok(Self { root })
    }

    fn checkpoints_dir(&self) -> PathBuf {
        self.root.join("checkpoints")
    }

    fn run_dir(&self, run_id: &str) -> PathBuf {
        self.checkpoints_dir().join(Self::sanitize(run_id))
    }

    fn checkpoint_path(&self, checkpoint: &Checkpoint) -> PathBuf {
        self.run_dir(&checkpoint.run_id)
            .join(format!("{}_step_{:06}.json", checkpoint.id, checkpoint.step))
    }

    /// Run IDs may contain characters that are not valid in directory names.
    fn sanitize(run_id: &str) -> String {
        run_id
            .chars()
            .map(|c| {
                if c.is_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }

    /// Locate the file holding a checkpoint by scanning run directories.
    async fn find_file(&self, id: &CheckpointId) -> Result<Option<PathBuf>> {
        let dir = self.checkpoints_dir();
        if !dir.exists() {
            return Ok(None);
        }

        let mut runs = fs::read_dir(&dir).await?;
        while let Some(run_entry) = runs.next_entry().await? {
            let run_path = run_entry.path();
            if !run_path.is_dir() {
                continue;
            }
            let mut files = fs::read_dir(&run_path).await?;
            while let Some(file_entry) = files.next_entry().await? {
                let path = file_entry.path();
                let matches = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map_or(false, |name| name.starts_with(&format!("{}_step_", id)));
                if matches {
                    return Ok(Some(path));
                }
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        fs::create_dir_all(self.run_dir(&checkpoint.run_id)).await?;

        let path = self.checkpoint_path(checkpoint);
        let content = serde_json::to_string_pretty(checkpoint)?;
        fs::write(&path, content).await?;

        debug!(
            id = %checkpoint.id,
            run = %checkpoint.run_id,
            step = checkpoint.step,
            path = %path.display(),
            "saved checkpoint"
        );
        Ok(())
    }

    async fn load(&self, id: &CheckpointId) -> Result<Option<Checkpoint>> {
        let Some(path) = self.find_file(id).await? else {
            return Ok(None);
        };

        let content = fs::read_to_string(&path).await?;
        let checkpoint: Checkpoint = serde_json::from_str(&content).map_err(|e| {
            CheckpointError::Invalid(format!(
                "checkpoint file {} is corrupt: {}",
                path.display(),
                e
            ))
        })?;
        Ok(Some(checkpoint))
    }

    async fn list(&self, run_id: &str) -> Result<Vec<CheckpointInfo>> {
        let dir = self.run_dir(run_id);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut infos = Vec::new();
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().map_or(false, |ext| ext == "json") {
                match fs::read_to_string(&path).await {
                    Ok(content) => match serde_json::from_str::<Checkpoint>(&content) {
                        Ok(cp) => infos.push(cp.info()),
                        Err(e) => {
                            warn!(path = %path.display(), error = %e, "skipping unreadable checkpoint file");
                        }
                    },
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "failed to read checkpoint file");
                    }
                }
            }
        }

        infos.sort_by_key(|info| info.step);
        Ok(infos)
    }

    async fn delete(&self, id: &CheckpointId) -> Result<()> {
        if let Some(path) = self.find_file(id).await? {
            fs::remove_file(&path).await?;
            debug!(id = %id, "deleted checkpoint");
        }
        Ok(())
    }

    async fn delete_run(&self, run_id: &str) -> Result<()> {
        let dir = self.run_dir(run_id);
        if dir.exists() {
            fs::remove_dir_all(&dir).await?;
            debug!(run = %run_id, "deleted run checkpoints");
        }
        Ok(())
    }
}
