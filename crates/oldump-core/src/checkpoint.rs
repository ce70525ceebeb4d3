//! Stage completion markers.
//!
//! A stage is complete for a run date when its marker exists under
//! `checkpoints/<date>/<stage>.json` and every artifact the marker lists is
//! still on disk. Markers are written atomically and only after the stage's
//! artifacts have been committed under their final names.

use crate::error::Result;
use crate::io;
use crate::paths;
use crate::types::{RunDate, Stage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub stage: Stage,
    pub run_date: RunDate,
    pub completed_at: DateTime<Utc>,
    /// Artifact paths relative to the work directory.
    #[serde(default)]
    pub artifacts: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub records: Option<u64>,
}

impl Checkpoint {
    pub fn new(stage: Stage, run_date: RunDate) -> Self {
        Self {
            stage,
            run_date,
            completed_at: Utc::now(),
            artifacts: Vec::new(),
            records: None,
        }
    }

    pub fn with_records(mut self, records: u64) -> Self {
        self.records = Some(records);
        self
    }
}

pub struct CheckpointStore {
    work_dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(work_dir: &Path) -> Self {
        Self {
            work_dir: work_dir.to_path_buf(),
        }
    }

    pub fn load(&self, date: RunDate, stage: Stage) -> Result<Option<Checkpoint>> {
        let path = paths::checkpoint_path(&self.work_dir, date, stage);
        if !path.exists() {
            return Ok(None);
        }
        let data = std::fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&data)?))
    }

    /// True when the marker exists, parses, and its artifacts are present.
    pub fn is_complete(&self, date: RunDate, stage: Stage) -> bool {
        match self.load(date, stage) {
            Ok(Some(cp)) => {
                let missing: Vec<&String> = cp
                    .artifacts
                    .iter()
                    .filter(|a| !self.work_dir.join(a.as_str()).exists())
                    .collect();
                if missing.is_empty() {
                    true
                } else {
                    tracing::warn!(%stage, %date, ?missing, "checkpoint artifacts missing, stage will re-run");
                    false
                }
            }
            Ok(None) => false,
            Err(e) => {
                tracing::warn!(%stage, %date, error = %e, "unreadable checkpoint, stage will re-run");
                false
            }
        }
    }

    /// Record `artifacts` (absolute or work-dir relative) as the stage output
    /// and write the marker.
    pub fn mark(&self, mut checkpoint: Checkpoint, artifacts: &[PathBuf]) -> Result<Checkpoint> {
        checkpoint.artifacts = artifacts
            .iter()
            .map(|p| {
                p.strip_prefix(&self.work_dir)
                    .unwrap_or(p.as_path())
                    .to_string_lossy()
                    .into_owned()
            })
            .collect();
        let path = paths::checkpoint_path(&self.work_dir, checkpoint.run_date, checkpoint.stage);
        let data = serde_json::to_string_pretty(&checkpoint)?;
        io::atomic_write(&path, data.as_bytes())?;
        tracing::debug!(stage = %checkpoint.stage, date = %checkpoint.run_date, "checkpoint written");
        Ok(checkpoint)
    }

    /// Absolute paths of the artifacts recorded for a completed stage.
    pub fn artifacts(&self, date: RunDate, stage: Stage) -> Result<Vec<PathBuf>> {
        Ok(self
            .load(date, stage)?
            .map(|cp| cp.artifacts.iter().map(|a| self.work_dir.join(a)).collect())
            .unwrap_or_default())
    }

    /// Delete every marker of the run date.
    pub fn clear(&self, date: RunDate) -> Result<bool> {
        io::remove_path(&paths::checkpoints_dir(&self.work_dir, date))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn date() -> RunDate {
        "2024-01-31".parse().unwrap()
    }

    #[test]
    fn mark_then_complete() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path());
        assert!(!store.is_complete(date(), Stage::CDump));

        let artifact = dir.path().join("dumps/ol_cdump_2024-01-31.txt.gz");
        std::fs::create_dir_all(artifact.parent().unwrap()).unwrap();
        std::fs::write(&artifact, b"x").unwrap();

        let cp = store
            .mark(Checkpoint::new(Stage::CDump, date()).with_records(3), &[artifact.clone()])
            .unwrap();
        assert_eq!(cp.artifacts, vec!["dumps/ol_cdump_2024-01-31.txt.gz"]);
        assert!(store.is_complete(date(), Stage::CDump));
        assert!(!store.is_complete(date(), Stage::Dump));
        assert_eq!(store.artifacts(date(), Stage::CDump).unwrap(), vec![artifact]);
        assert_eq!(
            store.load(date(), Stage::CDump).unwrap().unwrap().records,
            Some(3)
        );
    }

    #[test]
    fn missing_artifact_invalidates_checkpoint() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path());
        let artifact = dir.path().join("gone.txt.gz");
        std::fs::write(&artifact, b"x").unwrap();
        store
            .mark(Checkpoint::new(Stage::Dump, date()), &[artifact.clone()])
            .unwrap();
        std::fs::remove_file(&artifact).unwrap();
        assert!(!store.is_complete(date(), Stage::Dump));
    }

    #[test]
    fn corrupt_marker_is_not_complete() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path());
        let path = paths::checkpoint_path(dir.path(), date(), Stage::Split);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"{ not json").unwrap();
        assert!(!store.is_complete(date(), Stage::Split));
    }

    #[test]
    fn clear_removes_only_that_date() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path());
        let other: RunDate = "2023-12-31".parse().unwrap();
        store.mark(Checkpoint::new(Stage::Sort, date()), &[]).unwrap();
        store.mark(Checkpoint::new(Stage::Sort, other), &[]).unwrap();
        assert!(store.clear(date()).unwrap());
        assert!(!store.is_complete(date(), Stage::Sort));
        assert!(store.is_complete(other, Stage::Sort));
    }
}
