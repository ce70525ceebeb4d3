//! Idempotent archival of completed dumps.
//!
//! For every item the store is asked first whether the item is already fully
//! present; present items are skipped without uploading. Missing items are
//! uploaded with bounded retries. A failed item never stops its siblings.

use crate::config::ArchiveConfig;
use crate::error::{DumpError, Result};
use crate::types::RunDate;
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// One archive item: a name (the artifact base name) and its files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveItem {
    pub name: String,
    pub files: Vec<PathBuf>,
}

impl ArchiveItem {
    pub fn new(name: impl Into<String>, files: Vec<PathBuf>) -> Self {
        Self {
            name: name.into(),
            files,
        }
    }

    pub fn file_names(&self) -> Vec<String> {
        self.files
            .iter()
            .filter_map(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveMetadata {
    pub collection: String,
    pub year: i32,
    pub format: String,
}

impl ArchiveMetadata {
    pub fn for_run(config: &ArchiveConfig, date: RunDate) -> Self {
        Self {
            collection: config.collection.clone(),
            year: date.year(),
            format: config.format.clone(),
        }
    }

    /// `name:value` pairs as passed to the archive client.
    pub fn pairs(&self) -> Vec<String> {
        vec![
            format!("collection:{}", self.collection),
            format!("year:{}", self.year),
            format!("format:{}", self.format),
        ]
    }
}

pub trait ArchiveStore {
    /// True when every file of `item` is already stored.
    fn exists(&self, item: &ArchiveItem) -> Result<bool>;

    fn upload(&self, item: &ArchiveItem, metadata: &ArchiveMetadata) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UploadOutcome {
    AlreadyPresent,
    Uploaded { attempts: u32 },
    Failed { attempts: u32, error: String },
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ArchiveReport {
    pub items: Vec<(String, UploadOutcome)>,
}

impl ArchiveReport {
    pub fn failed(&self) -> Vec<String> {
        self.items
            .iter()
            .filter(|(_, o)| matches!(o, UploadOutcome::Failed { .. }))
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn uploads(&self) -> usize {
        self.items
            .iter()
            .filter(|(_, o)| matches!(o, UploadOutcome::Uploaded { .. }))
            .count()
    }

    pub fn into_result(self) -> Result<Self> {
        let failed = self.failed();
        if failed.is_empty() {
            Ok(self)
        } else {
            Err(DumpError::ArchiveFailed(failed))
        }
    }
}

// ---------------------------------------------------------------------------
// Archiver
// ---------------------------------------------------------------------------

pub struct Archiver<'a> {
    store: &'a dyn ArchiveStore,
    metadata: ArchiveMetadata,
    retries: u32,
    retry_delay: Duration,
}

impl<'a> Archiver<'a> {
    pub fn new(
        store: &'a dyn ArchiveStore,
        metadata: ArchiveMetadata,
        retries: u32,
        retry_delay: Duration,
    ) -> Self {
        Self {
            store,
            metadata,
            retries,
            retry_delay,
        }
    }

    pub fn archive(&self, items: &[ArchiveItem]) -> ArchiveReport {
        let mut report = ArchiveReport::default();
        for item in items {
            let outcome = self.archive_item(item);
            match &outcome {
                UploadOutcome::AlreadyPresent => {
                    tracing::info!(item = %item.name, "skipping: archive item already exists")
                }
                UploadOutcome::Uploaded { attempts } => {
                    tracing::info!(item = %item.name, attempts, "archive item uploaded")
                }
                UploadOutcome::Failed { attempts, error } => {
                    tracing::error!(item = %item.name, attempts, %error, "archive upload gave up")
                }
            }
            report.items.push((item.name.clone(), outcome));
        }
        report
    }

    /// One attempt is an existence check followed, if needed, by an upload.
    /// The check is repeated before every retry so an upload that actually
    /// landed is never sent twice.
    fn archive_item(&self, item: &ArchiveItem) -> UploadOutcome {
        let max_attempts = self.retries.saturating_add(1);
        let mut last_error = String::new();
        for attempt in 1..=max_attempts {
            if attempt > 1 && !self.retry_delay.is_zero() {
                std::thread::sleep(self.retry_delay);
            }
            let result = self.store.exists(item).and_then(|present| {
                if present {
                    Ok(true)
                } else {
                    self.store.upload(item, &self.metadata).map(|()| false)
                }
            });
            match result {
                Ok(true) if attempt == 1 => return UploadOutcome::AlreadyPresent,
                Ok(_) => return UploadOutcome::Uploaded { attempts: attempt },
                Err(e) => {
                    tracing::warn!(item = %item.name, attempt, max_attempts, error = %e, "archive attempt failed");
                    last_error = e.to_string();
                }
            }
        }
        UploadOutcome::Failed {
            attempts: max_attempts,
            error: last_error,
        }
    }
}

// ---------------------------------------------------------------------------
// IaCliStore
// ---------------------------------------------------------------------------

/// Archive store backed by the `ia` command-line client.
pub struct IaCliStore {
    binary: PathBuf,
    config_file: PathBuf,
}

impl IaCliStore {
    /// Fails with a configuration error when the credentials file or the
    /// `ia` binary is missing.
    pub fn new(config_file: &Path) -> Result<Self> {
        if !config_file.exists() {
            return Err(DumpError::Config(format!(
                "archival requested but credentials file {} does not exist",
                config_file.display()
            )));
        }
        let binary = which::which("ia").map_err(|_| {
            DumpError::Config("archival requested but 'ia' is not in PATH".to_string())
        })?;
        Ok(Self {
            binary,
            config_file: config_file.to_path_buf(),
        })
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg(format!("--config-file={}", self.config_file.display()));
        cmd
    }
}

impl ArchiveStore for IaCliStore {
    fn exists(&self, item: &ArchiveItem) -> Result<bool> {
        let output = self
            .command()
            .args(["list", &item.name])
            .output()
            .map_err(|e| DumpError::Transfer(format!("failed to run ia list: {e}")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DumpError::Transfer(format!(
                "ia list {} failed: {}",
                item.name,
                stderr.trim()
            )));
        }
        let listed: HashSet<String> = String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect();
        Ok(!listed.is_empty() && item.file_names().iter().all(|f| listed.contains(f)))
    }

    fn upload(&self, item: &ArchiveItem, metadata: &ArchiveMetadata) -> Result<()> {
        let mut cmd = self.command();
        cmd.arg("upload").arg(&item.name).args(&item.files);
        for pair in metadata.pairs() {
            cmd.arg("--metadata").arg(pair);
        }
        let output = cmd
            .output()
            .map_err(|e| DumpError::Transfer(format!("failed to run ia upload: {e}")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DumpError::Transfer(format!(
                "ia upload {} failed: {}",
                item.name,
                stderr.trim()
            )));
        }
        Ok(())
    }
}
