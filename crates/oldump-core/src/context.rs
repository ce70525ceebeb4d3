use crate::config::DumpConfig;
use crate::error::{DumpError, Result};
use crate::types::RunDate;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared cancellation flag, checked between records by every stream loop.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(DumpError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Flags chosen by the caller for a single run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Upload completed dumps to the archive.
    pub archive: bool,
    /// Purge every artifact and checkpoint of the run date before starting.
    pub overwrite: bool,
    /// Treat an existing raw extract as complete and keep it across purges.
    pub reuse_raw_extract: bool,
}

/// Everything a stage needs to know about the run it belongs to.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub date: RunDate,
    pub config: DumpConfig,
    pub options: RunOptions,
    pub cancel: CancelToken,
}

impl RunContext {
    pub fn new(date: RunDate, config: DumpConfig, options: RunOptions) -> Self {
        Self {
            date,
            config,
            options,
            cancel: CancelToken::new(),
        }
    }

    /// A record cap turns the run into a test run: no archival, no cleanup.
    pub fn is_testing(&self) -> bool {
        self.config.max_records.is_some()
    }
}
