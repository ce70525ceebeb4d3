//! Sitemap generation seam.
//!
//! The generator itself is an external program; the pipeline only hands it
//! the finished dump and a directory to write into.

use crate::config::SitemapConfig;
use crate::error::{DumpError, Result};
use crate::io;
use crate::types::RunDate;
use std::fs::File;
use std::path::Path;
use std::process::{Command, Stdio};

pub const SITEMAP_LOG: &str = "sitemaps.log";

pub trait SitemapGenerator {
    fn generate(&self, dump: &Path, date: RunDate, out_dir: &Path) -> Result<()>;
}

/// Runs a configured command with the dump path appended, inside `out_dir`.
/// Its stdout is captured to `sitemaps.log` there.
pub struct CommandSitemap {
    program: String,
    args: Vec<String>,
}

impl CommandSitemap {
    pub fn new(config: &SitemapConfig) -> Result<Self> {
        let (program, args) = config
            .command
            .split_first()
            .ok_or_else(|| DumpError::Config("sitemap.command is empty".to_string()))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

impl SitemapGenerator for CommandSitemap {
    fn generate(&self, dump: &Path, date: RunDate, out_dir: &Path) -> Result<()> {
        io::ensure_dir(out_dir)?;
        let log = File::create(out_dir.join(SITEMAP_LOG))?;
        tracing::info!(program = %self.program, dump = %dump.display(), %date, "generating sitemaps");
        let status = Command::new(&self.program)
            .args(&self.args)
            .arg(dump)
            .current_dir(out_dir)
            .stdin(Stdio::null())
            .stdout(log)
            .stderr(Stdio::inherit())
            .status()
            .map_err(|e| DumpError::Sitemap(format!("failed to run {}: {e}", self.program)))?;
        if !status.success() {
            return Err(DumpError::Sitemap(format!(
                "{} exited with {status}",
                self.program
            )));
        }
        Ok(())
    }
}
