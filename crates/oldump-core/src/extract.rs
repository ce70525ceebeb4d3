//! Record store extraction.
//!
//! The store is queried through `psql`; the orchestrator only sees the
//! [`Extractor`] trait so stages can be exercised without a database.

use crate::config::ExtractConfig;
use crate::error::{DumpError, Result};
use crate::types::RunDate;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

/// What to pull out of the record store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractQuery {
    /// The full data table, one row per revision.
    RawData,
    /// A SQL script run with `upto` bound to the run date.
    Script(PathBuf),
}

pub trait Extractor {
    /// Stream the query result to `out`. Returns the number of bytes written.
    fn extract(&self, query: &ExtractQuery, upto: RunDate, out: &mut dyn Write) -> Result<u64>;
}

pub struct PsqlExtractor {
    binary: PathBuf,
    params: Vec<String>,
}

impl PsqlExtractor {
    pub fn new(config: &ExtractConfig) -> Result<Self> {
        let binary = which::which("psql")
            .map_err(|_| DumpError::Extract("psql not found in PATH".to_string()))?;
        Ok(Self {
            binary,
            params: config.psql_params.clone(),
        })
    }

    fn command(&self, query: &ExtractQuery, upto: RunDate) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(&self.params);
        match query {
            ExtractQuery::RawData => {
                cmd.args(["-c", "copy data to stdout"]);
            }
            ExtractQuery::Script(path) => {
                cmd.arg(format!("--set=upto={upto}"));
                cmd.arg("-f").arg(path);
            }
        }
        cmd
    }
}

impl Extractor for PsqlExtractor {
    fn extract(&self, query: &ExtractQuery, upto: RunDate, out: &mut dyn Write) -> Result<u64> {
        let mut cmd = self.command(query, upto);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        // psql diagnostics go straight to our stderr
        cmd.stderr(Stdio::inherit());
        tracing::info!(?query, %upto, "running psql");

        let mut child = cmd
            .spawn()
            .map_err(|e| DumpError::Extract(format!("failed to spawn psql: {e}")))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| DumpError::Extract("psql stdout not captured".to_string()))?;
        let copied = std::io::copy(&mut stdout, out);
        drop(stdout);
        let status = child.wait()?;
        let copied = copied?;
        if !status.success() {
            return Err(DumpError::Extract(format!("psql exited with {status}")));
        }
        Ok(copied)
    }
}
