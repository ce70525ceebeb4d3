use crate::output::{print_json, print_table};
use anyhow::Context;
use clap::Args;
use oldump_core::archive::{ArchiveStore, IaCliStore};
use oldump_core::config::DumpConfig;
use oldump_core::context::{RunContext, RunOptions};
use oldump_core::extract::{ExtractQuery, Extractor, PsqlExtractor};
use oldump_core::orchestrator::{Collaborators, Orchestrator, StageOutcome};
use oldump_core::sitemap::{CommandSitemap, SitemapGenerator};
use oldump_core::types::RunDate;
use oldump_core::DumpError;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Args)]
pub struct RunArgs {
    /// Last day included in the dump (yyyy-mm-dd)
    pub date: String,

    /// Upload the finished dumps to the archive
    #[arg(long)]
    pub archive: bool,

    /// Delete every artifact and checkpoint of the date first
    #[arg(long)]
    pub overwrite: bool,

    /// Use an existing raw extract instead of querying the database
    #[arg(long, alias = "use-existing")]
    pub reuse_raw_extract: bool,

    /// Root of all run output (overrides the config file)
    #[arg(long, env = "OLDUMP_WORK_DIR")]
    pub work_dir: Option<PathBuf>,

    /// Parent of the sort scratch directory
    #[arg(long, env = "OLDUMP_SCRATCH_DIR")]
    pub scratch_dir: Option<PathBuf>,

    /// Cap the raw rows compiled; marks the run as a test run
    #[arg(long, env = "OLDUMP_MAX_RECORDS")]
    pub max_records: Option<u64>,
}

/// Stands in for `psql` when it cannot be found, so a run whose extract
/// stages are already complete can still resume.
struct UnavailableExtractor {
    reason: String,
}

impl Extractor for UnavailableExtractor {
    fn extract(
        &self,
        _query: &ExtractQuery,
        _upto: RunDate,
        _out: &mut dyn Write,
    ) -> oldump_core::Result<u64> {
        Err(DumpError::Extract(self.reason.clone()))
    }
}

pub fn run(config_path: Option<&Path>, args: RunArgs, json: bool) -> anyhow::Result<()> {
    let date: RunDate = args.date.parse()?;
    let mut config = DumpConfig::load(config_path).context("failed to load config")?;
    if let Some(work_dir) = args.work_dir {
        config.work_dir = work_dir;
    }
    if let Some(scratch_dir) = args.scratch_dir {
        config.scratch_dir = Some(scratch_dir);
    }
    if args.max_records.is_some() {
        config.max_records = args.max_records;
    }
    for warning in config.validate() {
        tracing::warn!(level = ?warning.level, "{}", warning.message);
    }

    let options = RunOptions {
        archive: args.archive,
        overwrite: args.overwrite,
        reuse_raw_extract: args.reuse_raw_extract,
    };
    let ctx = RunContext::new(date, config, options);

    let psql = PsqlExtractor::new(&ctx.config.extract);
    let unavailable;
    let extractor: &dyn Extractor = match &psql {
        Ok(psql) => psql,
        Err(e) => {
            tracing::warn!(error = %e, "database extracts unavailable");
            unavailable = UnavailableExtractor {
                reason: e.to_string(),
            };
            &unavailable
        }
    };

    let store = if options.archive && !ctx.is_testing() {
        Some(IaCliStore::new(&ctx.config.archive.config_file)?)
    } else {
        None
    };
    let sitemap = ctx
        .config
        .sitemap
        .as_ref()
        .map(CommandSitemap::new)
        .transpose()?;

    let collab = Collaborators {
        extractor,
        archive: store.as_ref().map(|s| s as &dyn ArchiveStore),
        sitemap: sitemap.as_ref().map(|s| s as &dyn SitemapGenerator),
    };
    let report = Orchestrator::new(ctx, collab)?.run()?;

    if json {
        return print_json(&report);
    }
    let rows: Vec<Vec<String>> = report
        .stages
        .iter()
        .map(|s| {
            let (outcome, note) = match &s.outcome {
                StageOutcome::Ran => ("ran", String::new()),
                StageOutcome::Skipped => ("skipped", "already complete".to_string()),
                StageOutcome::Suppressed(reason) => ("suppressed", reason.clone()),
            };
            vec![
                s.stage.to_string(),
                outcome.to_string(),
                format!("{:.1}s", s.elapsed_ms as f64 / 1000.0),
                note,
            ]
        })
        .collect();
    print_table(&["STAGE", "OUTCOME", "TIME", "NOTE"], rows);
    Ok(())
}
