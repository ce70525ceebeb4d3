//! Runs the dump stages for one run date.
//!
//! # Stages
//!
//! `reading-log`, `ratings`, `raw-extract`, `cdump`, `sort`, `dump`, `split`,
//! `archive` and `sitemap` run strictly in that order. A stage whose
//! checkpoint is complete is skipped. The first failing stage aborts the run
//! and leaves every earlier checkpoint in place, so re-running with the same
//! arguments resumes at the failed stage.
//!
//! `sort` and `dump` share one pass: the sorter's merge output feeds the
//! reducer through a bounded pipe and only the dump file is materialized.
//! The dump checkpoint is written before the sort checkpoint.

use crate::archive::{ArchiveItem, ArchiveMetadata, ArchiveStore, Archiver};
use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::codec::{self, ArtifactWriter};
use crate::compile::{CompileOptions, HistoryCompiler};
use crate::config::WarnLevel;
use crate::context::RunContext;
use crate::error::{DumpError, Result};
use crate::extract::{ExtractQuery, Extractor};
use crate::io;
use crate::paths;
use crate::pipe;
use crate::record::EntryReader;
use crate::reduce::LatestRevisions;
use crate::sitemap::SitemapGenerator;
use crate::sort::{self, ExternalSorter, SortOptions};
use crate::split::TypeSplitter;
use crate::types::Stage;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// External systems the run talks to.
pub struct Collaborators<'a> {
    pub extractor: &'a dyn Extractor,
    pub archive: Option<&'a dyn ArchiveStore>,
    pub sitemap: Option<&'a dyn SitemapGenerator>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum StageOutcome {
    Ran,
    Skipped,
    Suppressed(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub stage: Stage,
    pub outcome: StageOutcome,
    pub elapsed_ms: u128,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub date: crate::types::RunDate,
    pub stages: Vec<StageReport>,
    pub raw_extract_removed: bool,
}

impl RunReport {
    /// Number of stages that did work in this run.
    pub fn executed(&self) -> usize {
        self.stages
            .iter()
            .filter(|s| s.outcome == StageOutcome::Ran)
            .count()
    }

    pub fn outcome(&self, stage: Stage) -> Option<&StageOutcome> {
        self.stages
            .iter()
            .find(|s| s.stage == stage)
            .map(|s| &s.outcome)
    }
}

pub struct Orchestrator<'a> {
    ctx: RunContext,
    collab: Collaborators<'a>,
    checkpoints: CheckpointStore,
}

impl<'a> Orchestrator<'a> {
    /// Validates the configuration and the archive prerequisites up front so
    /// a misconfigured run fails before any stage starts.
    pub fn new(ctx: RunContext, collab: Collaborators<'a>) -> Result<Self> {
        let errors: Vec<String> = ctx
            .config
            .validate()
            .into_iter()
            .filter(|w| w.level == WarnLevel::Error)
            .map(|w| w.message)
            .collect();
        if !errors.is_empty() {
            return Err(DumpError::Config(errors.join("; ")));
        }
        if ctx.options.archive && !ctx.is_testing() && collab.archive.is_none() {
            return Err(DumpError::Config(
                "archival requested but no archive credentials are configured".to_string(),
            ));
        }
        let checkpoints = CheckpointStore::new(&ctx.config.work_dir);
        Ok(Self {
            ctx,
            collab,
            checkpoints,
        })
    }

    fn work_dir(&self) -> &Path {
        &self.ctx.config.work_dir
    }

    pub fn run(&self) -> Result<RunReport> {
        let date = self.ctx.date;
        let started = Instant::now();
        tracing::info!(
            %date,
            work_dir = %self.work_dir().display(),
            archive = self.ctx.options.archive,
            overwrite = self.ctx.options.overwrite,
            testing = self.ctx.is_testing(),
            "dump run starting"
        );
        io::ensure_dir(&paths::dumps_dir(self.work_dir()))?;
        if self.ctx.options.overwrite {
            self.purge()?;
        }

        let mut report = RunReport {
            date,
            stages: Vec::new(),
            raw_extract_removed: false,
        };
        let mut ran_with_sort = false;
        for &stage in Stage::all() {
            self.ctx.cancel.check().map_err(|e| e.in_stage(stage, date))?;
            let stage_start = Instant::now();
            let outcome = if stage == Stage::Dump && ran_with_sort {
                StageOutcome::Ran
            } else if let Some(reason) = self.suppressed(stage) {
                tracing::info!(%stage, %date, %reason, "stage suppressed");
                StageOutcome::Suppressed(reason)
            } else if self.is_done(stage) {
                tracing::info!(%stage, %date, "skipping: stage already complete");
                StageOutcome::Skipped
            } else {
                tracing::info!(%stage, %date, "stage starting");
                let outcome = self.run_stage(stage).map_err(|e| {
                    tracing::error!(%stage, %date, error = %e, "stage failed");
                    e.in_stage(stage, date)
                })?;
                if stage == Stage::Sort && outcome == StageOutcome::Ran {
                    ran_with_sort = true;
                }
                tracing::info!(
                    %stage,
                    %date,
                    elapsed_s = stage_start.elapsed().as_secs(),
                    "stage complete"
                );
                outcome
            };
            report.stages.push(StageReport {
                stage,
                outcome,
                elapsed_ms: stage_start.elapsed().as_millis(),
            });
        }

        if !self.ctx.is_testing() && !self.ctx.options.reuse_raw_extract {
            report.raw_extract_removed =
                io::remove_path(&paths::raw_extract_path(self.work_dir()))?;
            if report.raw_extract_removed {
                tracing::info!("raw extract removed");
            }
        }
        tracing::info!(
            %date,
            executed = report.executed(),
            elapsed_s = started.elapsed().as_secs(),
            "dump run complete"
        );
        Ok(report)
    }

    fn suppressed(&self, stage: Stage) -> Option<String> {
        match stage {
            Stage::Archive if !self.ctx.options.archive => Some("archive not requested".into()),
            Stage::Archive if self.ctx.is_testing() => Some("testing mode".into()),
            Stage::Sitemap if self.collab.sitemap.is_none() => {
                Some("no sitemap generator configured".into())
            }
            _ => None,
        }
    }

    fn is_done(&self, stage: Stage) -> bool {
        let date = self.ctx.date;
        // The raw extract only feeds cdump and is removed after a full run.
        if stage == Stage::RawExtract && self.checkpoints.is_complete(date, Stage::CDump) {
            return true;
        }
        self.checkpoints.is_complete(date, stage)
    }

    /// Remove every artifact and checkpoint of the run date.
    fn purge(&self) -> Result<()> {
        let date = self.ctx.date;
        let mut removed = 0usize;
        for path in paths::run_artifacts(&paths::dumps_dir(self.work_dir()), date)? {
            io::remove_path(&path)?;
            removed += 1;
        }
        self.checkpoints.clear(date)?;
        io::remove_path(&paths::sitemaps_dir(self.work_dir(), date))?;
        if !self.ctx.options.reuse_raw_extract
            && io::remove_path(&paths::raw_extract_path(self.work_dir()))?
        {
            removed += 1;
        }
        tracing::warn!(%date, removed, "overwrite: previous run output purged");
        Ok(())
    }

    fn run_stage(&self, stage: Stage) -> Result<StageOutcome> {
        match stage {
            Stage::ReadingLog => {
                let script = self.ctx.config.extract.reading_log_script();
                let dest = paths::reading_log_path(self.work_dir(), self.ctx.date);
                self.extract_stage(stage, ExtractQuery::Script(script), &dest)
            }
            Stage::Ratings => {
                let script = self.ctx.config.extract.ratings_script();
                let dest = paths::ratings_path(self.work_dir(), self.ctx.date);
                self.extract_stage(stage, ExtractQuery::Script(script), &dest)
            }
            Stage::RawExtract => self.raw_extract(),
            Stage::CDump => self.cdump(),
            Stage::Sort | Stage::Dump => self.sort_and_dump(),
            Stage::Split => self.split(),
            Stage::Archive => self.archive(),
            Stage::Sitemap => self.sitemap(),
        }
    }

    fn mark(&self, stage: Stage, artifacts: &[PathBuf], records: Option<u64>) -> Result<()> {
        let mut checkpoint = Checkpoint::new(stage, self.ctx.date);
        if let Some(records) = records {
            checkpoint = checkpoint.with_records(records);
        }
        self.checkpoints.mark(checkpoint, artifacts)?;
        Ok(())
    }

    fn extract_stage(&self, stage: Stage, query: ExtractQuery, dest: &Path) -> Result<StageOutcome> {
        let mut writer = ArtifactWriter::create(dest)?;
        let bytes = self
            .collab
            .extractor
            .extract(&query, self.ctx.date, &mut writer)?;
        let path = writer.commit()?;
        tracing::info!(%stage, path = %path.display(), bytes, "extract written");
        self.mark(stage, &[path], None)?;
        Ok(StageOutcome::Ran)
    }

    fn raw_extract(&self) -> Result<StageOutcome> {
        let path = paths::raw_extract_path(self.work_dir());
        if self.ctx.options.reuse_raw_extract && path.exists() {
            tracing::info!(path = %path.display(), "reusing existing raw extract");
            self.mark(Stage::RawExtract, &[path], None)?;
            return Ok(StageOutcome::Skipped);
        }
        self.extract_stage(Stage::RawExtract, ExtractQuery::RawData, &path)
    }

    fn cdump(&self) -> Result<StageOutcome> {
        let config = &self.ctx.config;
        let input = codec::open_lines(&paths::raw_extract_path(self.work_dir()))?;
        let opts = CompileOptions {
            max_records: config.max_records,
            upto: Some(self.ctx.date),
            exclude_private: config.exclude_private,
            max_malformed: config.max_malformed,
            progress_every: config.progress_every,
        };
        let compiler = HistoryCompiler::new(input, opts, self.ctx.cancel.clone());
        let mut entries = pipe::spawn("cdump", config.pipe_capacity, compiler)?;

        let mut writer = ArtifactWriter::create(&paths::cdump_path(self.work_dir(), self.ctx.date))?;
        for entry in entries.by_ref() {
            entry?.write_line(&mut writer)?;
            writer.record_line();
        }
        let compiler = entries.finish()?;
        let stats = compiler.stats();
        let path = writer.commit()?;
        tracing::info!(
            rows = stats.rows_read,
            emitted = stats.emitted,
            excluded = stats.excluded,
            after_cutoff = stats.after_cutoff,
            malformed = stats.malformed,
            "history compiled"
        );
        self.mark(Stage::CDump, &[path], Some(stats.emitted))?;
        Ok(StageOutcome::Ran)
    }

    fn sort_and_dump(&self) -> Result<StageOutcome> {
        let config = &self.ctx.config;
        let cdump = paths::cdump_path(self.work_dir(), self.ctx.date);
        let input = EntryReader::new(codec::open_lines(&cdump)?);

        let scratch = config.scratch_dir();
        let stale = sort::remove_stale_scratch(scratch)?;
        if stale > 0 {
            tracing::warn!(removed = stale, "stale sort scratch removed");
        }
        let opts = SortOptions {
            scratch_dir: scratch.to_path_buf(),
            buffer_bytes: config.sort_buffer_bytes,
            merge_fan_in: config.merge_fan_in,
            progress_every: config.progress_every,
        };
        let sorted = ExternalSorter::new(opts, self.ctx.cancel.clone()).sort(input)?;
        let merged = pipe::spawn("sort", config.pipe_capacity, sorted)?;
        let mut reducer = LatestRevisions::new(merged);

        let started = Instant::now();
        let mut writer = ArtifactWriter::create(&paths::dump_path(self.work_dir(), self.ctx.date))?;
        for row in reducer.by_ref() {
            self.ctx.cancel.check()?;
            row?.write_line(&mut writer)?;
            writer.record_line();
            let rows = writer.lines();
            if config.progress_every > 0 && rows % config.progress_every == 0 {
                tracing::info!(rows, elapsed_s = started.elapsed().as_secs(), "dump progress");
            }
        }
        let stats = reducer.stats().clone();
        // Joins the merge thread and drops the sort scratch.
        drop(reducer);
        let path = writer.commit()?;
        tracing::info!(
            entries = stats.entries,
            keys = stats.groups,
            emitted = stats.emitted,
            deleted = stats.deleted,
            "latest revisions written"
        );
        self.mark(Stage::Dump, &[path.clone()], Some(stats.emitted))?;
        self.mark(Stage::Sort, &[path], Some(stats.entries))?;
        Ok(StageOutcome::Ran)
    }

    fn split(&self) -> Result<StageOutcome> {
        let date = self.ctx.date;
        let input = EntryReader::new(codec::open_lines(&paths::dump_path(self.work_dir(), date))?);
        let mut splitter =
            TypeSplitter::new(&paths::dumps_dir(self.work_dir()), &paths::split_pattern(date))?;
        for row in input {
            self.ctx.cancel.check()?;
            splitter.write(&row?)?;
        }
        let summary = splitter.finish()?;
        tracing::info!(
            partitions = summary.partitions.len(),
            rows = summary.total_rows(),
            "dump split by type"
        );
        self.mark(Stage::Split, &summary.paths(), Some(summary.total_rows()))?;
        Ok(StageOutcome::Ran)
    }

    /// Archive items for the run: the full dump with its per-type files,
    /// reading-log and ratings, and the history dump on its own.
    pub fn archive_items(&self) -> Result<Vec<ArchiveItem>> {
        let work = self.work_dir();
        let date = self.ctx.date;
        let mut dump_files = vec![paths::dump_path(work, date)];
        dump_files.extend(self.checkpoints.artifacts(date, Stage::Split)?);
        dump_files.push(paths::reading_log_path(work, date));
        dump_files.push(paths::ratings_path(work, date));
        Ok(vec![
            ArchiveItem::new(paths::dump_name(date), dump_files),
            ArchiveItem::new(paths::cdump_name(date), vec![paths::cdump_path(work, date)]),
        ])
    }

    fn archive(&self) -> Result<StageOutcome> {
        let store = self.collab.archive.ok_or_else(|| {
            DumpError::Config("archival requested but no archive store is configured".to_string())
        })?;
        let config = &self.ctx.config.archive;
        let archiver = Archiver::new(
            store,
            ArchiveMetadata::for_run(config, self.ctx.date),
            config.retries,
            config.retry_delay(),
        );
        let report = archiver.archive(&self.archive_items()?).into_result()?;
        tracing::info!(uploads = report.uploads(), items = report.items.len(), "archive complete");
        self.mark(Stage::Archive, &[], Some(report.uploads() as u64))?;
        Ok(StageOutcome::Ran)
    }

    fn sitemap(&self) -> Result<StageOutcome> {
        let generator = self
            .collab
            .sitemap
            .ok_or_else(|| DumpError::Sitemap("no sitemap generator configured".to_string()))?;
        let date = self.ctx.date;
        let out_dir = paths::sitemaps_dir(self.work_dir(), date);
        generator.generate(&paths::dump_path(self.work_dir(), date), date, &out_dir)?;
        self.mark(Stage::Sitemap, &[], None)?;
        Ok(StageOutcome::Ran)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DumpConfig;
    use crate::context::RunOptions;
    use crate::types::RunDate;
    use std::cell::{Cell, RefCell};
    use std::collections::HashSet;
    use std::io::Write;
    use tempfile::TempDir;

    fn date() -> RunDate {
        "2024-01-31".parse().unwrap()
    }

    fn raw_row(id: u64, key: &str, type_key: &str, revision: u64, modified: &str) -> String {
        let doc = serde_json::json!({
            "id": id,
            "key": key,
            "type": {"key": type_key},
            "revision": revision,
            "last_modified": {"type": "/type/datetime", "value": modified},
        });
        format!("{id}\t{revision}\t{doc}")
    }

    fn raw_rows() -> String {
        [
            raw_row(1, "/books/A", "/type/book", 1, "2020-01-01T00:00:00"),
            raw_row(2, "/books/A", "/type/book", 2, "2021-01-01T00:00:00"),
            raw_row(3, "/works/B", "/type/delete", 1, "2022-01-01T00:00:00"),
            raw_row(4, "/works/C", "/type/work", 1, "2024-02-05T00:00:00"),
            raw_row(5, "/people/alice", "/type/user", 1, "2023-01-01T00:00:00"),
            raw_row(6, "/works/D", "/type/work", 1, "2023-06-01T00:00:00"),
        ]
        .join("\n")
            + "\n"
    }

    #[derive(Default)]
    struct FakeExtractor {
        raw_calls: Cell<u32>,
        script_calls: Cell<u32>,
    }

    impl Extractor for FakeExtractor {
        fn extract(&self, query: &ExtractQuery, upto: RunDate, out: &mut dyn Write) -> Result<u64> {
            let data = match query {
                ExtractQuery::RawData => {
                    self.raw_calls.set(self.raw_calls.get() + 1);
                    raw_rows()
                }
                ExtractQuery::Script(path) => {
                    self.script_calls.set(self.script_calls.get() + 1);
                    format!("{}\t{upto}\n", path.display())
                }
            };
            out.write_all(data.as_bytes())?;
            Ok(data.len() as u64)
        }
    }

    #[derive(Default)]
    struct FakeStore {
        stored: RefCell<HashSet<String>>,
        uploads: RefCell<Vec<ArchiveItem>>,
    }

    impl ArchiveStore for FakeStore {
        fn exists(&self, item: &ArchiveItem) -> Result<bool> {
            Ok(self.stored.borrow().contains(&item.name))
        }

        fn upload(&self, item: &ArchiveItem, _metadata: &ArchiveMetadata) -> Result<()> {
            self.uploads.borrow_mut().push(item.clone());
            self.stored.borrow_mut().insert(item.name.clone());
            Ok(())
        }
    }

    /// Fails the first `failures` calls.
    #[derive(Default)]
    struct FakeSitemap {
        failures: Cell<u32>,
        calls: Cell<u32>,
    }

    impl SitemapGenerator for FakeSitemap {
        fn generate(&self, dump: &Path, _date: RunDate, out_dir: &Path) -> Result<()> {
            self.calls.set(self.calls.get() + 1);
            if self.failures.get() > 0 {
                self.failures.set(self.failures.get() - 1);
                return Err(DumpError::Sitemap("generator crashed".into()));
            }
            assert!(dump.exists());
            std::fs::create_dir_all(out_dir)?;
            std::fs::write(out_dir.join("sitemap_works.xml"), b"<urlset/>")?;
            Ok(())
        }
    }

    fn context(work: &Path, options: RunOptions) -> RunContext {
        let config = DumpConfig {
            work_dir: work.to_path_buf(),
            progress_every: 0,
            ..DumpConfig::default()
        };
        RunContext::new(date(), config, options)
    }

    fn run(
        ctx: RunContext,
        extractor: &FakeExtractor,
        store: Option<&FakeStore>,
        sitemap: Option<&FakeSitemap>,
    ) -> Result<RunReport> {
        let collab = Collaborators {
            extractor,
            archive: store.map(|s| s as &dyn ArchiveStore),
            sitemap: sitemap.map(|s| s as &dyn SitemapGenerator),
        };
        Orchestrator::new(ctx, collab)?.run()
    }

    fn lines(path: &Path) -> Vec<String> {
        codec::read_all_lines(path).unwrap()
    }

    fn keys(path: &Path) -> Vec<String> {
        lines(path)
            .iter()
            .map(|l| l.split('\t').nth(1).unwrap().to_string())
            .collect()
    }

    #[test]
    fn full_run_produces_every_artifact() {
        let dir = TempDir::new().unwrap();
        let work = dir.path();
        let extractor = FakeExtractor::default();
        let store = FakeStore::default();
        let sitemap = FakeSitemap::default();
        let options = RunOptions {
            archive: true,
            ..RunOptions::default()
        };

        let report = run(context(work, options), &extractor, Some(&store), Some(&sitemap)).unwrap();
        assert_eq!(report.executed(), Stage::all().len());

        let d = date();
        assert_eq!(
            keys(&paths::cdump_path(work, d)),
            vec!["/books/A", "/books/A", "/works/B", "/works/D"]
        );
        assert_eq!(keys(&paths::dump_path(work, d)), vec!["/books/A", "/works/D"]);
        let dump = lines(&paths::dump_path(work, d));
        assert!(dump[0].starts_with("/type/book\t/books/A\t2\t"));

        let dumps = paths::dumps_dir(work);
        assert_eq!(keys(&dumps.join("ol_dump_books_2024-01-31.txt.gz")), vec!["/books/A"]);
        assert_eq!(keys(&dumps.join("ol_dump_works_2024-01-31.txt.gz")), vec!["/works/D"]);
        assert!(!dumps.join("ol_dump_deletes_2024-01-31.txt.gz").exists());
        assert_eq!(lines(&paths::ratings_path(work, d)).len(), 1);
        assert_eq!(lines(&paths::reading_log_path(work, d)).len(), 1);

        let uploads = store.uploads.borrow();
        let names: Vec<&str> = uploads.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["ol_dump_2024-01-31", "ol_cdump_2024-01-31"]);
        assert_eq!(uploads[0].files.len(), 5);

        assert!(paths::sitemaps_dir(work, d).join("sitemap_works.xml").exists());
        assert!(report.raw_extract_removed);
        assert!(!paths::raw_extract_path(work).exists());
    }

    #[test]
    fn second_run_executes_nothing() {
        let dir = TempDir::new().unwrap();
        let extractor = FakeExtractor::default();
        let store = FakeStore::default();
        let options = RunOptions {
            archive: true,
            ..RunOptions::default()
        };
        run(context(dir.path(), options), &extractor, Some(&store), None).unwrap();
        let report = run(context(dir.path(), options), &extractor, Some(&store), None).unwrap();

        assert_eq!(report.executed(), 0);
        assert_eq!(report.outcome(Stage::CDump), Some(&StageOutcome::Skipped));
        assert_eq!(report.outcome(Stage::RawExtract), Some(&StageOutcome::Skipped));
        assert_eq!(extractor.raw_calls.get(), 1);
        assert_eq!(extractor.script_calls.get(), 2);
        assert_eq!(store.uploads.borrow().len(), 2);
    }

    #[test]
    fn failed_stage_resumes_where_it_stopped() {
        let dir = TempDir::new().unwrap();
        let extractor = FakeExtractor::default();
        let sitemap = FakeSitemap {
            failures: Cell::new(1),
            ..FakeSitemap::default()
        };

        let err = run(context(dir.path(), RunOptions::default()), &extractor, None, Some(&sitemap))
            .unwrap_err();
        match &err {
            DumpError::StageFailed { stage, date: d, .. } => {
                assert_eq!(*stage, Stage::Sitemap);
                assert_eq!(*d, date());
            }
            other => panic!("expected StageFailed, got {other:?}"),
        }
        assert!(err.to_string().contains("sitemap"));
        assert!(err.to_string().contains("2024-01-31"));
        // Failed runs keep the raw extract for the retry.
        assert!(paths::raw_extract_path(dir.path()).exists());

        let report =
            run(context(dir.path(), RunOptions::default()), &extractor, None, Some(&sitemap))
                .unwrap();
        assert_eq!(report.executed(), 1);
        assert_eq!(report.outcome(Stage::Sitemap), Some(&StageOutcome::Ran));
        assert_eq!(extractor.raw_calls.get(), 1);
        assert_eq!(sitemap.calls.get(), 2);
    }

    #[test]
    fn overwrite_reruns_every_stage() {
        let dir = TempDir::new().unwrap();
        let extractor = FakeExtractor::default();
        run(context(dir.path(), RunOptions::default()), &extractor, None, None).unwrap();

        let stray = paths::dumps_dir(dir.path()).join("ol_dump_stale_2024-01-31.txt.gz");
        std::fs::write(&stray, b"").unwrap();
        let options = RunOptions {
            overwrite: true,
            ..RunOptions::default()
        };
        let report = run(context(dir.path(), options), &extractor, None, None).unwrap();

        // archive and sitemap are suppressed
        assert_eq!(report.executed(), Stage::all().len() - 2);
        assert_eq!(extractor.raw_calls.get(), 2);
        assert!(!stray.exists());
        assert_eq!(
            keys(&paths::dump_path(dir.path(), date())),
            vec!["/books/A", "/works/D"]
        );
    }

    #[test]
    fn testing_mode_truncates_and_suppresses_archive() {
        let dir = TempDir::new().unwrap();
        let mut ctx = context(
            dir.path(),
            RunOptions {
                archive: true,
                ..RunOptions::default()
            },
        );
        ctx.config.max_records = Some(2);
        let extractor = FakeExtractor::default();

        let report = run(ctx, &extractor, None, None).unwrap();
        assert_eq!(
            report.outcome(Stage::Archive),
            Some(&StageOutcome::Suppressed("testing mode".into()))
        );
        assert_eq!(keys(&paths::cdump_path(dir.path(), date())), vec!["/books/A", "/books/A"]);
        assert!(!report.raw_extract_removed);
        assert!(paths::raw_extract_path(dir.path()).exists());
    }

    #[test]
    fn archive_without_store_is_a_config_error() {
        let dir = TempDir::new().unwrap();
        let options = RunOptions {
            archive: true,
            ..RunOptions::default()
        };
        let err = run(context(dir.path(), options), &FakeExtractor::default(), None, None)
            .unwrap_err();
        assert!(matches!(err, DumpError::Config(_)));
        assert!(!paths::dumps_dir(dir.path()).exists());
    }

    #[test]
    fn existing_raw_extract_is_reused_and_kept() {
        let dir = TempDir::new().unwrap();
        let raw = paths::raw_extract_path(dir.path());
        let mut writer = ArtifactWriter::create(&raw).unwrap();
        writer.write_line(raw_rows().trim_end()).unwrap();
        writer.commit().unwrap();

        let extractor = FakeExtractor::default();
        let options = RunOptions {
            reuse_raw_extract: true,
            ..RunOptions::default()
        };
        let report = run(context(dir.path(), options), &extractor, None, None).unwrap();
        assert_eq!(extractor.raw_calls.get(), 0);
        assert_eq!(report.outcome(Stage::RawExtract), Some(&StageOutcome::Skipped));
        assert!(raw.exists());
        assert_eq!(keys(&paths::dump_path(dir.path(), date())), vec!["/books/A", "/works/D"]);
    }

    #[test]
    fn missing_dump_reruns_sort_and_dump() {
        let dir = TempDir::new().unwrap();
        let extractor = FakeExtractor::default();
        run(context(dir.path(), RunOptions::default()), &extractor, None, None).unwrap();
        std::fs::remove_file(paths::dump_path(dir.path(), date())).unwrap();

        let report = run(context(dir.path(), RunOptions::default()), &extractor, None, None).unwrap();
        assert_eq!(report.outcome(Stage::Sort), Some(&StageOutcome::Ran));
        assert_eq!(report.outcome(Stage::Dump), Some(&StageOutcome::Ran));
        assert_eq!(report.outcome(Stage::CDump), Some(&StageOutcome::Skipped));
        assert_eq!(report.executed(), 2);
        assert!(paths::dump_path(dir.path(), date()).exists());
    }

    #[test]
    fn cancelled_run_fails_before_next_stage() {
        let dir = TempDir::new().unwrap();
        let ctx = context(dir.path(), RunOptions::default());
        ctx.cancel.cancel();
        let err = run(ctx, &FakeExtractor::default(), None, None).unwrap_err();
        match err {
            DumpError::StageFailed { stage, source, .. } => {
                assert_eq!(stage, Stage::ReadingLog);
                assert!(matches!(*source, DumpError::Cancelled));
            }
            other => panic!("expected StageFailed, got {other:?}"),
        }
    }
}
