//! The individual stream transforms, usable on their own or chained with
//! shell pipes (`-` reads stdin, no `--output` writes stdout).

use crate::output::{eprint_json, print_json, print_table};
use anyhow::Context;
use oldump_core::codec::{self, ArtifactWriter};
use oldump_core::compile::{self, CompileOptions};
use oldump_core::config::DumpConfig;
use oldump_core::context::CancelToken;
use oldump_core::record::EntryReader;
use oldump_core::reduce::LatestRevisions;
use oldump_core::sort::{ExternalSorter, SortOptions};
use oldump_core::split;
use oldump_core::types::RunDate;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

fn open_input(path: &Path) -> anyhow::Result<Box<dyn BufRead + Send>> {
    if path == Path::new("-") {
        return Ok(Box::new(BufReader::new(std::io::stdin())));
    }
    codec::open_lines(path).with_context(|| format!("failed to open {}", path.display()))
}

/// Run `write` against the output file (committed only on success) or stdout.
fn with_output<T>(
    output: Option<&Path>,
    write: impl FnOnce(&mut dyn Write) -> anyhow::Result<T>,
) -> anyhow::Result<T> {
    match output {
        Some(path) => {
            let mut writer = ArtifactWriter::create(path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            let value = write(&mut writer)?;
            writer
                .commit()
                .with_context(|| format!("failed to commit {}", path.display()))?;
            Ok(value)
        }
        None => {
            let stdout = std::io::stdout();
            let mut out = BufWriter::new(stdout.lock());
            let value = write(&mut out)?;
            out.flush()?;
            Ok(value)
        }
    }
}

// ---------------------------------------------------------------------------
// cdump
// ---------------------------------------------------------------------------

pub fn cdump(
    input: &Path,
    output: Option<&Path>,
    upto: Option<&str>,
    max_records: Option<u64>,
    exclude_private: bool,
    json: bool,
) -> anyhow::Result<()> {
    let upto = upto.map(str::parse::<RunDate>).transpose()?;
    let opts = CompileOptions {
        max_records,
        upto,
        exclude_private,
        ..CompileOptions::default()
    };
    let reader = open_input(input)?;
    let stats = with_output(output, |mut out| {
        Ok(compile::compile(reader, &mut out, opts, CancelToken::new())?)
    })?;
    tracing::info!(
        rows = stats.rows_read,
        emitted = stats.emitted,
        excluded = stats.excluded,
        after_cutoff = stats.after_cutoff,
        malformed = stats.malformed,
        "history compiled"
    );
    if json {
        eprint_json(&stats)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// sort
// ---------------------------------------------------------------------------

pub fn sort(
    config: Option<&Path>,
    input: &Path,
    scratch_dir: Option<PathBuf>,
    output: Option<&Path>,
    buffer_bytes: Option<usize>,
) -> anyhow::Result<()> {
    let config = DumpConfig::load(config).context("failed to load config")?;
    let scratch_dir = scratch_dir
        .or_else(|| config.scratch_dir.clone())
        .unwrap_or_else(std::env::temp_dir);
    let opts = SortOptions {
        buffer_bytes: buffer_bytes.unwrap_or(config.sort_buffer_bytes),
        merge_fan_in: config.merge_fan_in,
        progress_every: config.progress_every,
        ..SortOptions::new(scratch_dir)
    };
    let entries = EntryReader::new(open_input(input)?);
    let sorted = ExternalSorter::new(opts, CancelToken::new())
        .sort(entries)
        .context("sort failed")?;
    with_output(output, |out| {
        for entry in sorted {
            entry?.write_line(out)?;
        }
        Ok(())
    })
}

// ---------------------------------------------------------------------------
// dump
// ---------------------------------------------------------------------------

pub fn dump(input: &Path, output: Option<&Path>, json: bool) -> anyhow::Result<()> {
    let mut rows = LatestRevisions::new(EntryReader::new(open_input(input)?));
    with_output(output, |out| {
        for row in rows.by_ref() {
            row?.write_line(out)?;
        }
        Ok(())
    })?;
    let stats = rows.stats();
    tracing::info!(
        entries = stats.entries,
        keys = stats.groups,
        emitted = stats.emitted,
        deleted = stats.deleted,
        "latest revisions written"
    );
    if json {
        eprint_json(stats)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// split
// ---------------------------------------------------------------------------

pub fn split(input: &Path, format: &str, dir: &Path, json: bool) -> anyhow::Result<()> {
    let rows = EntryReader::new(open_input(input)?);
    let summary = split::split(rows, dir, format)
        .with_context(|| format!("failed to split into {}", dir.display()))?;

    if json {
        return print_json(&summary);
    }
    let rows: Vec<Vec<String>> = summary
        .partitions
        .iter()
        .map(|(name, p)| vec![name.clone(), p.rows.to_string(), p.path.display().to_string()])
        .collect();
    print_table(&["TYPE", "ROWS", "FILE"], rows);
    Ok(())
}
