//! External merge sort of history entries by `(key, revision)`.
//!
//! # Pipeline
//!
//! 1. Buffer entries until the byte budget is reached, sort the buffer
//!    (stable), spill it as a gzip run file in a private scratch directory.
//! 2. While there are more runs than the merge fan-in, merge groups of runs
//!    into larger runs.
//! 3. Stream the final k-way merge to the caller.
//!
//! Entries with equal `(key, revision)` keep their input order: buffers are
//! sorted stably and the merge breaks ties by run number. The scratch
//! directory is removed when the returned [`SortedEntries`] is dropped, on
//! success and on error alike.

use crate::codec::{self, ArtifactWriter};
use crate::context::CancelToken;
use crate::error::{DumpError, Result};
use crate::io;
use crate::paths::SCRATCH_PREFIX;
use crate::record::{EntryReader, HistoryEntry};
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tempfile::TempDir;

#[derive(Debug, Clone)]
pub struct SortOptions {
    /// Parent directory for the private scratch directory.
    pub scratch_dir: PathBuf,
    /// Approximate in-memory budget for one run.
    pub buffer_bytes: usize,
    /// Maximum number of runs merged at once.
    pub merge_fan_in: usize,
    pub progress_every: u64,
}

impl SortOptions {
    pub fn new(scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            scratch_dir: scratch_dir.into(),
            buffer_bytes: 512 * 1024 * 1024,
            merge_fan_in: 64,
            progress_every: 1_000_000,
        }
    }
}

pub fn compare(a: &HistoryEntry, b: &HistoryEntry) -> Ordering {
    a.key
        .as_str()
        .cmp(b.key.as_str())
        .then(a.revision.cmp(&b.revision))
}

/// Remove scratch directories left behind by runs that were killed before
/// they could clean up. Returns the number removed.
pub fn remove_stale_scratch(scratch_dir: &Path) -> Result<usize> {
    let entries = match std::fs::read_dir(scratch_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };
    let mut removed = 0;
    for entry in entries {
        let entry = entry?;
        let is_scratch = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with(SCRATCH_PREFIX));
        if is_scratch && entry.file_type()?.is_dir() {
            tracing::warn!(path = %entry.path().display(), "removing stale sort scratch");
            io::remove_path(&entry.path())?;
            removed += 1;
        }
    }
    Ok(removed)
}

// ---------------------------------------------------------------------------
// ExternalSorter
// ---------------------------------------------------------------------------

pub struct ExternalSorter {
    opts: SortOptions,
    cancel: CancelToken,
}

impl ExternalSorter {
    pub fn new(opts: SortOptions, cancel: CancelToken) -> Self {
        Self { opts, cancel }
    }

    /// Consume `input` completely and return the sorted stream.
    pub fn sort<I>(&self, input: I) -> Result<SortedEntries>
    where
        I: IntoIterator<Item = Result<HistoryEntry>>,
    {
        let start = Instant::now();
        io::ensure_dir(&self.opts.scratch_dir)?;
        let scratch = tempfile::Builder::new()
            .prefix(SCRATCH_PREFIX)
            .tempdir_in(&self.opts.scratch_dir)?;
        tracing::info!(path = %scratch.path().display(), "sort scratch created");

        let mut runs: Vec<PathBuf> = Vec::new();
        let mut buffer: Vec<HistoryEntry> = Vec::new();
        let mut buffered_bytes = 0usize;
        let mut total: u64 = 0;

        for entry in input {
            self.cancel.check()?;
            let entry = entry?;
            buffered_bytes += entry.size_hint();
            buffer.push(entry);
            total += 1;
            if self.opts.progress_every > 0 && total % self.opts.progress_every == 0 {
                tracing::info!(
                    entries = total,
                    runs = runs.len(),
                    elapsed_s = start.elapsed().as_secs(),
                    "sort progress"
                );
            }
            if buffered_bytes >= self.opts.buffer_bytes {
                runs.push(self.spill(scratch.path(), runs.len(), &mut buffer)?);
                buffered_bytes = 0;
            }
        }

        if runs.is_empty() {
            // Everything fit in memory; skip the disk round trip.
            buffer.sort_by(compare);
            tracing::info!(entries = total, "sorted in memory");
            return Ok(SortedEntries {
                source: Source::Memory(buffer.into_iter()),
                _scratch: scratch,
            });
        }
        if !buffer.is_empty() {
            runs.push(self.spill(scratch.path(), runs.len(), &mut buffer)?);
        }
        tracing::info!(entries = total, runs = runs.len(), "spill phase complete");

        let fan_in = self.opts.merge_fan_in.max(2);
        let mut next_id = runs.len();
        while runs.len() > fan_in {
            let mut merged = Vec::with_capacity(runs.len() / fan_in + 1);
            for group in runs.chunks(fan_in) {
                merged.push(self.merge_to_run(scratch.path(), next_id, group)?);
                next_id += 1;
            }
            for path in &runs {
                io::remove_path(path)?;
            }
            tracing::info!(runs = merged.len(), "intermediate merge pass complete");
            runs = merged;
        }

        let merge = KWayMerge::open(&runs)?;
        tracing::info!(
            runs = runs.len(),
            elapsed_s = start.elapsed().as_secs(),
            "final merge ready"
        );
        Ok(SortedEntries {
            source: Source::Merge(merge),
            _scratch: scratch,
        })
    }

    fn spill(&self, dir: &Path, id: usize, buffer: &mut Vec<HistoryEntry>) -> Result<PathBuf> {
        buffer.sort_by(compare);
        let path = run_path(dir, id);
        let mut writer = ArtifactWriter::create(&path)?;
        for entry in buffer.drain(..) {
            entry.write_line(&mut writer)?;
            writer.record_line();
        }
        tracing::debug!(run = id, entries = writer.lines(), "run spilled");
        writer.commit()
    }

    fn merge_to_run(&self, dir: &Path, id: usize, group: &[PathBuf]) -> Result<PathBuf> {
        let path = run_path(dir, id);
        let mut writer = ArtifactWriter::create(&path)?;
        for entry in KWayMerge::open(group)? {
            self.cancel.check()?;
            entry?.write_line(&mut writer)?;
            writer.record_line();
        }
        writer.commit()
    }
}

fn run_path(dir: &Path, id: usize) -> PathBuf {
    dir.join(format!("run_{id:06}.txt.gz"))
}

// ---------------------------------------------------------------------------
// SortedEntries
// ---------------------------------------------------------------------------

enum Source {
    Memory(std::vec::IntoIter<HistoryEntry>),
    Merge(KWayMerge),
}

/// Sorted output stream. Owns the scratch directory.
pub struct SortedEntries {
    source: Source,
    _scratch: TempDir,
}

impl Iterator for SortedEntries {
    type Item = Result<HistoryEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.source {
            Source::Memory(iter) => iter.next().map(Ok),
            Source::Merge(merge) => merge.next(),
        }
    }
}

// ---------------------------------------------------------------------------
// KWayMerge
// ---------------------------------------------------------------------------

struct HeapItem {
    entry: HistoryEntry,
    run: usize,
}

impl Ord for HeapItem {
    fn cmp(&self, other: &Self) -> Ordering {
        compare(&self.entry, &other.entry).then(self.run.cmp(&other.run))
    }
}

impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for HeapItem {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapItem {}

type RunReader = EntryReader<Box<dyn BufRead + Send>>;

struct KWayMerge {
    readers: Vec<RunReader>,
    heap: BinaryHeap<Reverse<HeapItem>>,
    failed: bool,
}

impl KWayMerge {
    fn open(runs: &[PathBuf]) -> Result<Self> {
        let mut readers = Vec::with_capacity(runs.len());
        let mut heap = BinaryHeap::with_capacity(runs.len());
        for (run, path) in runs.iter().enumerate() {
            let mut reader = EntryReader::new(codec::open_lines(path)?);
            if let Some(entry) = reader.next() {
                heap.push(Reverse(HeapItem { entry: entry?, run }));
            }
            readers.push(reader);
        }
        Ok(Self {
            readers,
            heap,
            failed: false,
        })
    }
}

impl Iterator for KWayMerge {
    type Item = Result<HistoryEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let Reverse(HeapItem { entry, run }) = self.heap.pop()?;
        match self.readers[run].next() {
            Some(Ok(next)) => self.heap.push(Reverse(HeapItem { entry: next, run })),
            Some(Err(e)) => {
                self.failed = true;
                return Some(Err(match e {
                    DumpError::Malformed { line, reason } => DumpError::Malformed {
                        line,
                        reason: format!("sort run {run}: {reason}"),
                    },
                    other => other,
                }));
            }
            None => {}
        }
        Some(Ok(entry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(key: &str, revision: u64, tag: &str) -> HistoryEntry {
        HistoryEntry::new("/type/edition", key, revision, "t", tag)
    }

    fn sorter(scratch: &Path, buffer_bytes: usize, fan_in: usize) -> ExternalSorter {
        let opts = SortOptions {
            buffer_bytes,
            merge_fan_in: fan_in,
            ..SortOptions::new(scratch)
        };
        ExternalSorter::new(opts, CancelToken::new())
    }

    fn shuffled(n: u64) -> Vec<HistoryEntry> {
        // Deterministic scramble: 7919 is coprime with the sizes used here.
        (0..n)
            .map(|i| {
                let j = (i * 7919) % n;
                entry(&format!("/books/OL{}M", j % 37), j % 11, &format!("{i}"))
            })
            .collect()
    }

    fn assert_sorted(entries: &[HistoryEntry]) {
        for pair in entries.windows(2) {
            assert_ne!(
                compare(&pair[0], &pair[1]),
                Ordering::Greater,
                "{} / {} before {} / {}",
                pair[0].key,
                pair[0].revision,
                pair[1].key,
                pair[1].revision
            );
        }
    }

    #[test]
    fn in_memory_sort_orders_by_key_then_revision() {
        let scratch = TempDir::new().unwrap();
        let input = vec![entry("B", 1, "b1"), entry("A", 2, "a2"), entry("A", 1, "a1")];
        let out: Vec<_> = sorter(scratch.path(), usize::MAX, 64)
            .sort(input.into_iter().map(Ok))
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        let tags: Vec<_> = out.iter().map(|e| e.json.as_str()).collect();
        assert_eq!(tags, vec!["a1", "a2", "b1"]);
    }

    #[test]
    fn spilled_sort_is_total_and_lossless() {
        let scratch = TempDir::new().unwrap();
        let input = shuffled(997);
        // Tiny budget and fan-in force spills and intermediate merge passes.
        let out: Vec<_> = sorter(scratch.path(), 2048, 3)
            .sort(input.clone().into_iter().map(Ok))
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(out.len(), input.len());
        assert_sorted(&out);

        let mut expected: Vec<_> = input.iter().map(|e| e.json.clone()).collect();
        let mut actual: Vec<_> = out.iter().map(|e| e.json.clone()).collect();
        expected.sort();
        actual.sort();
        assert_eq!(expected, actual);
    }

    #[test]
    fn equal_keys_keep_input_order_across_runs() {
        let scratch = TempDir::new().unwrap();
        let input: Vec<_> = (0..200).map(|i| entry("same", 1, &format!("{i:03}"))).collect();
        let out: Vec<_> = sorter(scratch.path(), 1024, 2)
            .sort(input.into_iter().map(Ok))
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        let tags: Vec<_> = out.iter().map(|e| e.json.clone()).collect();
        let expected: Vec<_> = (0..200).map(|i| format!("{i:03}")).collect();
        assert_eq!(tags, expected);
    }

    #[test]
    fn scratch_is_removed_after_drop() {
        let scratch = TempDir::new().unwrap();
        let sorted = sorter(scratch.path(), 512, 4)
            .sort(shuffled(300).into_iter().map(Ok))
            .unwrap();
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 1);
        drop(sorted);
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
    }

    #[test]
    fn input_error_aborts_and_cleans_scratch() {
        let scratch = TempDir::new().unwrap();
        let input = vec![
            Ok(entry("A", 1, "a")),
            Err(DumpError::Malformed {
                line: 2,
                reason: "bad".into(),
            }),
        ];
        assert!(sorter(scratch.path(), 16, 4).sort(input).is_err());
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
    }

    #[test]
    fn stale_scratch_dirs_are_removed() {
        let scratch = TempDir::new().unwrap();
        std::fs::create_dir_all(scratch.path().join(format!("{SCRATCH_PREFIX}abc/inner"))).unwrap();
        std::fs::create_dir_all(scratch.path().join("keep-me")).unwrap();
        assert_eq!(remove_stale_scratch(scratch.path()).unwrap(), 1);
        assert!(scratch.path().join("keep-me").exists());
        assert_eq!(remove_stale_scratch(&scratch.path().join("missing")).unwrap(), 0);
    }
}
