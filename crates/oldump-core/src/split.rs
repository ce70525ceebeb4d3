//! Type splitter: partitions dump rows into one file per type.

use crate::codec::ArtifactWriter;
use crate::error::{DumpError, Result};
use crate::record::HistoryEntry;
use regex::Regex;
use serde::Serialize;
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

static PARTITION_RE: OnceLock<Regex> = OnceLock::new();

fn partition_re() -> &'static Regex {
    PARTITION_RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]*$").unwrap())
}

/// Tokens already taken by the ratings and reading-log artifacts.
const RESERVED_PARTITIONS: &[&str] = &["ratings", "reading-log"];

/// File-name token for a type tag: its last path segment, pluralized.
///
/// `/type/edition` becomes `editions`; a bare `book` becomes `books`.
pub fn partition_name(type_key: &str) -> Result<String> {
    let last = type_key.rsplit('/').next().unwrap_or_default();
    if !partition_re().is_match(last) {
        return Err(DumpError::InvalidType(type_key.to_string()));
    }
    let name = format!("{last}s");
    if RESERVED_PARTITIONS.contains(&name.as_str()) {
        return Err(DumpError::InvalidType(type_key.to_string()));
    }
    Ok(name)
}

/// Check that `pattern` has exactly one `%s` placeholder.
pub fn validate_pattern(pattern: &str) -> Result<()> {
    if pattern.matches("%s").count() != 1 {
        return Err(DumpError::InvalidPattern(pattern.to_string()));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Partition {
    pub path: PathBuf,
    pub rows: u64,
}

/// Result of a completed split, keyed by partition name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SplitSummary {
    pub partitions: BTreeMap<String, Partition>,
}

impl SplitSummary {
    pub fn total_rows(&self) -> u64 {
        self.partitions.values().map(|p| p.rows).sum()
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.partitions.values().map(|p| p.path.clone()).collect()
    }
}

pub struct TypeSplitter {
    dir: PathBuf,
    pattern: String,
    /// Partition name to the writer and the type that opened it.
    writers: BTreeMap<String, (String, ArtifactWriter)>,
}

impl TypeSplitter {
    /// Files are created in `dir`, named by substituting the partition name
    /// into `pattern`.
    pub fn new(dir: &Path, pattern: &str) -> Result<Self> {
        validate_pattern(pattern)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            pattern: pattern.to_string(),
            writers: BTreeMap::new(),
        })
    }

    pub fn write(&mut self, row: &HistoryEntry) -> Result<()> {
        let name = partition_name(&row.type_key)?;
        let (owner, writer) = match self.writers.entry(name) {
            Entry::Occupied(slot) => slot.into_mut(),
            Entry::Vacant(slot) => {
                let path = self.dir.join(self.pattern.replacen("%s", slot.key(), 1));
                tracing::info!(partition = %slot.key(), path = %path.display(), "opening partition");
                slot.insert((row.type_key.clone(), ArtifactWriter::create(&path)?))
            }
        };
        if *owner != row.type_key {
            return Err(DumpError::PartitionCollision {
                partition: partition_name(owner)?,
                first: owner.clone(),
                second: row.type_key.clone(),
            });
        }
        row.write_line(writer)?;
        writer.record_line();
        Ok(())
    }

    /// Commit every partition. Nothing is visible under a final name until
    /// this is called.
    pub fn finish(self) -> Result<SplitSummary> {
        let mut summary = SplitSummary::default();
        for (name, (_, writer)) in self.writers {
            let rows = writer.lines();
            let path = writer.commit()?;
            tracing::info!(partition = %name, rows, "partition complete");
            summary.partitions.insert(name, Partition { path, rows });
        }
        Ok(summary)
    }
}

/// Split a stream of dump rows.
pub fn split<I>(rows: I, dir: &Path, pattern: &str) -> Result<SplitSummary>
where
    I: IntoIterator<Item = Result<HistoryEntry>>,
{
    let mut splitter = TypeSplitter::new(dir, pattern)?;
    for row in rows {
        splitter.write(&row?)?;
    }
    splitter.finish()
}
