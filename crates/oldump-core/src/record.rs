//! History entries and the five-column line format shared by the history
//! dump, the sorted stream and the latest-state dump:
//!
//! ```text
//! type \t key \t revision \t last_modified \t json
//! ```

use crate::error::{DumpError, Result};
use std::fmt;
use std::io::{self, BufRead, Write};

/// Type tag carried by deleted records.
pub const DELETE_TYPE: &str = "/type/delete";

/// One revision of one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub type_key: String,
    pub key: String,
    pub revision: u64,
    pub deleted: bool,
    pub last_modified: String,
    pub json: String,
}

impl HistoryEntry {
    pub fn new(
        type_key: impl Into<String>,
        key: impl Into<String>,
        revision: u64,
        last_modified: impl Into<String>,
        json: impl Into<String>,
    ) -> Self {
        let type_key = type_key.into();
        Self {
            deleted: type_key == DELETE_TYPE,
            type_key,
            key: key.into(),
            revision,
            last_modified: last_modified.into(),
            json: json.into(),
        }
    }

    /// Parse one line of the history format. A trailing newline is ignored.
    pub fn parse(line: &str) -> std::result::Result<Self, String> {
        let line = line.trim_end_matches(['\n', '\r']);
        let mut cols = line.splitn(5, '\t');
        let mut next = |name: &str| {
            cols.next()
                .ok_or_else(|| format!("missing column '{name}'"))
        };
        let type_key = next("type")?;
        let key = next("key")?;
        let revision = next("revision")?;
        let last_modified = next("last_modified")?;
        let json = next("json")?;

        if key.is_empty() {
            return Err("empty key".to_string());
        }
        let revision = revision
            .parse::<u64>()
            .map_err(|_| format!("invalid revision '{revision}'"))?;
        Ok(Self::new(type_key, key, revision, last_modified, json))
    }

    /// Approximate heap footprint, used for sort buffer accounting.
    pub fn size_hint(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.type_key.len()
            + self.key.len()
            + self.last_modified.len()
            + self.json.len()
    }

    pub fn write_line<W: Write + ?Sized>(&self, w: &mut W) -> io::Result<()> {
        writeln!(w, "{self}")
    }
}

impl fmt::Display for HistoryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\t{}\t{}\t{}\t{}",
            self.type_key, self.key, self.revision, self.last_modified, self.json
        )
    }
}

// ---------------------------------------------------------------------------
// EntryReader
// ---------------------------------------------------------------------------

/// Iterator over the history entries of a line stream.
///
/// Input to this reader is produced by the pipeline itself, so a bad line is
/// a hard error rather than something to skip.
pub struct EntryReader<R> {
    reader: R,
    buf: String,
    line: u64,
}

impl<R: BufRead> EntryReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: String::new(),
            line: 0,
        }
    }
}

impl<R: BufRead> Iterator for EntryReader<R> {
    type Item = Result<HistoryEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.buf.clear();
            match self.reader.read_line(&mut self.buf) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(e) => return Some(Err(e.into())),
            }
            self.line += 1;
            if self.buf.trim_end_matches(['\n', '\r']).is_empty() {
                continue;
            }
            return Some(HistoryEntry::parse(&self.buf).map_err(|reason| {
                DumpError::Malformed {
                    line: self.line,
                    reason,
                }
            }));
        }
    }
}
