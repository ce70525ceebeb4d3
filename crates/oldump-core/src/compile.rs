//! History compiler: turns raw data-table rows into history entries.
//!
//! A raw row is `thing_id \t revision \t document`, where `document` is a JSON
//! object in PostgreSQL text-COPY escaping. Each row yields at most one
//! [`HistoryEntry`], in input order. Rows that cannot be decoded are logged
//! and skipped until `max_malformed` is exceeded.

use crate::context::CancelToken;
use crate::error::{DumpError, Result};
use crate::record::HistoryEntry;
use crate::types::RunDate;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::io::{BufRead, Write};
use std::sync::OnceLock;
use std::time::Instant;

// ---------------------------------------------------------------------------
// Options / stats
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Stop after reading this many raw rows.
    pub max_records: Option<u64>,
    /// Drop revisions last modified after this date.
    pub upto: Option<RunDate>,
    pub exclude_private: bool,
    pub max_malformed: u64,
    pub progress_every: u64,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            max_records: None,
            upto: None,
            exclude_private: false,
            max_malformed: 1000,
            progress_every: 1_000_000,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CompileStats {
    pub rows_read: u64,
    pub emitted: u64,
    pub excluded: u64,
    pub after_cutoff: u64,
    pub malformed: u64,
}

// ---------------------------------------------------------------------------
// HistoryCompiler
// ---------------------------------------------------------------------------

enum Row {
    Entry(HistoryEntry),
    Excluded,
    AfterCutoff,
}

/// Single-pass iterator from raw rows to history entries.
pub struct HistoryCompiler<R> {
    reader: R,
    opts: CompileOptions,
    cancel: CancelToken,
    stats: CompileStats,
    buf: Vec<u8>,
    started: Instant,
    finished: bool,
}

impl<R: BufRead> HistoryCompiler<R> {
    pub fn new(reader: R, opts: CompileOptions, cancel: CancelToken) -> Self {
        Self {
            reader,
            opts,
            cancel,
            stats: CompileStats::default(),
            buf: Vec::new(),
            started: Instant::now(),
            finished: false,
        }
    }

    pub fn stats(&self) -> &CompileStats {
        &self.stats
    }

    fn fail(&mut self, err: DumpError) -> Option<Result<HistoryEntry>> {
        self.finished = true;
        Some(Err(err))
    }

    fn row(&self, line: &[u8]) -> std::result::Result<Row, String> {
        let line = std::str::from_utf8(line).map_err(|e| format!("invalid utf-8: {e}"))?;
        let entry = parse_raw_row(line)?;
        if self.opts.exclude_private && is_excluded(&entry.key) {
            return Ok(Row::Excluded);
        }
        if let Some(upto) = self.opts.upto {
            match upto.includes(&entry.last_modified) {
                Some(true) => {}
                Some(false) => return Ok(Row::AfterCutoff),
                None => {
                    return Err(format!(
                        "invalid last_modified '{}'",
                        entry.last_modified
                    ))
                }
            }
        }
        Ok(Row::Entry(entry))
    }
}

impl<R: BufRead> Iterator for HistoryCompiler<R> {
    type Item = Result<HistoryEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.finished {
            if let Err(e) = self.cancel.check() {
                return self.fail(e);
            }
            if self.opts.max_records.is_some_and(|max| self.stats.rows_read >= max) {
                tracing::info!(rows = self.stats.rows_read, "record cap reached, truncating");
                self.finished = true;
                break;
            }

            self.buf.clear();
            match self.reader.read_until(b'\n', &mut self.buf) {
                Ok(0) => {
                    self.finished = true;
                    break;
                }
                Ok(_) => {}
                Err(e) => return self.fail(e.into()),
            }
            self.stats.rows_read += 1;
            let rows = self.stats.rows_read;
            if self.opts.progress_every > 0 && rows % self.opts.progress_every == 0 {
                tracing::info!(
                    rows,
                    emitted = self.stats.emitted,
                    elapsed_s = self.started.elapsed().as_secs(),
                    "cdump progress"
                );
            }

            match self.row(&self.buf) {
                Ok(Row::Entry(entry)) => {
                    self.stats.emitted += 1;
                    return Some(Ok(entry));
                }
                Ok(Row::Excluded) => self.stats.excluded += 1,
                Ok(Row::AfterCutoff) => self.stats.after_cutoff += 1,
                Err(reason) => {
                    self.stats.malformed += 1;
                    tracing::warn!(line = rows, %reason, "skipping malformed row");
                    if self.stats.malformed > self.opts.max_malformed {
                        return self.fail(DumpError::TooManyMalformed {
                            count: self.stats.malformed,
                            limit: self.opts.max_malformed,
                        });
                    }
                }
            }
        }
        None
    }
}

/// Compile `reader` into history lines on `writer`.
pub fn compile<R: BufRead, W: Write>(
    reader: R,
    writer: &mut W,
    opts: CompileOptions,
    cancel: CancelToken,
) -> Result<CompileStats> {
    let mut compiler = HistoryCompiler::new(reader, opts, cancel);
    for entry in compiler.by_ref() {
        entry?.write_line(writer)?;
    }
    writer.flush()?;
    Ok(compiler.stats().clone())
}

// ---------------------------------------------------------------------------
// Row decoding
// ---------------------------------------------------------------------------

fn parse_raw_row(line: &str) -> std::result::Result<HistoryEntry, String> {
    let line = line.trim_end_matches(['\n', '\r']);
    let mut cols = line.splitn(3, '\t');
    let (Some(_thing_id), Some(revision_col), Some(document)) =
        (cols.next(), cols.next(), cols.next())
    else {
        return Err("expected 3 tab-separated columns".to_string());
    };

    let document = pg_unescape(document)?;
    let mut doc: serde_json::Map<String, Value> =
        serde_json::from_str(&document).map_err(|e| format!("invalid json: {e}"))?;
    doc.shift_remove("id");

    let key = doc
        .get("key")
        .and_then(Value::as_str)
        .ok_or("document has no key")?
        .to_string();
    let type_key = doc
        .get("type")
        .and_then(|t| t.get("key"))
        .and_then(Value::as_str)
        .ok_or("document has no type.key")?
        .to_string();
    let revision = match doc.get("revision").and_then(Value::as_u64) {
        Some(rev) => rev,
        None => revision_col
            .parse::<u64>()
            .map_err(|_| format!("invalid revision '{revision_col}'"))?,
    };
    let last_modified = doc
        .get("last_modified")
        .and_then(|t| t.get("value"))
        .and_then(Value::as_str)
        .ok_or("document has no last_modified.value")?
        .to_string();

    for (name, value) in [("key", &key), ("type", &type_key), ("last_modified", &last_modified)] {
        if value.contains(char::is_control) {
            return Err(format!("{name} contains a control character"));
        }
    }
    // A type that cannot name a split partition would fail every later split.
    crate::split::partition_name(&type_key).map_err(|e| e.to_string())?;

    let json = serde_json::to_string(&doc).map_err(|e| e.to_string())?;
    Ok(HistoryEntry::new(type_key, key, revision, last_modified, json))
}

/// Undo PostgreSQL text-format COPY escaping.
pub fn pg_unescape(field: &str) -> std::result::Result<String, String> {
    if !field.contains('\\') {
        return Ok(field.to_string());
    }
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b != b'\\' {
            out.push(b);
            i += 1;
            continue;
        }
        let Some(&next) = bytes.get(i + 1) else {
            return Err("dangling backslash".to_string());
        };
        i += 2;
        match next {
            b'b' => out.push(0x08),
            b'f' => out.push(0x0c),
            b'n' => out.push(b'\n'),
            b'r' => out.push(b'\r'),
            b't' => out.push(b'\t'),
            b'v' => out.push(0x0b),
            b'0'..=b'7' => {
                let mut value = u32::from(next - b'0');
                let mut digits = 1;
                while digits < 3 {
                    match bytes.get(i) {
                        Some(d @ b'0'..=b'7') => {
                            value = value * 8 + u32::from(d - b'0');
                            i += 1;
                            digits += 1;
                        }
                        _ => break,
                    }
                }
                out.push((value & 0xff) as u8);
            }
            b'x' => {
                let mut value = 0u32;
                let mut digits = 0;
                while digits < 2 {
                    match bytes.get(i).and_then(|d| (*d as char).to_digit(16)) {
                        Some(d) => {
                            value = value * 16 + d;
                            i += 1;
                            digits += 1;
                        }
                        None => break,
                    }
                }
                if digits == 0 {
                    return Err("\\x escape without hex digits".to_string());
                }
                out.push(value as u8);
            }
            other => out.push(other),
        }
    }
    String::from_utf8(out).map_err(|e| format!("invalid utf-8 after unescape: {e}"))
}

// ---------------------------------------------------------------------------
// Key exclusion
// ---------------------------------------------------------------------------

static PUBLIC_LIST_RE: OnceLock<Regex> = OnceLock::new();

fn public_list_re() -> &'static Regex {
    PUBLIC_LIST_RE.get_or_init(|| Regex::new(r"^/people/[^/]+/lists/OL\d+L$").unwrap())
}

const OBSOLETE_PREFIXES: &[&str] = &["/admin/", "/b/", "/scan", "/old/"];

/// User pages (other than public lists), admin pages and obsolete pages are
/// never published.
pub fn is_excluded(key: &str) -> bool {
    if !key.starts_with('/') {
        return true;
    }
    if key.starts_with("/people/") && !public_list_re().is_match(key) {
        return true;
    }
    OBSOLETE_PREFIXES.iter().any(|p| key.starts_with(p))
}
