//! Line-oriented, optionally gzip-compressed streams.
//!
//! Every stage reads and writes newline-delimited text. Files whose name ends
//! in `.gz` are transparently (de)compressed. Output files are written under a
//! temporary name in the destination directory and only appear under their
//! final name once [`ArtifactWriter::commit`] succeeds, so a final name on
//! disk always means a complete file.

use crate::error::Result;
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

const BUF_SIZE: usize = 1 << 20;

pub fn is_gzip(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "gz")
}

/// Open `path` for buffered line reading, decompressing `.gz` files.
///
/// Concatenated gzip members are read as one stream.
pub fn open_lines(path: &Path) -> Result<Box<dyn BufRead + Send>> {
    let file = File::open(path)?;
    if is_gzip(path) {
        Ok(Box::new(BufReader::with_capacity(
            BUF_SIZE,
            MultiGzDecoder::new(file),
        )))
    } else {
        Ok(Box::new(BufReader::with_capacity(BUF_SIZE, file)))
    }
}

// ---------------------------------------------------------------------------
// ArtifactWriter
// ---------------------------------------------------------------------------

enum Sink {
    Gzip(GzEncoder<BufWriter<NamedTempFile>>),
    Plain(BufWriter<NamedTempFile>),
}

/// Streaming writer for a stage output file with all-or-nothing visibility.
///
/// Dropping the writer without calling [`commit`](Self::commit) deletes the
/// partial temp file.
pub struct ArtifactWriter {
    sink: Sink,
    dest: PathBuf,
    lines: u64,
}

impl ArtifactWriter {
    pub fn create(dest: &Path) -> Result<Self> {
        let dir = match dest.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;
        let tmp = tempfile::Builder::new()
            .prefix(".partial-")
            .tempfile_in(dir)?;
        let buffered = BufWriter::with_capacity(BUF_SIZE, tmp);
        let sink = if is_gzip(dest) {
            Sink::Gzip(GzEncoder::new(buffered, Compression::default()))
        } else {
            Sink::Plain(buffered)
        };
        Ok(Self {
            sink,
            dest: dest.to_path_buf(),
            lines: 0,
        })
    }

    /// Write one line; a trailing newline is appended.
    pub fn write_line(&mut self, line: &str) -> Result<()> {
        self.write_all(line.as_bytes())?;
        self.write_all(b"\n")?;
        self.lines += 1;
        Ok(())
    }

    /// Count a line written through the [`Write`] impl.
    pub fn record_line(&mut self) {
        self.lines += 1;
    }

    pub fn lines(&self) -> u64 {
        self.lines
    }

    /// Finish compression, flush to disk and rename to the final name.
    pub fn commit(self) -> Result<PathBuf> {
        let buffered = match self.sink {
            Sink::Gzip(encoder) => encoder.finish()?,
            Sink::Plain(buffered) => buffered,
        };
        let tmp = buffered.into_inner().map_err(|e| e.into_error())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.dest).map_err(|e| e.error)?;
        tracing::debug!(path = %self.dest.display(), lines = self.lines, "artifact committed");
        Ok(self.dest)
    }
}

impl Write for ArtifactWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.sink {
            Sink::Gzip(w) => w.write(buf),
            Sink::Plain(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.sink {
            Sink::Gzip(w) => w.flush(),
            Sink::Plain(w) => w.flush(),
        }
    }
}

/// Read a whole `.gz` or plain file into lines. Test and tooling helper for
/// small files only.
pub fn read_all_lines(path: &Path) -> Result<Vec<String>> {
    let reader = open_lines(path)?;
    let mut lines = Vec::new();
    for line in reader.lines() {
        lines.push(line?);
    }
    Ok(lines)
}
