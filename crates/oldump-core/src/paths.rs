use crate::types::{RunDate, Stage};
use regex::Regex;
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Directory and file constants
// ---------------------------------------------------------------------------

pub const DUMPS_DIR: &str = "dumps";
pub const CHECKPOINTS_DIR: &str = "checkpoints";
pub const SITEMAPS_DIR: &str = "sitemaps";

pub const RAW_EXTRACT_FILE: &str = "data.txt.gz";

/// Prefix of every sort scratch directory, used to find stale ones.
pub const SCRATCH_PREFIX: &str = "oldumpsort-";

// ---------------------------------------------------------------------------
// Artifact names
// ---------------------------------------------------------------------------

/// Archive item name (and file stem) of the full dump.
pub fn dump_name(date: RunDate) -> String {
    format!("ol_dump_{date}")
}

/// Archive item name (and file stem) of the history dump.
pub fn cdump_name(date: RunDate) -> String {
    format!("ol_cdump_{date}")
}

/// Pattern handed to the type splitter; `%s` becomes the partition name.
pub fn split_pattern(date: RunDate) -> String {
    format!("ol_dump_%s_{date}.txt.gz")
}

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn dumps_dir(work_dir: &Path) -> PathBuf {
    work_dir.join(DUMPS_DIR)
}

pub fn raw_extract_path(work_dir: &Path) -> PathBuf {
    work_dir.join(RAW_EXTRACT_FILE)
}

pub fn dump_path(work_dir: &Path, date: RunDate) -> PathBuf {
    dumps_dir(work_dir).join(format!("{}.txt.gz", dump_name(date)))
}

pub fn cdump_path(work_dir: &Path, date: RunDate) -> PathBuf {
    dumps_dir(work_dir).join(format!("{}.txt.gz", cdump_name(date)))
}

pub fn reading_log_path(work_dir: &Path, date: RunDate) -> PathBuf {
    dumps_dir(work_dir).join(format!("ol_dump_reading-log_{date}.txt.gz"))
}

pub fn ratings_path(work_dir: &Path, date: RunDate) -> PathBuf {
    dumps_dir(work_dir).join(format!("ol_dump_ratings_{date}.txt.gz"))
}

pub fn checkpoints_dir(work_dir: &Path, date: RunDate) -> PathBuf {
    work_dir.join(CHECKPOINTS_DIR).join(date.to_string())
}

pub fn checkpoint_path(work_dir: &Path, date: RunDate, stage: Stage) -> PathBuf {
    checkpoints_dir(work_dir, date).join(format!("{stage}.json"))
}

pub fn sitemaps_dir(work_dir: &Path, date: RunDate) -> PathBuf {
    work_dir.join(SITEMAPS_DIR).join(date.to_string())
}

/// Every dump file in `dir` that belongs to `date`: the full dump, the
/// history dump, per-type dumps, reading-log and ratings.
pub fn run_artifacts(dir: &Path, date: RunDate) -> std::io::Result<Vec<PathBuf>> {
    let re = artifact_re(date);
    let mut found = Vec::new();
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(found),
        Err(e) => return Err(e),
    };
    for entry in entries {
        let entry = entry?;
        if let Some(name) = entry.file_name().to_str() {
            if re.is_match(name) {
                found.push(entry.path());
            }
        }
    }
    found.sort();
    Ok(found)
}

fn artifact_re(date: RunDate) -> Regex {
    let date = regex::escape(&date.to_string());
    // The date is escaped, so the pattern is always valid.
    Regex::new(&format!(r"^ol_c?dump_(?:[A-Za-z0-9_.-]+_)?{date}\.txt\.gz$"))
        .expect("artifact pattern is valid")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> RunDate {
        "2024-01-31".parse().unwrap()
    }

    #[test]
    fn path_helpers() {
        let root = Path::new("/tmp/dumps-root");
        assert_eq!(
            dump_path(root, date()),
            PathBuf::from("/tmp/dumps-root/dumps/ol_dump_2024-01-31.txt.gz")
        );
        assert_eq!(
            cdump_path(root, date()),
            PathBuf::from("/tmp/dumps-root/dumps/ol_cdump_2024-01-31.txt.gz")
        );
        assert_eq!(
            reading_log_path(root, date()),
            PathBuf::from("/tmp/dumps-root/dumps/ol_dump_reading-log_2024-01-31.txt.gz")
        );
        assert_eq!(
            checkpoint_path(root, date(), Stage::CDump),
            PathBuf::from("/tmp/dumps-root/checkpoints/2024-01-31/cdump.json")
        );
        assert_eq!(split_pattern(date()), "ol_dump_%s_2024-01-31.txt.gz");
    }

    #[test]
    fn run_artifacts_matches_only_this_date() {
        let dir = tempfile::TempDir::new().unwrap();
        for name in [
            "ol_dump_2024-01-31.txt.gz",
            "ol_cdump_2024-01-31.txt.gz",
            "ol_dump_editions_2024-01-31.txt.gz",
            "ol_dump_reading-log_2024-01-31.txt.gz",
            "ol_dump_2023-12-31.txt.gz",
            "ol_dump_editions_2023-12-31.txt.gz",
            "data.txt.gz",
            "notes.txt",
        ] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        let names: Vec<String> = run_artifacts(dir.path(), date())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            vec![
                "ol_cdump_2024-01-31.txt.gz",
                "ol_dump_2024-01-31.txt.gz",
                "ol_dump_editions_2024-01-31.txt.gz",
                "ol_dump_reading-log_2024-01-31.txt.gz",
            ]
        );
    }

    #[test]
    fn run_artifacts_of_missing_dir_is_empty() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(run_artifacts(&dir.path().join("nope"), date())
            .unwrap()
            .is_empty());
    }
}
