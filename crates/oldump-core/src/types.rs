use crate::error::DumpError;
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

/// One step of the dump run, listed in dependency order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    ReadingLog,
    Ratings,
    RawExtract,
    #[serde(rename = "cdump")]
    CDump,
    Sort,
    Dump,
    Split,
    Archive,
    Sitemap,
}

impl Stage {
    pub fn all() -> &'static [Stage] {
        &[
            Stage::ReadingLog,
            Stage::Ratings,
            Stage::RawExtract,
            Stage::CDump,
            Stage::Sort,
            Stage::Dump,
            Stage::Split,
            Stage::Archive,
            Stage::Sitemap,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::ReadingLog => "reading-log",
            Stage::Ratings => "ratings",
            Stage::RawExtract => "raw-extract",
            Stage::CDump => "cdump",
            Stage::Sort => "sort",
            Stage::Dump => "dump",
            Stage::Split => "split",
            Stage::Archive => "archive",
            Stage::Sitemap => "sitemap",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Stage {
    type Err = DumpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::all()
            .iter()
            .copied()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| DumpError::UnknownStage(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// RunDate
// ---------------------------------------------------------------------------

/// The last day included in a dump, written `yyyy-mm-dd` everywhere it
/// appears in artifact names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RunDate(NaiveDate);

impl RunDate {
    pub fn year(self) -> i32 {
        self.0.year()
    }

    /// True when an ISO-8601 timestamp falls on or before this date.
    ///
    /// Only the leading `yyyy-mm-dd` is compared, so any time-of-day or
    /// fractional seconds suffix is accepted.
    pub fn includes(self, timestamp: &str) -> Option<bool> {
        let day = timestamp.get(..10)?;
        let parsed = NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()?;
        Some(parsed <= self.0)
    }
}

impl fmt::Display for RunDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

impl std::str::FromStr for RunDate {
    type Err = DumpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // chrono accepts unpadded fields; artifact names need the padded form.
        if s.len() != 10 {
            return Err(DumpError::InvalidRunDate(s.to_string()));
        }
        NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map(RunDate)
            .map_err(|_| DumpError::InvalidRunDate(s.to_string()))
    }
}

impl TryFrom<String> for RunDate {
    type Error = DumpError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RunDate> for String {
    fn from(date: RunDate) -> Self {
        date.to_string()
    }
}
