use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// ExtractConfig
// ---------------------------------------------------------------------------

/// How the record store is queried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractConfig {
    /// Connection arguments passed to `psql` before the query.
    #[serde(default = "default_psql_params")]
    pub psql_params: Vec<String>,
    #[serde(default = "default_scripts_dir")]
    pub scripts_dir: PathBuf,
    #[serde(default = "default_reading_log_sql")]
    pub reading_log_sql: String,
    #[serde(default = "default_ratings_sql")]
    pub ratings_sql: String,
}

fn default_psql_params() -> Vec<String> {
    vec!["-h".to_string(), "db".to_string(), "openlibrary".to_string()]
}

fn default_scripts_dir() -> PathBuf {
    PathBuf::from("/openlibrary/scripts")
}

fn default_reading_log_sql() -> String {
    "dump-reading-log.sql".to_string()
}

fn default_ratings_sql() -> String {
    "dump-ratings.sql".to_string()
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            psql_params: default_psql_params(),
            scripts_dir: default_scripts_dir(),
            reading_log_sql: default_reading_log_sql(),
            ratings_sql: default_ratings_sql(),
        }
    }
}

impl ExtractConfig {
    pub fn reading_log_script(&self) -> PathBuf {
        self.scripts_dir.join(&self.reading_log_sql)
    }

    pub fn ratings_script(&self) -> PathBuf {
        self.scripts_dir.join(&self.ratings_sql)
    }
}

// ---------------------------------------------------------------------------
// ArchiveConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Credentials file for the `ia` client. Archival is refused without it.
    #[serde(default = "default_ia_config_file")]
    pub config_file: PathBuf,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
}

fn default_ia_config_file() -> PathBuf {
    PathBuf::from("/olsystem/etc/ia.ini")
}

fn default_collection() -> String {
    "ol_exports".to_string()
}

fn default_format() -> String {
    "Data".to_string()
}

fn default_retries() -> u32 {
    300
}

fn default_retry_delay_secs() -> u64 {
    10
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            config_file: default_ia_config_file(),
            collection: default_collection(),
            format: default_format(),
            retries: default_retries(),
            retry_delay_secs: default_retry_delay_secs(),
        }
    }
}

impl ArchiveConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

// ---------------------------------------------------------------------------
// SitemapConfig
// ---------------------------------------------------------------------------

/// External sitemap generator. The dump path is appended to `command`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SitemapConfig {
    pub command: Vec<String>,
}

// ---------------------------------------------------------------------------
// DumpConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DumpConfig {
    /// Root of all run output: raw extract, dumps, checkpoints, sitemaps.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    /// Parent of the sort scratch directory. Defaults to `work_dir`.
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,
    /// Cap on raw rows read by the history compiler. Setting it marks the
    /// run as a test run.
    #[serde(default)]
    pub max_records: Option<u64>,
    #[serde(default = "default_max_malformed")]
    pub max_malformed: u64,
    #[serde(default = "default_sort_buffer_bytes")]
    pub sort_buffer_bytes: usize,
    #[serde(default = "default_merge_fan_in")]
    pub merge_fan_in: usize,
    #[serde(default = "default_pipe_capacity")]
    pub pipe_capacity: usize,
    #[serde(default = "default_progress_every")]
    pub progress_every: u64,
    /// Drop private, admin and obsolete pages while compiling history.
    #[serde(default = "default_exclude_private")]
    pub exclude_private: bool,
    #[serde(default)]
    pub extract: ExtractConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub sitemap: Option<SitemapConfig>,
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("/openlibrary/dumps")
}

fn default_max_malformed() -> u64 {
    1000
}

fn default_sort_buffer_bytes() -> usize {
    512 * 1024 * 1024
}

fn default_merge_fan_in() -> usize {
    64
}

fn default_pipe_capacity() -> usize {
    4096
}

fn default_progress_every() -> u64 {
    1_000_000
}

fn default_exclude_private() -> bool {
    true
}

impl Default for DumpConfig {
    fn default() -> Self {
        Self {
            work_dir: default_work_dir(),
            scratch_dir: None,
            max_records: None,
            max_malformed: default_max_malformed(),
            sort_buffer_bytes: default_sort_buffer_bytes(),
            merge_fan_in: default_merge_fan_in(),
            pipe_capacity: default_pipe_capacity(),
            progress_every: default_progress_every(),
            exclude_private: default_exclude_private(),
            extract: ExtractConfig::default(),
            archive: ArchiveConfig::default(),
            sitemap: None,
        }
    }
}

impl DumpConfig {
    /// Load from a YAML file, or return the defaults when `path` is `None`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let data = std::fs::read_to_string(path)?;
        let cfg: DumpConfig = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn scratch_dir(&self) -> &Path {
        self.scratch_dir.as_deref().unwrap_or(&self.work_dir)
    }

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.merge_fan_in < 2 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: format!("merge_fan_in={} must be at least 2", self.merge_fan_in),
            });
        }

        if self.pipe_capacity == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "pipe_capacity must be greater than 0".to_string(),
            });
        }

        if self.sort_buffer_bytes < 1024 * 1024 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "sort_buffer_bytes={} is very small and will produce many run files",
                    self.sort_buffer_bytes
                ),
            });
        }

        if let Some(0) = self.max_records {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "max_records=0 produces empty dumps".to_string(),
            });
        }

        if let Some(sitemap) = &self.sitemap {
            if sitemap.command.is_empty() {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: "sitemap.command is empty".to_string(),
                });
            }
        }

        warnings
    }
}
