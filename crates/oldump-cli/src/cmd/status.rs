use crate::output::{print_json, print_table};
use anyhow::Context;
use oldump_core::checkpoint::CheckpointStore;
use oldump_core::config::DumpConfig;
use oldump_core::types::{RunDate, Stage};
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Serialize)]
struct StageStatus {
    stage: Stage,
    state: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    completed_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    records: Option<u64>,
}

pub fn run(
    config_path: Option<&Path>,
    date: &str,
    work_dir: Option<PathBuf>,
    json: bool,
) -> anyhow::Result<()> {
    let date: RunDate = date.parse()?;
    let config = DumpConfig::load(config_path).context("failed to load config")?;
    let work_dir = work_dir.unwrap_or(config.work_dir);
    let store = CheckpointStore::new(&work_dir);

    let mut stages = Vec::new();
    for &stage in Stage::all() {
        let status = match store.load(date, stage) {
            Err(e) => {
                tracing::warn!(%stage, error = %e, "unreadable checkpoint");
                StageStatus {
                    stage,
                    state: "corrupt",
                    completed_at: None,
                    records: None,
                }
            }
            Ok(None) => StageStatus {
                stage,
                state: "pending",
                completed_at: None,
                records: None,
            },
            Ok(Some(cp)) => StageStatus {
                stage,
                // Present but with missing artifacts means the stage re-runs.
                state: if store.is_complete(date, stage) {
                    "complete"
                } else {
                    "stale"
                },
                completed_at: Some(cp.completed_at.to_rfc3339()),
                records: cp.records,
            },
        };
        stages.push(status);
    }

    if json {
        let value = serde_json::json!({
            "date": date,
            "work_dir": work_dir,
            "stages": stages,
        });
        return print_json(&value);
    }

    println!("Run {date} in {}", work_dir.display());
    let rows: Vec<Vec<String>> = stages
        .iter()
        .map(|s| {
            vec![
                s.stage.to_string(),
                s.state.to_string(),
                s.completed_at.clone().unwrap_or_else(|| "-".to_string()),
                s.records.map(|r| r.to_string()).unwrap_or_else(|| "-".to_string()),
            ]
        })
        .collect();
    print_table(&["STAGE", "STATE", "COMPLETED", "RECORDS"], rows);
    Ok(())
}
