//! Run reports.
//!
//! Every run leaves `<state>/runs/<run_id>.json`. Run ids start with a UTC
//! timestamp, so sorting file names sorts runs by start time.

use super::trigger::Trigger;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    fmt, fs,
    path::{Path, PathBuf},
    time::Duration,
};

/// Generate a run id: `20240131T120000123Z-4242`.
pub fn new_run_id() -> String {
    format!(
        "{}-{}",
        Utc::now().format("%Y%m%dT%H%M%S%3fZ"),
        std::process::id()
    )
}

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Build,
    Package,
    PublishPages,
    PublishAlt,
    Verify,
}

impl Stage {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Build => "build",
            Self::Package => "package",
            Self::PublishPages => "publish_pages",
            Self::PublishAlt => "publish_alt",
            Self::Verify => "verify",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of a single stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Succeeded,
    Failed,
    Skipped,
    Cancelled,
}

/// Final status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Succeeded,
    BuildFailed,
    PackageFailed,
    PublishFailed,
    VerifyFailed,
    Cancelled,
}

impl RunStatus {
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::BuildFailed => "build failed",
            Self::PackageFailed => "package failed",
            Self::PublishFailed => "publish failed",
            Self::VerifyFailed => "verify failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageOutcome {
    pub stage: Stage,
    pub status: StageStatus,
    pub elapsed_ms: u64,
    /// Error chain, skip reason, or where the stage published to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Persistent record of one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub trigger: Trigger,
    pub commit: String,
    pub group: String,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<PathBuf>,
    pub stages: Vec<StageOutcome>,
}

impl RunReport {
    pub fn new(run_id: &str, trigger: Trigger, commit: &str, group: &str) -> Self {
        Self {
            run_id: run_id.to_owned(),
            trigger,
            commit: commit.to_owned(),
            group: group.to_owned(),
            started_at: Utc::now(),
            finished_at: None,
            status: RunStatus::Running,
            artifact: None,
            stages: Vec::new(),
        }
    }

    pub fn record(&mut self, stage: Stage, status: StageStatus, elapsed: Duration, detail: Option<String>) {
        self.stages.push(StageOutcome {
            stage,
            status,
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            detail,
        });
    }

    pub fn stage(&self, stage: Stage) -> Option<&StageOutcome> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    pub fn finish(&mut self, status: RunStatus) {
        self.status = status;
        self.finished_at = Some(Utc::now());
    }

    /// Write the report to `<runs_dir>/<run_id>.json`.
    pub fn save(&self, runs_dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(runs_dir)
            .with_context(|| format!("Failed to create {}", runs_dir.display()))?;
        let path = runs_dir.join(format!("{}.json", self.run_id));
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content =
            fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("Malformed report {}", path.display()))
    }

    /// Most recent report in `runs_dir`, if any run happened.
    pub fn latest(runs_dir: &Path) -> Result<Option<Self>> {
        if !runs_dir.exists() {
            return Ok(None);
        }
        let mut reports: Vec<PathBuf> = fs::read_dir(runs_dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        reports.sort();

        reports.last().map(|path| Self::load(path)).transpose()
    }

    /// Human-readable multi-line summary used by `status`.
    pub fn summary(&self) -> String {
        let mut out = format!(
            "run {} ({}) at {}\ncommit {} in group `{}`\nstatus: {}",
            self.run_id,
            self.trigger,
            self.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
            short_sha(&self.commit),
            self.group,
            self.status,
        );
        for outcome in &self.stages {
            let status = match outcome.status {
                StageStatus::Succeeded => "ok",
                StageStatus::Failed => "FAILED",
                StageStatus::Skipped => "skipped",
                StageStatus::Cancelled => "cancelled",
            };
            out.push_str(&format!("\n  {:<14} {:<9} {:>7}ms", outcome.stage, status, outcome.elapsed_ms));
            if let Some(detail) = &outcome.detail {
                out.push_str(&format!("  {detail}"));
            }
        }
        out
    }
}

pub fn short_sha(commit: &str) -> &str {
    commit.get(..7).unwrap_or(commit)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(run_id: &str) -> RunReport {
        let mut report = RunReport::new(
            run_id,
            Trigger::Push {
                branch: "main".into(),
            },
            "0123456789abcdef0123456789abcdef01234567",
            "pages",
        );
        report.record(Stage::Build, StageStatus::Succeeded, Duration::from_millis(1500), None);
        report.record(
            Stage::PublishAlt,
            StageStatus::Skipped,
            Duration::ZERO,
            Some("disabled".into()),
        );
        report.finish(RunStatus::Succeeded);
        report
    }

    #[test]
    fn test_run_ids_sort_by_time() {
        let first = new_run_id();
        std::thread::sleep(Duration::from_millis(5));
        let second = new_run_id();
        assert!(first < second);
        assert!(first.ends_with(&format!("-{}", std::process::id())));
    }

    #[test]
    fn test_save_and_latest() {
        let dir = tempfile::tempdir().unwrap();
        let runs = dir.path().join("runs");
        assert!(RunReport::latest(&runs).unwrap().is_none());

        sample("20240101T000000000Z-1").save(&runs).unwrap();
        sample("20240102T000000000Z-1").save(&runs).unwrap();
        fs::write(runs.join("notes.txt"), "ignored").unwrap();

        let latest = RunReport::latest(&runs).unwrap().unwrap();
        assert_eq!(latest.run_id, "20240102T000000000Z-1");
        assert_eq!(latest.status, RunStatus::Succeeded);
        assert_eq!(latest.stage(Stage::Build).unwrap().elapsed_ms, 1500);
        assert!(latest.finished_at.is_some());
    }

    #[test]
    fn test_json_shape() {
        let json = serde_json::to_value(sample("r1")).unwrap();
        assert_eq!(json["status"], "succeeded");
        assert_eq!(json["trigger"]["kind"], "push");
        assert_eq!(json["stages"][1]["stage"], "publish_alt");
        assert_eq!(json["stages"][1]["detail"], "disabled");
        assert!(json["stages"][0].get("detail").is_none());
    }

    #[test]
    fn test_summary() {
        let summary = sample("r1").summary();
        assert!(summary.contains("commit 0123456"));
        assert!(summary.contains("status: succeeded"));
        assert!(summary.contains("publish_alt"));
        assert!(summary.contains("disabled"));
    }

    #[test]
    fn test_only_success_is_success() {
        assert!(RunStatus::Succeeded.is_success());
        assert!(!RunStatus::VerifyFailed.is_success());
        assert!(!RunStatus::Cancelled.is_success());
    }
}
