//! The run state machine.
//!
//! ```text
//! BUILD ──► PACKAGE ──┬──► PUBLISH_PAGES ──┬──► VERIFY
//!                     └──► PUBLISH_ALT   ──┘
//! ```
//!
//! A failed stage ends the run, except that the two publish stages always
//! both get their attempt. VERIFY follows the pages target only. Between
//! stages the run checks its lease and stops as `Cancelled` once a newer run
//! took the concurrency group.

use super::{
    error::{chain, is_cancellation},
    lock::RunLease,
    report::{RunReport, RunStatus, Stage, StageStatus, short_sha},
    trigger::Trigger,
};
use crate::{
    deploy::{PublishTarget, Published, publish_with},
    log,
    logger::{StageMark, stage_line},
    package::Artifact,
};
use anyhow::Result;
use std::{
    path::PathBuf,
    time::{Duration, Instant},
};

/// The work behind each stage.
///
/// Production wires in the real build, package, deploy and verify modules;
/// tests substitute their own.
pub trait Stages {
    /// What BUILD hands to PACKAGE.
    type Output;

    fn build(&self, commit: &str, lease: &RunLease) -> Result<Self::Output>;

    fn package(&self, built: Self::Output, commit: &str, lease: &RunLease) -> Result<Artifact>;

    /// The pages target and the alternative target, in that order.
    fn targets(&self) -> [&dyn PublishTarget; 2];

    fn verify_enabled(&self) -> bool;

    /// Returns the checked URLs.
    fn verify(&self) -> Result<Vec<String>>;
}

/// How much of the pipeline a run covers.
pub enum Scope {
    /// Every stage.
    Full,
    /// BUILD and PACKAGE only.
    Package,
    /// Publish a previously packaged artifact, then verify.
    Redeploy(Artifact),
}

/// One pipeline run, holding its concurrency group for its whole lifetime.
pub struct Run {
    report: RunReport,
    lease: RunLease,
    runs_dir: PathBuf,
}

impl Run {
    pub fn new(trigger: Trigger, commit: &str, lease: RunLease, runs_dir: PathBuf) -> Self {
        let report = RunReport::new(lease.run_id(), trigger, commit, lease.group());
        Self {
            report,
            lease,
            runs_dir,
        }
    }

    /// Drive the run to a final status and persist its report.
    pub fn execute<S: Stages>(mut self, stages: &S, scope: Scope) -> Result<RunReport> {
        log!("run"; "run {} ({}) for {} in group `{}`",
            self.report.run_id, self.report.trigger, short_sha(&self.report.commit), self.report.group);
        self.report.save(&self.runs_dir)?;

        let status = self.drive(stages, scope);
        self.report.finish(status);
        let path = self.report.save(&self.runs_dir)?;
        log!("run"; "{} - report at {}", status, path.display());
        Ok(self.report)
    }

    fn drive<S: Stages>(&mut self, stages: &S, scope: Scope) -> RunStatus {
        let (artifact, package_only) = match scope {
            Scope::Redeploy(artifact) => {
                let detail = format!("redeploy of artifact {}", artifact.run_id());
                self.skip(Stage::Build, &detail);
                self.skip(Stage::Package, &detail);
                (artifact, false)
            }
            scope => {
                let package_only = matches!(scope, Scope::Package);
                let commit = self.report.commit.clone();

                let (result, elapsed) = timed(|| {
                    self.lease.check()?;
                    stages.build(&commit, &self.lease)
                });
                let Some(built) = self.settle(Stage::Build, result, elapsed, |_| None) else {
                    return self.failed_as(Stage::Build, RunStatus::BuildFailed);
                };

                let (result, elapsed) = timed(|| {
                    self.lease.check()?;
                    stages.package(built, &commit, &self.lease)
                });
                let detail = |a: &Artifact| Some(format!("{} files", a.files().len()));
                let Some(artifact) = self.settle(Stage::Package, result, elapsed, detail) else {
                    return self.failed_as(Stage::Package, RunStatus::PackageFailed);
                };
                (artifact, package_only)
            }
        };
        self.report.artifact = Some(artifact.root().to_path_buf());

        if package_only {
            for stage in [Stage::PublishPages, Stage::PublishAlt, Stage::Verify] {
                self.skip(stage, "not requested");
            }
            return RunStatus::Succeeded;
        }

        // A superseded run never publishes.
        if let Err(err) = self.lease.check() {
            for stage in [Stage::PublishPages, Stage::PublishAlt, Stage::Verify] {
                self.mark(stage, StageStatus::Cancelled, Duration::ZERO, Some(err.to_string()));
            }
            return RunStatus::Cancelled;
        }

        let [pages, alt] = stages.targets();
        let lease = &self.lease;
        let artifact = &artifact;
        let (pages_result, alt_result) = rayon::join(
            || publish_stage(pages, artifact, lease),
            || publish_stage(alt, artifact, lease),
        );

        let mut publish_failed = false;
        let mut cancelled = false;
        let mut pages_ok = false;
        for (stage, outcome) in [(Stage::PublishPages, pages_result), (Stage::PublishAlt, alt_result)] {
            match outcome {
                None => self.skip(stage, "disabled"),
                Some((result, elapsed)) => {
                    cancelled |= result.as_ref().is_err_and(is_cancellation);
                    publish_failed |= result.is_err();
                    let ok = self
                        .settle(stage, result, elapsed, |p: &Published| Some(p.location.clone()))
                        .is_some();
                    pages_ok |= ok && stage == Stage::PublishPages;
                }
            }
        }

        if cancelled {
            self.mark(Stage::Verify, StageStatus::Cancelled, Duration::ZERO, None);
            return RunStatus::Cancelled;
        }

        let verified = if !pages_ok {
            self.skip(Stage::Verify, "pages not published");
            true
        } else if !stages.verify_enabled() {
            self.skip(Stage::Verify, "disabled");
            true
        } else {
            let (result, elapsed) = timed(|| stages.verify());
            self.settle(Stage::Verify, result, elapsed, |urls: &Vec<String>| {
                Some(urls.join(", "))
            })
            .is_some()
        };

        if publish_failed {
            RunStatus::PublishFailed
        } else if !verified {
            RunStatus::VerifyFailed
        } else {
            RunStatus::Succeeded
        }
    }

    /// Record a finished stage, returning its value on success.
    fn settle<T>(
        &mut self,
        stage: Stage,
        result: Result<T>,
        elapsed: Duration,
        detail: impl FnOnce(&T) -> Option<String>,
    ) -> Option<T> {
        match result {
            Ok(value) => {
                let detail = detail(&value);
                self.mark(stage, StageStatus::Succeeded, elapsed, detail);
                Some(value)
            }
            Err(err) => {
                let status = if is_cancellation(&err) {
                    StageStatus::Cancelled
                } else {
                    log!("error"; "{stage}: {}", chain(&err));
                    StageStatus::Failed
                };
                self.mark(stage, status, elapsed, Some(chain(&err)));
                None
            }
        }
    }

    /// Status after `stage` did not succeed; later stages are skipped.
    fn failed_as(&mut self, stage: Stage, failure: RunStatus) -> RunStatus {
        let cancelled = self
            .report
            .stage(stage)
            .is_some_and(|s| s.status == StageStatus::Cancelled);
        let later: Vec<Stage> = [Stage::Package, Stage::PublishPages, Stage::PublishAlt, Stage::Verify]
            .into_iter()
            .filter(|s| *s != stage && self.report.stage(*s).is_none())
            .collect();
        for next in later {
            self.skip(next, &format!("{stage} did not succeed"));
        }
        if cancelled { RunStatus::Cancelled } else { failure }
    }

    fn skip(&mut self, stage: Stage, reason: &str) {
        self.mark(stage, StageStatus::Skipped, Duration::ZERO, Some(reason.to_owned()));
    }

    fn mark(&mut self, stage: Stage, status: StageStatus, elapsed: Duration, detail: Option<String>) {
        let symbol = match status {
            StageStatus::Succeeded => StageMark::Ok,
            StageStatus::Failed | StageStatus::Cancelled => StageMark::Failed,
            StageStatus::Skipped => StageMark::Skipped,
        };
        let line = match (status, &detail) {
            (StageStatus::Cancelled, _) => "cancelled".to_owned(),
            (StageStatus::Failed, _) => String::new(),
            (_, Some(detail)) => detail.clone(),
            (_, None) => String::new(),
        };
        stage_line(stage.name(), symbol, elapsed, &line);
        self.report.record(stage, status, elapsed, detail);
    }
}

type Timed<T> = (Result<T>, Duration);

fn timed<T>(f: impl FnOnce() -> Result<T>) -> Timed<T> {
    let start = Instant::now();
    let result = f();
    (result, start.elapsed())
}

/// `None` when the target is disabled.
fn publish_stage(
    target: &dyn PublishTarget,
    artifact: &Artifact,
    lease: &RunLease,
) -> Option<Timed<Published>> {
    target
        .enabled()
        .then(|| timed(|| publish_with(target, artifact, lease)))
}
