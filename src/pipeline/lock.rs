//! Concurrency groups.
//!
//! A group is a named lane: at most one run in it is active. Taking the lane
//! never waits. The newest run writes its id into the group's lock file and
//! every older run notices, between stages or while polling a child process,
//! that it no longer owns the lane and cancels itself.
//!
//! ```text
//! run A acquires "pages"   ──► pages.lock = A
//! run B acquires "pages"   ──► pages.lock = B   (A is now superseded)
//! run A: lease.check()     ──► Err(Cancelled)   (A never publishes)
//! ```

use super::error::StageError;
use crate::log;
use anyhow::{Context, Result};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, Ordering},
};

/// Set by the Ctrl+C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Cancel the current run on Ctrl+C instead of killing the process outright,
/// so child processes are stopped and the lock file is released.
pub fn install_interrupt_handler() -> Result<()> {
    ctrlc::set_handler(|| {
        INTERRUPTED.store(true, Ordering::SeqCst);
        log!("run"; "interrupted, cancelling...");
    })
    .context("Failed to set Ctrl+C handler")
}

fn interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// Ownership of a concurrency group for one run.
#[derive(Debug)]
pub struct RunLease {
    path: PathBuf,
    group: String,
    run_id: String,
}

impl RunLease {
    /// Take the lane `group` for `run_id`, superseding whoever held it.
    pub fn acquire(groups_dir: &Path, group: &str, run_id: &str) -> Result<Self> {
        fs::create_dir_all(groups_dir)
            .with_context(|| format!("Failed to create {}", groups_dir.display()))?;

        let path = groups_dir.join(format!("{}.lock", lock_name(group)));
        if let Some(previous) = read_owner(&path)
            && previous != run_id
        {
            log!("run"; "superseding run {previous} in group `{group}`");
        }

        // Write then rename so a polling run never reads a half-written id.
        let tmp = groups_dir.join(format!(".{}.{run_id}.tmp", lock_name(group)));
        fs::write(&tmp, run_id).with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to take lock {}", path.display()))?;

        Ok(Self {
            path,
            group: group.to_owned(),
            run_id: run_id.to_owned(),
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    /// Run id currently holding the lane.
    pub fn owner(&self) -> Option<String> {
        read_owner(&self.path)
    }

    /// True once a newer run has taken the lane.
    pub fn is_superseded(&self) -> bool {
        self.owner().as_deref() != Some(self.run_id.as_str())
    }

    /// Fail with [`StageError::Cancelled`] if this run must stop.
    pub fn check(&self) -> Result<(), StageError> {
        if interrupted() {
            return Err(StageError::Cancelled("interrupted".into()));
        }
        if self.is_superseded() {
            let by = self.owner().unwrap_or_else(|| "a newer run".into());
            return Err(StageError::Cancelled(format!(
                "superseded by {by} in group `{}`",
                self.group
            )));
        }
        Ok(())
    }
}

impl Drop for RunLease {
    fn drop(&mut self) {
        // Never remove a newer run's lock.
        if !self.is_superseded() {
            let _ = fs::remove_file(&self.path);
        }
    }
}

fn read_owner(path: &Path) -> Option<String> {
    fs::read_to_string(path)
        .ok()
        .map(|s| s.trim().to_owned())
        .filter(|s| !s.is_empty())
}

/// Group names become file names; keep them portable.
fn lock_name(group: &str) -> String {
    group
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
