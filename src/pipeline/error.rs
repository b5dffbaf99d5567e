//! Stage failure taxonomy.

use std::path::PathBuf;
use thiserror::Error;

/// Why a stage failed.
///
/// Every variant surfaces as a failed run. Nothing is retried.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("dependency installation failed: {0}")]
    Install(String),

    #[error("build command failed: {0}")]
    Build(String),

    #[error("build output `{}` is missing or empty", .0.display())]
    EmptyOutput(PathBuf),

    #[error("content error: {0}")]
    Content(String),

    #[error("packaging failed: {0}")]
    Package(String),

    #[error("{target}: credentials rejected or missing: {reason}")]
    Auth { target: &'static str, reason: String },

    #[error("{target}: publish failed: {reason}")]
    Publish { target: &'static str, reason: String },

    #[error("request to {url} failed: {reason}")]
    Network { url: String, reason: String },

    #[error("{url} answered {status}, expected {expected}")]
    HealthCheck {
        url: String,
        status: u16,
        expected: u16,
    },

    #[error("run cancelled: {0}")]
    Cancelled(String),
}

impl StageError {
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}

/// Collapse an `anyhow` chain into a single line for error variants.
pub fn chain(err: &anyhow::Error) -> String {
    format!("{err:#}")
}

/// Recover a cancellation buried in an `anyhow` error.
pub fn is_cancellation(err: &anyhow::Error) -> bool {
    err.downcast_ref::<StageError>()
        .is_some_and(StageError::is_cancelled)
}
