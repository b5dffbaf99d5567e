//! Events that start a pipeline run.

use crate::cli::TriggerKind;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What started a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Trigger {
    /// A push to `branch`.
    Push { branch: String },
    /// Manual dispatch.
    Manual,
}

impl Trigger {
    pub fn new(kind: TriggerKind, branch: Option<String>) -> Option<Self> {
        match kind {
            TriggerKind::Manual => Some(Self::Manual),
            TriggerKind::Push => branch.map(|branch| Self::Push { branch }),
        }
    }

    /// Whether this event starts a run for a pipeline that watches `branch`.
    ///
    /// Pushes to any other branch are ignored; manual dispatch always runs.
    pub fn should_run(&self, branch: &str) -> bool {
        match self {
            Self::Push { branch: pushed } => pushed == branch,
            Self::Manual => true,
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Push { branch } => write!(f, "push to {branch}"),
            Self::Manual => f.write_str("manual"),
        }
    }
}
