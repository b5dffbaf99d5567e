//! `[pipeline]` section configuration.

use super::defaults;
use educe::Educe;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// `[pipeline]` section in blogship.toml - triggers and run bookkeeping.
///
/// # Example
/// ```toml
/// [pipeline]
/// branch = "main"
/// group = "pages"
/// state = ".blogship"
/// keep_artifacts = 5
/// ```
#[derive(Debug, Clone, Educe, Serialize, Deserialize)]
#[educe(Default)]
#[serde(deny_unknown_fields)]
pub struct PipelineSection {
    /// Only pushes to this branch start a run.
    #[serde(default = "defaults::pipeline::branch")]
    #[educe(Default = defaults::pipeline::branch())]
    pub branch: String,

    /// Concurrency group. At most one run per group is active.
    #[serde(default = "defaults::pipeline::group")]
    #[educe(Default = defaults::pipeline::group())]
    pub group: String,

    /// Directory for checkouts, artifacts, locks and run reports.
    #[serde(default = "defaults::pipeline::state")]
    #[educe(Default = defaults::pipeline::state())]
    pub state: PathBuf,

    /// Number of most recent artifacts kept on disk.
    #[serde(default = "defaults::pipeline::keep_artifacts")]
    #[educe(Default = defaults::pipeline::keep_artifacts())]
    pub keep_artifacts: usize,
}
