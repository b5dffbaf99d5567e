//! `[verify]` section configuration.

use super::defaults;
use educe::Educe;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// `[verify]` section in blogship.toml - post-deploy health check.
///
/// # Example
/// ```toml
/// [verify]
/// paths = ["/", "/about/"]
/// expect_status = 200
/// timeout_secs = 10
/// ```
#[derive(Debug, Clone, Educe, Serialize, Deserialize)]
#[educe(Default)]
#[serde(deny_unknown_fields)]
pub struct VerifySection {
    #[serde(default = "defaults::r#true")]
    #[educe(Default = true)]
    pub enable: bool,

    /// Paths requested relative to `[site.url]`.
    #[serde(default = "defaults::verify::paths")]
    #[educe(Default = defaults::verify::paths())]
    pub paths: Vec<String>,

    #[serde(default = "defaults::verify::expect_status")]
    #[educe(Default = defaults::verify::expect_status())]
    pub expect_status: u16,

    #[serde(default = "defaults::verify::timeout_secs")]
    #[educe(Default = defaults::verify::timeout_secs())]
    pub timeout_secs: u64,
}

impl VerifySection {
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::super::PipelineConfig;
    use std::time::Duration;

    #[test]
    fn test_verify_defaults() {
        let config: PipelineConfig = toml::from_str("").unwrap();
        assert!(config.verify.enable);
        assert_eq!(config.verify.paths, vec!["/"]);
        assert_eq!(config.verify.expect_status, 200);
        assert_eq!(config.verify.timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_verify_custom() {
        let config: PipelineConfig = toml::from_str(
            r#"
            [verify]
            enable = false
            paths = ["/", "/foo/"]
            timeout_secs = 5
        "#,
        )
        .unwrap();
        assert!(!config.verify.enable);
        assert_eq!(config.verify.paths.len(), 2);
        assert_eq!(config.verify.timeout(), Duration::from_secs(5));
    }
}
