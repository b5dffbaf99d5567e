//! `[deploy]` section configuration.
//!
//! Two independent publish targets share one artifact: GitHub Pages (on by
//! default) and an S3 bucket (off until explicitly enabled).

use super::defaults;
use educe::Educe;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// `[deploy]` section in blogship.toml - publish targets.
///
/// # Example
/// ```toml
/// [deploy.pages]
/// url = "https://github.com/alice/alice.github.io"
/// branch = "gh-pages"
///
/// [deploy.s3]
/// enable = true
/// bucket = "${BLOG_BUCKET}"
/// region = "eu-west-1"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeploySection {
    /// GitHub Pages target.
    #[serde(default)]
    pub pages: PagesTarget,

    /// S3 object storage target.
    #[serde(default)]
    pub s3: S3Target,
}

impl DeploySection {
    /// Whether any publish target is switched on.
    pub const fn any_enabled(&self) -> bool {
        self.pages.enable || self.s3.enable
    }
}

/// `[deploy.pages]` section - GitHub Pages.
#[derive(Debug, Clone, Educe, Serialize, Deserialize)]
#[educe(Default)]
#[serde(deny_unknown_fields)]
pub struct PagesTarget {
    #[serde(default = "defaults::r#true")]
    #[educe(Default = true)]
    pub enable: bool,

    /// Repository URL (HTTPS). Defaults to the `origin` remote of the project.
    #[serde(default)]
    pub url: Option<String>,

    /// Branch served by GitHub Pages.
    #[serde(default = "defaults::deploy::pages::branch")]
    #[educe(Default = defaults::deploy::pages::branch())]
    pub branch: String,

    /// Environment variable holding the push token.
    #[serde(default = "defaults::deploy::pages::token_env")]
    #[educe(Default = defaults::deploy::pages::token_env())]
    pub token_env: String,

    /// File holding the push token, used when the variable is unset.
    ///
    /// Keep it outside the repository (e.g. `~/.github-token`).
    #[serde(default)]
    pub token_path: Option<PathBuf>,

    #[serde(default = "defaults::deploy::pages::committer_name")]
    #[educe(Default = defaults::deploy::pages::committer_name())]
    pub committer_name: String,

    #[serde(default = "defaults::deploy::pages::committer_email")]
    #[educe(Default = defaults::deploy::pages::committer_email())]
    pub committer_email: String,

    /// Add an empty `.nojekyll` so Pages serves `_`-prefixed directories.
    #[serde(default = "defaults::r#true")]
    #[educe(Default = true)]
    pub nojekyll: bool,
}

/// `[deploy.s3]` section - S3 compatible bucket.
///
/// `bucket` and `region` may reference environment variables as `${NAME}`.
#[derive(Debug, Clone, Educe, Serialize, Deserialize)]
#[educe(Default)]
#[serde(deny_unknown_fields)]
pub struct S3Target {
    #[serde(default = "defaults::r#false")]
    #[educe(Default = false)]
    pub enable: bool,

    #[serde(default)]
    pub bucket: String,

    #[serde(default = "defaults::deploy::s3::region")]
    #[educe(Default = defaults::deploy::s3::region())]
    pub region: String,

    /// Custom endpoint for S3 compatible services.
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Key prefix inside the bucket.
    #[serde(default)]
    pub prefix: String,

    #[serde(default = "defaults::r#false")]
    #[educe(Default = false)]
    pub path_style: bool,

    #[serde(default = "defaults::deploy::s3::access_key_env")]
    #[educe(Default = defaults::deploy::s3::access_key_env())]
    pub access_key_env: String,

    #[serde(default = "defaults::deploy::s3::secret_key_env")]
    #[educe(Default = defaults::deploy::s3::secret_key_env())]
    pub secret_key_env: String,
}

#[cfg(test)]
mod tests {
    use super::super::PipelineConfig;
    use std::path::PathBuf;

    #[test]
    fn test_deploy_defaults() {
        let config: PipelineConfig = toml::from_str("").unwrap();

        assert!(config.deploy.pages.enable);
        assert!(config.deploy.pages.url.is_none());
        assert_eq!(config.deploy.pages.branch, "gh-pages");
        assert_eq!(config.deploy.pages.token_env, "GITHUB_TOKEN");
        assert!(config.deploy.pages.nojekyll);

        assert!(!config.deploy.s3.enable);
        assert_eq!(config.deploy.s3.region, "us-east-1");
        assert_eq!(config.deploy.s3.access_key_env, "AWS_ACCESS_KEY_ID");
        assert!(config.deploy.any_enabled());
    }

    #[test]
    fn test_deploy_pages() {
        let config: PipelineConfig = toml::from_str(
            r#"
            [deploy.pages]
            url = "https://github.com/alice/alice.github.io"
            branch = "main"
            token_path = "~/.github-token"
        "#,
        )
        .unwrap();
        assert_eq!(
            config.deploy.pages.url.as_deref(),
            Some("https://github.com/alice/alice.github.io")
        );
        assert_eq!(config.deploy.pages.branch, "main");
        assert_eq!(
            config.deploy.pages.token_path,
            Some(PathBuf::from("~/.github-token"))
        );
    }

    #[test]
    fn test_deploy_s3() {
        let config: PipelineConfig = toml::from_str(
            r#"
            [deploy.s3]
            enable = true
            bucket = "${BLOG_BUCKET}"
            region = "eu-west-1"
            endpoint = "https://minio.local:9000"
            path_style = true
        "#,
        )
        .unwrap();
        assert!(config.deploy.s3.enable);
        assert_eq!(config.deploy.s3.bucket, "${BLOG_BUCKET}");
        assert!(config.deploy.s3.path_style);
    }

    #[test]
    fn test_deploy_all_disabled() {
        let config: PipelineConfig = toml::from_str(
            r#"
            [deploy.pages]
            enable = false
        "#,
        )
        .unwrap();
        assert!(!config.deploy.any_enabled());
    }

    #[test]
    fn test_deploy_unknown_field_rejection() {
        let result: Result<PipelineConfig, _> = toml::from_str(
            r#"
            [deploy.pages]
            provider = "github"
        "#,
        );
        assert!(result.is_err());

        let result: Result<PipelineConfig, _> = toml::from_str(
            r#"
            [deploy.vercel]
            enable = true
        "#,
        );
        assert!(result.is_err());
    }
}
