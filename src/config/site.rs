//! `[site]` section configuration.

use super::defaults;
use educe::Educe;
use serde::{Deserialize, Serialize};

/// `[site]` section in blogship.toml - the live site.
///
/// # Example
/// ```toml
/// [site]
/// url = "https://alice.github.io"
/// cname = "blog.alice.dev"
/// ```
#[derive(Debug, Clone, Educe, Serialize, Deserialize)]
#[educe(Default)]
#[serde(deny_unknown_fields)]
pub struct SiteSection {
    /// Public URL the health check requests after publishing.
    #[serde(default = "defaults::site::url")]
    #[educe(Default = defaults::site::url())]
    pub url: Option<String>,

    /// Custom domain written as `CNAME` into the pages branch.
    #[serde(default)]
    pub cname: Option<String>,
}

impl SiteSection {
    /// Join the site URL with a path, avoiding doubled slashes.
    pub fn join(&self, path: &str) -> Option<String> {
        let base = self.url.as_deref()?.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        Some(format!("{base}/{path}"))
    }
}

#[cfg(test)]
mod tests {
    use super::super::PipelineConfig;
    use super::*;

    #[test]
    fn test_site_section() {
        let config: PipelineConfig = toml::from_str(
            r#"
            [site]
            url = "https://alice.github.io"
            cname = "blog.alice.dev"
        "#,
        )
        .unwrap();
        assert_eq!(config.site.url.as_deref(), Some("https://alice.github.io"));
        assert_eq!(config.site.cname.as_deref(), Some("blog.alice.dev"));
    }

    #[test]
    fn test_site_join() {
        let site = SiteSection {
            url: Some("https://alice.github.io/".into()),
            cname: None,
        };
        assert_eq!(site.join("/").as_deref(), Some("https://alice.github.io/"));
        assert_eq!(
            site.join("/foo/").as_deref(),
            Some("https://alice.github.io/foo/")
        );
        assert_eq!(site.join("foo").as_deref(), Some("https://alice.github.io/foo"));
    }

    #[test]
    fn test_site_join_without_url() {
        assert!(SiteSection::default().join("/").is_none());
    }
}
