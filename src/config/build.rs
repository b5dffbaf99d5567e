//! `[build]` section configuration.
//!
//! Paths and commands of the BUILD stage.

use super::defaults;
use educe::Educe;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// `[build]` section in blogship.toml - how the site generator is driven.
///
/// # Example
/// ```toml
/// [build]
/// content = "content/blog"
/// output = "public"
/// install = ["npm", "ci"]
/// command = ["npx", "gatsby", "build"]
/// clean_checkout = true
/// ```
#[derive(Debug, Clone, Educe, Serialize, Deserialize)]
#[educe(Default)]
#[serde(default, deny_unknown_fields)]
pub struct BuildSection {
    /// Project root directory (usually set via CLI `--root`).
    #[serde(default = "defaults::build::root")]
    #[educe(Default = defaults::build::root())]
    pub root: Option<PathBuf>,

    /// Directory holding the MDX posts.
    #[serde(default = "defaults::build::content")]
    #[educe(Default = defaults::build::content())]
    pub content: PathBuf,

    /// Directory the generator writes the static site into.
    #[serde(default = "defaults::build::output")]
    #[educe(Default = defaults::build::output())]
    pub output: PathBuf,

    /// Dependency install command. Empty skips the install step.
    #[serde(default = "defaults::build::install")]
    #[educe(Default = defaults::build::install())]
    pub install: Vec<String>,

    /// Generator build command.
    #[serde(default = "defaults::build::command")]
    #[educe(Default = defaults::build::command())]
    pub command: Vec<String>,

    /// Build from a fresh clone at the triggering commit.
    #[serde(default = "defaults::r#true")]
    #[educe(Default = true)]
    pub clean_checkout: bool,

    /// Check front-matter and slugs before building, and post pages after.
    #[serde(default = "defaults::r#true")]
    #[educe(Default = true)]
    pub validate_content: bool,
}

#[cfg(test)]
mod tests {
    use super::super::PipelineConfig;
    use std::path::PathBuf;

    #[test]
    fn test_build_defaults() {
        let config: PipelineConfig = toml::from_str("").unwrap();
        assert_eq!(config.build.content, PathBuf::from("content"));
        assert_eq!(config.build.output, PathBuf::from("public"));
        assert_eq!(config.build.install, vec!["npm", "ci"]);
        assert_eq!(config.build.command, vec!["npm", "run", "build"]);
        assert!(config.build.clean_checkout);
        assert!(config.build.validate_content);
    }

    #[test]
    fn test_build_custom_commands() {
        let config: PipelineConfig = toml::from_str(
            r#"
            [build]
            install = []
            command = ["npx", "gatsby", "build", "--prefix-paths"]
            clean_checkout = false
        "#,
        )
        .unwrap();
        assert!(config.build.install.is_empty());
        assert_eq!(config.build.command[1], "gatsby");
        assert!(!config.build.clean_checkout);
    }

    #[test]
    fn test_build_unknown_field_rejection() {
        let result: Result<PipelineConfig, _> = toml::from_str(
            r#"
            [build]
            minify = true
        "#,
        );
        assert!(result.is_err());
    }
}
