//! Pipeline configuration management for `blogship.toml`.
//!
//! # Sections
//!
//! | Section          | Purpose                                          |
//! |------------------|--------------------------------------------------|
//! | `[site]`         | Public URL of the live site                      |
//! | `[build]`        | Content/output paths, install and build commands |
//! | `[pipeline]`     | Trigger branch, concurrency group, state dir     |
//! | `[deploy.pages]` | GitHub Pages target                              |
//! | `[deploy.s3]`    | S3 bucket target (disabled by default)           |
//! | `[verify]`       | Post-deploy health check                         |
//!
//! # Example
//!
//! ```toml
//! [site]
//! url = "https://alice.github.io"
//!
//! [build]
//! command = ["npx", "gatsby", "build"]
//!
//! [deploy.pages]
//! branch = "gh-pages"
//! ```
//!
//! Credentials never live in this file. Tokens and keys are read from the
//! environment variables named in `[deploy.*]`.

mod build;
pub mod defaults;
mod deploy;
mod error;
mod pipeline;
mod site;
mod verify;

pub use deploy::{PagesTarget, S3Target};
pub use error::ConfigError;

use build::BuildSection;
use deploy::DeploySection;
use pipeline::PipelineSection;
use site::SiteSection;
use verify::VerifySection;

use crate::cli::{Cli, Commands};
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

// ============================================================================
// Root Configuration
// ============================================================================

/// Root configuration structure representing blogship.toml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    /// Absolute path to the config file (set after loading)
    #[serde(skip)]
    pub config_path: PathBuf,

    #[serde(default)]
    pub site: SiteSection,

    #[serde(default)]
    pub build: BuildSection,

    #[serde(default)]
    pub pipeline: PipelineSection,

    #[serde(default)]
    pub deploy: DeploySection,

    #[serde(default)]
    pub verify: VerifySection,
}

impl PipelineConfig {
    /// Parse configuration from TOML string
    pub fn from_str(content: &str) -> Result<Self> {
        let config: PipelineConfig = toml::from_str(content).map_err(ConfigError::from)?;
        Ok(config)
    }

    /// Load configuration from file path
    pub fn from_path(path: &Path) -> Result<Self> {
        let content =
            fs::read_to_string(path).map_err(|err| ConfigError::Io(path.to_path_buf(), err))?;
        Self::from_str(&content)
    }

    /// Get the root directory path
    pub fn get_root(&self) -> &Path {
        self.build.root.as_deref().unwrap_or(Path::new("./"))
    }

    /// Set the root directory path
    pub fn set_root(&mut self, path: &Path) {
        self.build.root = Some(path.to_path_buf());
    }

    // ------------------------------------------------------------------------
    // State directory layout
    // ------------------------------------------------------------------------

    pub fn state_dir(&self) -> &Path {
        &self.pipeline.state
    }

    /// `<state>/artifacts`, one directory per run id.
    pub fn artifacts_dir(&self) -> PathBuf {
        self.state_dir().join("artifacts")
    }

    /// `<state>/runs`, one JSON report per run id.
    pub fn runs_dir(&self) -> PathBuf {
        self.state_dir().join("runs")
    }

    /// `<state>/groups`, one lock file per concurrency group.
    pub fn groups_dir(&self) -> PathBuf {
        self.state_dir().join("groups")
    }

    /// `<state>/checkouts`, one clean clone per run id.
    pub fn checkouts_dir(&self) -> PathBuf {
        self.state_dir().join("checkouts")
    }

    /// `<state>/pages`, one staging repository per run id.
    pub fn pages_staging_dir(&self) -> PathBuf {
        self.state_dir().join("pages")
    }

    // ------------------------------------------------------------------------
    // CLI overrides
    // ------------------------------------------------------------------------

    /// Update configuration with CLI arguments
    pub fn update_with_cli(&mut self, cli: &Cli) {
        let root = cli
            .root
            .as_ref()
            .cloned()
            .unwrap_or_else(|| self.get_root().to_owned());

        self.update_path_with_root(&root, cli);
        if let Some(url) = &cli.site_url {
            self.site.url = Some(url.clone());
        }

        match &cli.command {
            Commands::Run {
                group,
                in_place,
                s3,
                ..
            } => {
                Self::update_option(&mut self.pipeline.group, group.as_ref());
                if let Some(in_place) = in_place {
                    self.build.clean_checkout = !in_place;
                }
                Self::update_option(&mut self.deploy.s3.enable, s3.as_ref());
            }
            Commands::Build { in_place, .. } => {
                if let Some(in_place) = in_place {
                    self.build.clean_checkout = !in_place;
                }
            }
            Commands::Deploy { group, s3, .. } => {
                Self::update_option(&mut self.pipeline.group, group.as_ref());
                Self::update_option(&mut self.deploy.s3.enable, s3.as_ref());
            }
            _ => {}
        }
    }

    /// Update config option if CLI value is provided
    fn update_option<T: Clone>(config_option: &mut T, cli_option: Option<&T>) {
        if let Some(option) = cli_option {
            *config_option = option.clone();
        }
    }

    /// Update all paths relative to root directory and normalize to absolute paths
    fn update_path_with_root(&mut self, root: &Path, cli: &Cli) {
        Self::update_option(&mut self.build.content, cli.content.as_ref());
        Self::update_option(&mut self.build.output, cli.output.as_ref());

        let root = Self::normalize_path(root);
        self.set_root(&root);

        self.config_path = Self::normalize_path(&root.join(&cli.config));
        self.pipeline.state = Self::normalize_path(&root.join(&self.pipeline.state));

        // Content and output stay relative: BUILD resolves them against the
        // checkout it builds in, which is not the project root for clean checkouts.

        if let Some(token_path) = &self.deploy.pages.token_path {
            let expanded = shellexpand::tilde(&token_path.to_string_lossy()).into_owned();
            let path = PathBuf::from(expanded);
            self.deploy.pages.token_path = Some(if path.is_relative() {
                Self::normalize_path(&root.join(path))
            } else {
                Self::normalize_path(&path)
            });
        }
    }

    /// Normalize a path to absolute, using canonicalize if the path exists
    fn normalize_path(path: &Path) -> PathBuf {
        path.canonicalize().unwrap_or_else(|_| {
            if path.is_absolute() {
                path.to_path_buf()
            } else {
                std::env::current_dir()
                    .map(|cwd| cwd.join(path))
                    .unwrap_or_else(|_| path.to_path_buf())
            }
        })
    }

    // ------------------------------------------------------------------------
    // Validation
    // ------------------------------------------------------------------------

    /// Validate configuration for the current command
    pub fn validate(&self, cli: &Cli) -> Result<()> {
        if !self.config_path.exists() {
            bail!("Config file not found");
        }

        if let Some(url) = &self.site.url
            && !url.starts_with("http://")
            && !url.starts_with("https://")
        {
            bail!(ConfigError::Validation(
                "[site.url] must start with http:// or https://".into()
            ));
        }

        let verifies =
            matches!(cli.command, Commands::Verify) || (cli.publishes() && self.verify.enable);
        if verifies && self.site.url.is_none() {
            bail!(ConfigError::Validation(
                "[site.url] is required for the health check (or set [verify.enable] = false)".into()
            ));
        }

        if matches!(cli.command, Commands::Run { .. } | Commands::Build { .. }) {
            if !self.build.install.is_empty() {
                Self::check_command_installed("[build.install]", &self.build.install)?;
            }
            Self::check_command_installed("[build.command]", &self.build.command)?;
            if self.build.clean_checkout {
                Self::check_command_installed("git", &["git".to_owned()])?;
            }
        }

        if cli.publishes() {
            self.validate_targets()?;
        }

        Ok(())
    }

    /// Checks on the publish targets, independent of the filesystem.
    fn validate_targets(&self) -> Result<()> {
        if !self.deploy.any_enabled() {
            bail!(ConfigError::Validation(
                "no publish target enabled: set [deploy.pages.enable] or [deploy.s3.enable]".into()
            ));
        }

        let pages = &self.deploy.pages;
        if pages.enable {
            if let Some(url) = &pages.url
                && !url.starts_with("https://")
                && !url.starts_with("file://")
                && !Path::new(url).is_absolute()
            {
                bail!(ConfigError::Validation(
                    "[deploy.pages.url] must be an https:// URL or a local mirror path".into()
                ));
            }
            if pages.branch.trim().is_empty() {
                bail!(ConfigError::Validation(
                    "[deploy.pages.branch] must not be empty".into()
                ));
            }
            if let Some(path) = &pages.token_path
                && !path.is_file()
            {
                bail!(ConfigError::Validation(
                    "[deploy.pages.token_path] not found or not a file".into()
                ));
            }
        }

        let s3 = &self.deploy.s3;
        if s3.enable {
            if s3.bucket.trim().is_empty() {
                bail!(ConfigError::Validation(
                    "[deploy.s3.bucket] is required when [deploy.s3.enable] = true".into()
                ));
            }
            if s3.region.trim().is_empty() {
                bail!(ConfigError::Validation(
                    "[deploy.s3.region] must not be empty".into()
                ));
            }
        }

        Ok(())
    }

    /// Check if a command is installed and available
    fn check_command_installed(field: &str, command: &[String]) -> Result<()> {
        if command.is_empty() {
            bail!(ConfigError::Validation(format!(
                "{field} must have at least one element"
            )));
        }

        let cmd = &command[0];
        which::which(cmd)
            .with_context(|| format!("`{cmd}` not found. Please install it first."))?;

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_from_str_full() {
        let config = PipelineConfig::from_str(
            r#"
            [site]
            url = "https://alice.github.io"

            [build]
            content = "content/blog"
            output = "public"
            install = ["npm", "ci"]
            command = ["npx", "gatsby", "build"]

            [pipeline]
            branch = "main"
            group = "pages"

            [deploy.pages]
            url = "https://github.com/alice/alice.github.io"
            branch = "gh-pages"

            [deploy.s3]
            enable = false
            bucket = "alice-blog"

            [verify]
            paths = ["/", "/foo/"]
        "#,
        )
        .unwrap();

        assert_eq!(config.site.url.as_deref(), Some("https://alice.github.io"));
        assert_eq!(config.build.content, PathBuf::from("content/blog"));
        assert_eq!(config.deploy.s3.bucket, "alice-blog");
        assert_eq!(config.verify.paths, vec!["/", "/foo/"]);
    }

    #[test]
    fn test_from_str_invalid_toml() {
        assert!(PipelineConfig::from_str("[site\nurl = 1").is_err());
    }

    #[test]
    fn test_unknown_top_level_field_rejection() {
        assert!(PipelineConfig::from_str("[serve]\nport = 1").is_err());
    }

    #[test]
    fn test_from_path_missing() {
        let err = PipelineConfig::from_path(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(err.downcast_ref::<ConfigError>().is_some());
    }

    #[test]
    fn test_get_root_default() {
        let config = PipelineConfig::default();
        assert_eq!(config.get_root(), Path::new("./"));
    }

    #[test]
    fn test_default_roundtrips_through_toml() {
        let text = toml::to_string_pretty(&PipelineConfig::default()).unwrap();
        let config = PipelineConfig::from_str(&text).unwrap();
        assert_eq!(config.pipeline.group, "pages");
        assert!(config.deploy.pages.enable);
    }

    #[test]
    fn test_update_with_cli_paths_and_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_str().unwrap();
        let cli = Cli::parse_from([
            "blogship",
            "run",
            "--root",
            root,
            "--group",
            "preview",
            "--s3",
            "--in-place",
            "--site-url",
            "https://preview.example.com",
        ]);

        let mut config = PipelineConfig::default();
        config.update_with_cli(&cli);

        let root = dir.path().canonicalize().unwrap();
        assert_eq!(config.get_root(), root.as_path());
        assert_eq!(config.config_path, root.join("blogship.toml"));
        assert_eq!(config.state_dir(), root.join(".blogship"));
        assert_eq!(config.artifacts_dir(), root.join(".blogship/artifacts"));
        assert_eq!(config.pages_staging_dir(), root.join(".blogship/pages"));
        assert_eq!(config.pipeline.group, "preview");
        assert!(config.deploy.s3.enable);
        assert!(!config.build.clean_checkout);
        assert_eq!(config.site.url.as_deref(), Some("https://preview.example.com"));
        // Content and output stay relative to whatever tree is built
        assert_eq!(config.build.output, PathBuf::from("public"));
    }

    #[test]
    fn test_validate_targets_none_enabled() {
        let mut config = PipelineConfig::default();
        config.deploy.pages.enable = false;
        let err = config.validate_targets().unwrap_err();
        assert!(err.to_string().contains("no publish target"));
    }

    #[test]
    fn test_validate_targets_s3_needs_bucket() {
        let mut config = PipelineConfig::default();
        config.deploy.s3.enable = true;
        assert!(config.validate_targets().is_err());

        config.deploy.s3.bucket = "alice-blog".into();
        assert!(config.validate_targets().is_ok());
    }

    #[test]
    fn test_validate_targets_pages_url() {
        let mut config = PipelineConfig::default();
        config.deploy.pages.url = Some("git@github.com:alice/alice.github.io.git".into());
        assert!(config.validate_targets().is_err());

        config.deploy.pages.url = Some("http://github.com/alice/alice.github.io.git".into());
        assert!(config.validate_targets().is_err());

        config.deploy.pages.url = Some("file:///srv/mirror/site.git".into());
        assert!(config.validate_targets().is_ok());
    }

    #[test]
    fn test_validate_requires_site_url_for_verify() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("blogship.toml"), "").unwrap();
        let cli = Cli::parse_from(["blogship", "verify", "--root", dir.path().to_str().unwrap()]);

        let mut config = PipelineConfig::default();
        config.update_with_cli(&cli);
        let err = config.validate(&cli).unwrap_err();
        assert!(err.to_string().contains("[site.url]"));

        config.site.url = Some("ftp://alice.github.io".into());
        assert!(config.validate(&cli).is_err());

        config.site.url = Some("https://alice.github.io".into());
        assert!(config.validate(&cli).is_ok());
    }

    #[test]
    fn test_check_command_installed_empty() {
        assert!(PipelineConfig::check_command_installed("[build.command]", &[]).is_err());
    }
}
