//! GitHub Pages target.
//!
//! The artifact is copied into a staging repository private to the run,
//! committed as a single parentless commit and force-pushed to the pages
//! branch. The staging repository is removed once the push is over. Each publish fully replaces the branch, so publishing the
//! same artifact twice yields the same served site.

use super::{PublishTarget, Published};
use crate::{
    config::{PagesTarget, PipelineConfig},
    log,
    package::{Artifact, remove_tree},
    pipeline::{RunLease, StageError, is_cancellation},
    utils::git,
};
use anyhow::{Context, Result};
use std::{
    env, fs,
    path::{Path, PathBuf},
};

/// Push failures that mean the token was missing or refused.
const AUTH_MARKERS: &[&str] = &[
    "Authentication failed",
    "could not read Username",
    "terminal prompts disabled",
    "Permission to",
    "error: 401",
    "error: 403",
];

pub struct GithubPages<'a> {
    config: &'a PagesTarget,
    cname: Option<&'a str>,
    project_root: &'a Path,
    staging: PathBuf,
}

impl<'a> GithubPages<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        Self {
            config: &config.deploy.pages,
            cname: config.site.cname.as_deref(),
            project_root: config.get_root(),
            staging: config.pages_staging_dir(),
        }
    }

    /// Configured URL, else the `origin` remote of the project.
    fn remote_url(&self) -> Result<String> {
        if let Some(url) = &self.config.url {
            return Ok(url.clone());
        }
        let repo = git::open_repo(self.project_root)?;
        git::origin_url(&repo)
            .map(|url| git::to_https(&url))
            .context("no [deploy.pages.url] and the project has no `origin` remote")
    }

    /// Token from the environment, else from `token_path`.
    fn token(&self) -> Result<String, StageError> {
        if let Ok(token) = env::var(&self.config.token_env)
            && !token.trim().is_empty()
        {
            return Ok(token.trim().to_owned());
        }
        if let Some(path) = &self.config.token_path
            && let Ok(token) = fs::read_to_string(path)
            && !token.trim().is_empty()
        {
            return Ok(token.trim().to_owned());
        }
        Err(StageError::Auth {
            target: "pages",
            reason: format!("`{}` is not set", self.config.token_env),
        })
    }

    /// URL to push to. Remote HTTPS URLs carry the token; local mirrors
    /// (paths, `file://`) are pushed to as they are.
    fn push_url(&self, url: &str) -> Result<String> {
        if url.starts_with("https://") {
            let token = self.token()?;
            git::build_authenticated_url(url, Some(&token))
        } else {
            Ok(url.to_owned())
        }
    }

    /// Staging work tree of the run holding `lease`.
    fn staging_dir(&self, lease: &RunLease) -> PathBuf {
        self.staging.join(lease.run_id())
    }

    /// Fill `dir` with the artifact plus pages markers.
    fn stage(&self, dir: &Path, artifact: &Artifact, lease: &RunLease) -> Result<usize> {
        if dir.exists() {
            remove_tree(dir)?;
        }
        fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
        git::open_or_create_repo(dir)?;

        for entry in artifact.files() {
            lease.check()?;
            let dest = dir.join(&entry.path);
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(artifact.file_path(entry), &dest)
                .with_context(|| format!("Failed to stage {}", entry.path))?;
        }

        if self.config.nojekyll {
            fs::write(dir.join(".nojekyll"), "")?;
        }
        if let Some(cname) = self.cname {
            fs::write(dir.join("CNAME"), format!("{cname}\n"))?;
        }
        Ok(artifact.files().len())
    }

    /// Stage, commit and push from `dir`.
    fn push(
        &self,
        dir: &Path,
        artifact: &Artifact,
        lease: &RunLease,
        url: &str,
        push_url: &str,
    ) -> Result<Published> {
        let files = self.stage(dir, artifact, lease)?;
        let message = format!(
            "deploy {} (run {})",
            crate::pipeline::short_sha(artifact.commit()),
            artifact.run_id()
        );
        git::commit_all(
            dir,
            &message,
            &self.config.committer_name,
            &self.config.committer_email,
        )?;

        lease.check()?;
        log!("pages"; "pushing {files} files to {url} ({})", self.config.branch);
        git::force_push(dir, push_url, &self.config.branch, lease).map_err(classify_push)?;

        Ok(Published {
            target: self.name().to_owned(),
            location: format!("{url}#{}", self.config.branch),
            files,
        })
    }
}

/// Map a failed push onto `Auth` or `Publish`; cancellations pass through.
fn classify_push(err: anyhow::Error) -> anyhow::Error {
    if is_cancellation(&err) {
        return err;
    }
    let reason = format!("{err:#}");
    if AUTH_MARKERS.iter().any(|marker| reason.contains(marker)) {
        StageError::Auth {
            target: "pages",
            reason,
        }
        .into()
    } else {
        StageError::Publish {
            target: "pages",
            reason,
        }
        .into()
    }
}

impl PublishTarget for GithubPages<'_> {
    fn name(&self) -> &'static str {
        "pages"
    }

    fn enabled(&self) -> bool {
        self.config.enable
    }

    fn publish(&self, artifact: &Artifact, lease: &RunLease) -> Result<Published> {
        let url = self.remote_url()?;
        let push_url = self.push_url(&url)?;

        let dir = self.staging_dir(lease);
        let result = self.push(&dir, artifact, lease, &url, &push_url);
        if dir.exists() {
            remove_tree(&dir)?;
        }
        result
    }
}
