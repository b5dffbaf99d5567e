//! Git operations.
//!
//! Repository state (HEAD, branch, remotes) is read with `gix`; clone,
//! commit and push go through the `git` binary so credentials and transports
//! behave exactly as in a shell.

use crate::{
    exec,
    pipeline::{RunLease, is_cancellation},
    utils::exec::GIT_FILTER,
};
use anyhow::{Context, Result, anyhow, bail};
use gix::{Repository, ThreadSafeRepository, remote::Direction};
use std::path::Path;

// ============================================================================
// Repository Operations
// ============================================================================

/// Open an existing git repository
pub fn open_repo(root: &Path) -> Result<ThreadSafeRepository> {
    let repo = gix::open(root).with_context(|| format!("`{}` is not a git repository", root.display()))?;
    Ok(repo.into_sync())
}

/// Open the repository at `root`, creating it if needed
pub fn open_or_create_repo(root: &Path) -> Result<ThreadSafeRepository> {
    if root.join(".git").exists() {
        open_repo(root)
    } else {
        Ok(gix::init(root)?.into_sync())
    }
}

/// Full hex id of the commit `HEAD` points to
pub fn head_commit(repo: &ThreadSafeRepository) -> Result<String> {
    let repo = repo.to_thread_local();
    let id = repo.head_id().context("repository has no commit at HEAD")?;
    Ok(id.detach().to_string())
}

/// Short name of the checked out branch, `None` when HEAD is detached
pub fn current_branch(repo: &ThreadSafeRepository) -> Result<Option<String>> {
    let repo = repo.to_thread_local();
    Ok(repo.head_name()?.map(|name| name.shorten().to_string()))
}

/// URL of the `origin` remote, preferring the push URL
pub fn origin_url(repo: &ThreadSafeRepository) -> Option<String> {
    let repo: Repository = repo.to_thread_local();
    repo.find_remote("origin").ok().and_then(|remote| {
        remote
            .url(Direction::Push)
            .or_else(|| remote.url(Direction::Fetch))
            .map(|url| url.to_bstring().to_string())
    })
}

// ============================================================================
// Checkout
// ============================================================================

/// Clone `source` into `dest` and detach at `commit`.
pub fn clone_at(source: &Path, dest: &Path, commit: &str, lease: &RunLease) -> Result<()> {
    if dest.exists() {
        bail!("checkout directory `{}` already exists", dest.display());
    }
    let parent = dest.parent().ok_or_else(|| anyhow!("Invalid checkout path"))?;
    std::fs::create_dir_all(parent)?;

    exec!(lease=lease; filter=&GIT_FILTER; ["git"]; "clone", "--quiet", "--no-hardlinks", source.as_os_str(), dest.as_os_str())?;
    exec!(lease=lease; filter=&GIT_FILTER; dest; ["git"]; "checkout", "--quiet", "--detach", commit)?;
    Ok(())
}

// ============================================================================
// Publishing
// ============================================================================

/// Stage every file in the work tree and commit, even when nothing changed.
pub fn commit_all(root: &Path, message: &str, name: &str, email: &str) -> Result<()> {
    if message.trim().is_empty() {
        bail!("Commit message cannot be empty");
    }
    let name = format!("user.name={name}");
    let email = format!("user.email={email}");

    exec!(filter=&GIT_FILTER; root; ["git"]; "add", "--all")?;
    exec!(filter=&GIT_FILTER; root; ["git"]; "-c", &name, "-c", &email, "commit", "--quiet", "--allow-empty", "-m", message)?;
    Ok(())
}

/// Replace `branch` on `url` with the local `HEAD`.
pub fn force_push(root: &Path, url: &str, branch: &str, lease: &RunLease) -> Result<()> {
    let refspec = format!("HEAD:refs/heads/{branch}");
    match exec!(lease=lease; filter=&GIT_FILTER; root; ["git"]; "push", "--force", url, &refspec) {
        Ok(_) => Ok(()),
        Err(err) if is_cancellation(&err) => Err(err),
        Err(err) => Err(anyhow!(redact(&format!("{err:#}"), url))),
    }
}

// ============================================================================
// URLs
// ============================================================================

/// Rewrite a GitHub SSH remote (`git@github.com:u/r.git`) to HTTPS.
pub fn to_https(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("git@")
        && let Some((host, path)) = rest.split_once(':')
    {
        return format!("https://{host}/{path}");
    }
    if let Some(rest) = url.strip_prefix("ssh://git@") {
        return format!("https://{rest}");
    }
    url.to_owned()
}

/// Build authenticated HTTPS URL with optional token
pub fn build_authenticated_url(url: &str, token: Option<&str>) -> Result<String> {
    let base_url = url
        .strip_prefix("https://")
        .context("Remote URL must start with https://")?;

    match token.map(str::trim).filter(|t| !t.is_empty()) {
        Some(token) => Ok(format!("https://x-access-token:{token}@{base_url}")),
        None => Ok(format!("https://{base_url}")),
    }
}

/// Remove the credentials of `url` from `text`.
pub fn redact(text: &str, url: &str) -> String {
    match url.strip_prefix("https://").and_then(|rest| rest.split_once('@')) {
        Some((credentials, _)) => text.replace(credentials, "***"),
        None => text.to_owned(),
    }
}

// ============================================================================
// Tests
// ============================================================================
