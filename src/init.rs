//! Project initialization.
//!
//! Writes a default `blogship.toml` next to the blog and keeps the state
//! directory out of version control.

use crate::{config::PipelineConfig, log};
use anyhow::{Context, Result, bail};
use std::{fs, path::Path};

/// Default config filename
pub const CONFIG_FILE: &str = "blogship.toml";

/// Write the default configuration into `root`.
pub fn init_project(root: &Path, config_name: &Path) -> Result<()> {
    let config_path = root.join(config_name);
    if config_path.exists() {
        bail!(
            "`{}` already exists. Remove it manually or init in a different path.",
            config_path.display()
        );
    }
    fs::create_dir_all(root).with_context(|| format!("Failed to create {}", root.display()))?;

    let defaults = PipelineConfig::default();
    let content = toml::to_string_pretty(&defaults)?;
    fs::write(&config_path, content)
        .with_context(|| format!("Failed to write {}", config_path.display()))?;

    let state = format!("/{}/", defaults.pipeline.state.display());
    init_ignored_files(root, &[state.as_str()])?;

    log!("init"; "wrote {}", config_path.display());
    Ok(())
}

/// Append `patterns` to `.gitignore` unless already listed.
fn init_ignored_files(root: &Path, patterns: &[&str]) -> Result<()> {
    let path = root.join(".gitignore");
    let existing = fs::read_to_string(&path).unwrap_or_default();

    let missing: Vec<&str> = patterns
        .iter()
        .copied()
        .filter(|p| !existing.lines().any(|line| line.trim() == *p))
        .collect();
    if missing.is_empty() {
        return Ok(());
    }

    let mut content = existing;
    if !content.is_empty() && !content.ends_with('\n') {
        content.push('\n');
    }
    for pattern in missing {
        content.push_str(pattern);
        content.push('\n');
    }
    fs::write(&path, content).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}
