//! blogship - build, package, publish and verify a static blog.

mod build;
mod cli;
mod config;
mod content;
mod deploy;
mod embed;
mod init;
mod logger;
mod package;
mod pipeline;
mod utils;
mod verify;

use anyhow::{Context, Result, bail};
use clap::Parser;
use cli::{Cli, Commands, TriggerKind};
use config::PipelineConfig;
use package::Artifact;
use pipeline::{LiveStages, Run, RunLease, RunReport, RunStatus, Scope, Trigger};
use std::{path::Path, process::ExitCode};
use utils::git;

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Needs neither a project nor a config
    if let Commands::Embed { id, title } = &cli.command {
        println!("{}", embed::youtube(id, title));
        return Ok(ExitCode::SUCCESS);
    }

    if cli.is_init() {
        let root = cli.root.as_deref().unwrap_or(Path::new("./"));
        init::init_project(root, &cli.config)?;
        return Ok(ExitCode::SUCCESS);
    }

    let config = load_config(&cli)?;

    match &cli.command {
        Commands::Run {
            trigger,
            branch,
            commit,
            ..
        } => run_pipeline(&config, *trigger, branch.clone(), commit.clone()),
        Commands::Build { commit, .. } => {
            let commit = resolve_commit(&config, commit.clone())?;
            start(&config, Trigger::Manual, &commit, Scope::Package)
        }
        Commands::Deploy { artifact, .. } => {
            let artifact = Artifact::open(&config.artifacts_dir(), artifact)?;
            artifact.verify_integrity()?;
            log!("deploy"; "artifact {} ({} files, digest {})",
                artifact.run_id(), artifact.files().len(), artifact.manifest().digest);
            let commit = artifact.commit().to_owned();
            start(&config, Trigger::Manual, &commit, Scope::Redeploy(artifact))
        }
        Commands::Verify => {
            verify::verify(&config)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Check => check(&config),
        Commands::Status => status(&config),
        Commands::Init | Commands::Embed { .. } => unreachable!("handled before loading config"),
    }
}

/// Load and validate configuration from CLI arguments
fn load_config(cli: &Cli) -> Result<PipelineConfig> {
    let root = cli.root.as_deref().unwrap_or(Path::new("./"));
    let config_path = root.join(&cli.config);

    let mut config = if config_path.exists() {
        PipelineConfig::from_path(&config_path)?
    } else {
        bail!(
            "Config file `{}` not found. Run `blogship init` first.",
            config_path.display()
        );
    };
    config.update_with_cli(cli);
    config.validate(cli)?;

    Ok(config)
}

/// Handle a trigger event: start a full run if it targets the pipeline branch.
fn run_pipeline(
    config: &PipelineConfig,
    kind: TriggerKind,
    branch: Option<String>,
    commit: Option<String>,
) -> Result<ExitCode> {
    let branch = match branch {
        Some(branch) => Some(branch),
        None if kind == TriggerKind::Push => {
            git::current_branch(&git::open_repo(config.get_root())?)?
        }
        None => None,
    };
    let trigger = Trigger::new(kind, branch)
        .context("HEAD is detached; pass the pushed branch with --branch")?;

    if !trigger.should_run(&config.pipeline.branch) {
        log!("run"; "ignoring {trigger}: the pipeline follows `{}`", config.pipeline.branch);
        return Ok(ExitCode::SUCCESS);
    }

    let commit = resolve_commit(config, commit)?;
    start(config, trigger, &commit, Scope::Full)
}

/// Explicit commit, else `HEAD` of the project repository.
///
/// In-place builds of a directory that is not a repository use `worktree`.
fn resolve_commit(config: &PipelineConfig, commit: Option<String>) -> Result<String> {
    if let Some(commit) = commit {
        return Ok(commit);
    }
    match git::open_repo(config.get_root()) {
        Ok(repo) => git::head_commit(&repo),
        Err(_) if !config.build.clean_checkout => Ok("worktree".to_owned()),
        Err(err) => Err(err),
    }
}

/// Take the concurrency group and drive a run to completion.
fn start(config: &PipelineConfig, trigger: Trigger, commit: &str, scope: Scope) -> Result<ExitCode> {
    pipeline::install_interrupt_handler()?;

    let run_id = pipeline::new_run_id();
    let lease = RunLease::acquire(&config.groups_dir(), &config.pipeline.group, &run_id)?;
    let run = Run::new(trigger, commit, lease, config.runs_dir());

    let stages = LiveStages::new(config);
    let report = run.execute(&stages, scope)?;

    if let Some(artifact) = &report.artifact
        && report.status == RunStatus::Succeeded
    {
        log!("run"; "artifact: {}", artifact.display());
    }
    Ok(exit_code(report.status))
}

/// Validate every post without building.
fn check(config: &PipelineConfig) -> Result<ExitCode> {
    let dir = config.get_root().join(&config.build.content);
    let posts = content::check_content(&dir)?;

    let tags: std::collections::BTreeSet<&str> = posts
        .iter()
        .flat_map(|post| post.tags.iter().map(String::as_str))
        .collect();
    log!("check"; "{} posts, {} tags, all slugs unique", posts.len(), tags.len());
    Ok(ExitCode::SUCCESS)
}

/// Print the latest run report.
fn status(config: &PipelineConfig) -> Result<ExitCode> {
    match RunReport::latest(&config.runs_dir())? {
        Some(report) => {
            log!("status"; "{}", report.summary());
            Ok(exit_code(report.status))
        }
        None => {
            log!("status"; "no runs yet");
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn exit_code(status: RunStatus) -> ExitCode {
    if status.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
