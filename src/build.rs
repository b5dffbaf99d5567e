//! BUILD stage: turn a commit into a generated site.
//!
//! ```text
//! build()
//!     │
//!     ├── checkout        git clone + detach at the commit (or build in place)
//!     ├── check content   front-matter and slug uniqueness
//!     ├── install         [build.install], e.g. `npm ci`
//!     ├── generate        [build.command], e.g. `npm run build`
//!     └── output check    [build.output] must hold at least one file
//! ```

use crate::{
    config::PipelineConfig,
    content::{self, Post},
    exec, log,
    package::remove_tree,
    pipeline::{RunLease, StageError, chain, is_cancellation},
    utils::{exec::NPM_FILTER, git},
};
use anyhow::Result;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Result of a successful build.
#[derive(Debug)]
pub struct Built {
    /// Directory the generator ran in.
    pub workdir: PathBuf,
    /// Generator output inside `workdir`.
    pub output: PathBuf,
    /// Posts found before building; empty when validation is off.
    pub posts: Vec<Post>,
    /// Set when `workdir` is a throwaway checkout.
    checkout: Option<PathBuf>,
}

impl Built {
    /// Remove the throwaway checkout, if any.
    pub fn cleanup(&self) {
        if let Some(checkout) = &self.checkout
            && let Err(err) = remove_tree(checkout)
        {
            log!("build"; "could not remove checkout: {err:#}");
        }
    }
}

/// Keep cancellations as they are, wrap everything else with `wrap`.
fn classify(err: anyhow::Error, wrap: fn(String) -> StageError) -> anyhow::Error {
    if is_cancellation(&err) || err.downcast_ref::<StageError>().is_some() {
        err
    } else {
        wrap(chain(&err)).into()
    }
}

/// Build the site at `commit`.
pub fn build(config: &PipelineConfig, commit: &str, lease: &RunLease) -> Result<Built> {
    let root = config.get_root();

    let (workdir, checkout) = if config.build.clean_checkout {
        let dest = config.checkouts_dir().join(lease.run_id());
        log!("build"; "checking out {} into {}", crate::pipeline::short_sha(commit), dest.display());
        git::clone_at(root, &dest, commit, lease)
            .map_err(|err| classify(err, |e| StageError::Build(format!("checkout failed: {e}"))))?;
        (dest.clone(), Some(dest))
    } else {
        log!("build"; "building in place at {}", root.display());
        (root.to_path_buf(), None)
    };

    let built = Built {
        output: workdir.join(&config.build.output),
        workdir,
        posts: Vec::new(),
        checkout,
    };
    match run_steps(config, built, lease) {
        Ok(built) => Ok(built),
        Err((built, err)) => {
            built.cleanup();
            Err(err)
        }
    }
}

fn run_steps(
    config: &PipelineConfig,
    mut built: Built,
    lease: &RunLease,
) -> Result<Built, (Built, anyhow::Error)> {
    macro_rules! attempt {
        ($e:expr) => {
            match $e {
                Ok(value) => value,
                Err(err) => return Err((built, err)),
            }
        };
    }

    if config.build.validate_content {
        let posts = attempt!(content::check_content(&built.workdir.join(&config.build.content)));
        log!("build"; "{} posts validated", posts.len());
        built.posts = posts;
    }

    let workdir = built.workdir.clone();
    if !config.build.install.is_empty() {
        log!("build"; "installing dependencies: {}", config.build.install.join(" "));
        attempt!(
            exec!(lease=lease; filter=&NPM_FILTER; workdir.as_path(); &config.build.install;)
                .map_err(|err| classify(err, StageError::Install))
        );
    }

    log!("build"; "generating site: {}", config.build.command.join(" "));
    attempt!(
        exec!(lease=lease; filter=&NPM_FILTER; workdir.as_path(); &config.build.command;)
            .map_err(|err| classify(err, StageError::Build))
    );

    if !has_files(&built.output) {
        let output = built.output.clone();
        return Err((built, StageError::EmptyOutput(output).into()));
    }
    Ok(built)
}

/// True if `dir` exists and holds at least one regular file.
pub fn has_files(dir: &Path) -> bool {
    dir.is_dir()
        && WalkDir::new(dir)
            .into_iter()
            .filter_map(Result::ok)
            .any(|entry| entry.file_type().is_file())
}
