//! Stage implementations used by real runs.

use super::{
    error::{StageError, chain, is_cancellation},
    lock::RunLease,
    run::Stages,
};
use crate::{
    build::{self, Built},
    config::PipelineConfig,
    deploy::{GithubPages, PublishTarget, S3Bucket},
    package::{self, Artifact},
    verify,
};
use anyhow::Result;

pub struct LiveStages<'a> {
    config: &'a PipelineConfig,
    pages: GithubPages<'a>,
    alt: S3Bucket<'a>,
}

impl<'a> LiveStages<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        Self {
            config,
            pages: GithubPages::new(config),
            alt: S3Bucket::new(config),
        }
    }

    fn package_checked(&self, built: &Built, commit: &str, lease: &RunLease) -> Result<Artifact> {
        let artifacts = self.config.artifacts_dir();
        let artifact = package::package(&built.output, &artifacts, lease.run_id(), commit, lease)?;
        if self.config.build.validate_content
            && let Err(err) = artifact.check_pages(&built.posts)
        {
            // A rejected artifact must not be reopened by a later deploy
            package::remove_tree(artifact.root())?;
            return Err(err);
        }
        package::prune(&artifacts, self.config.pipeline.keep_artifacts, lease.run_id())?;
        Ok(artifact)
    }
}

impl Stages for LiveStages<'_> {
    type Output = Built;

    fn build(&self, commit: &str, lease: &RunLease) -> Result<Built> {
        build::build(self.config, commit, lease)
    }

    fn package(&self, built: Built, commit: &str, lease: &RunLease) -> Result<Artifact> {
        let result = self.package_checked(&built, commit, lease);
        built.cleanup();
        result.map_err(|err| {
            if is_cancellation(&err) || err.downcast_ref::<StageError>().is_some() {
                err
            } else {
                StageError::Package(chain(&err)).into()
            }
        })
    }

    fn targets(&self) -> [&dyn PublishTarget; 2] {
        [&self.pages, &self.alt]
    }

    fn verify_enabled(&self) -> bool {
        self.config.verify.enable
    }

    fn verify(&self) -> Result<Vec<String>> {
        verify::verify(self.config)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::pipeline::{Run, RunStatus, Scope, Trigger};
    use std::{fs, path::Path};

    const POST: &str = "---\ntitle: Foo\ndate: 2024-01-31\nslug: /foo\n---\nbody\n";

    fn project(dir: &Path, command: &str) -> PipelineConfig {
        fs::create_dir_all(dir.join("content")).unwrap();
        fs::write(dir.join("content/foo.mdx"), POST).unwrap();

        let mut config = PipelineConfig::default();
        config.set_root(dir);
        config.pipeline.state = dir.join(".blogship");
        config.build.clean_checkout = false;
        config.build.install = vec!["true".into()];
        config.build.command = vec!["sh".into(), "-c".into(), command.into()];
        config
    }

    fn package_only(config: &PipelineConfig, run_id: &str) -> RunStatus {
        let lease = RunLease::acquire(&config.groups_dir(), "pages", run_id).unwrap();
        let run = Run::new(Trigger::Manual, "HEAD", lease, config.runs_dir());
        run.execute(&LiveStages::new(config), Scope::Package)
            .unwrap()
            .status
    }

    #[test]
    fn test_missing_page_leaves_no_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let config = project(dir.path(), "mkdir -p public && echo home > public/index.html");

        assert_eq!(package_only(&config, "run-1"), RunStatus::PackageFailed);
        assert!(Artifact::open(&config.artifacts_dir(), "run-1").is_err());
        assert!(!config.artifacts_dir().join("run-1").exists());
    }

    #[test]
    fn test_complete_output_is_packaged() {
        let dir = tempfile::tempdir().unwrap();
        let config = project(
            dir.path(),
            "mkdir -p public/foo && echo home > public/index.html && echo foo > public/foo/index.html",
        );

        assert_eq!(package_only(&config, "run-1"), RunStatus::Succeeded);
        let artifact = Artifact::open(&config.artifacts_dir(), "run-1").unwrap();
        assert!(artifact.contains_page("/foo"));
        artifact.verify_integrity().unwrap();
    }
}
