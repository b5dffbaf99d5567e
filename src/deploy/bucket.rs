//! S3 bucket target.

use super::{PublishTarget, Published, content_type};
use crate::{
    config::{PipelineConfig, S3Target},
    log,
    logger::ProgressBars,
    package::Artifact,
    pipeline::{RunLease, StageError},
};
use ::s3::{bucket::Bucket, creds::Credentials, error::S3Error, region::Region};
use anyhow::{Context, Result};
use std::{env, fs};

pub struct S3Bucket<'a> {
    config: &'a S3Target,
}

impl<'a> S3Bucket<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        Self {
            config: &config.deploy.s3,
        }
    }

    /// Bucket name with `${VAR}` references resolved.
    fn bucket_name(&self) -> Result<String> {
        expand(&self.config.bucket)
    }

    fn region(&self) -> Result<Region> {
        let region = expand(&self.config.region)?;
        match &self.config.endpoint {
            Some(endpoint) => Ok(Region::Custom {
                region,
                endpoint: expand(endpoint)?,
            }),
            None => region
                .parse()
                .with_context(|| format!("unknown region `{region}`")),
        }
    }

    fn credentials(&self) -> Result<Credentials, StageError> {
        let read = |name: &str| {
            env::var(name)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| StageError::Auth {
                    target: "s3",
                    reason: format!("`{name}` is not set"),
                })
        };
        let access = read(&self.config.access_key_env)?;
        let secret = read(&self.config.secret_key_env)?;
        Credentials::new(Some(&access), Some(&secret), None, None, None).map_err(|err| {
            StageError::Auth {
                target: "s3",
                reason: err.to_string(),
            }
        })
    }
}

impl PublishTarget for S3Bucket<'_> {
    fn name(&self) -> &'static str {
        "s3"
    }

    fn enabled(&self) -> bool {
        self.config.enable
    }

    fn publish(&self, artifact: &Artifact, lease: &RunLease) -> Result<Published> {
        let credentials = self.credentials()?;
        let bucket = Bucket::new(&self.bucket_name()?, self.region()?, credentials)?;
        let bucket = if self.config.path_style {
            bucket.with_path_style()
        } else {
            bucket
        };
        let files = artifact.files();
        log!("s3"; "uploading {} files to {}", files.len(), bucket.name());

        let progress = ProgressBars::new(&[("s3", files.len())]);
        for entry in files {
            lease.check()?;
            let key = object_key(&self.config.prefix, &entry.path);
            let body = fs::read(artifact.file_path(entry))
                .with_context(|| format!("Failed to read {}", entry.path))?;

            let response = bucket
                .put_object_with_content_type(&key, &body, content_type(&entry.path))
                .map_err(|err| match err {
                    S3Error::HttpFailWithBody(status, body) => classify(&key, &body, Some(status)),
                    other => classify(&key, &other.to_string(), None),
                })?;
            let status = response.status_code();
            if !(200..300).contains(&status) {
                let body = String::from_utf8_lossy(response.as_slice());
                return Err(classify(&key, &body, Some(status)).into());
            }
            progress.inc(0);
        }
        progress.finish();

        Ok(Published {
            target: self.name().to_owned(),
            location: format!("s3://{}/{}", bucket.name(), self.config.prefix.trim_matches('/')),
            files: files.len(),
        })
    }
}

/// Resolve `${VAR}` references against the environment.
fn expand(value: &str) -> Result<String> {
    shellexpand::env(value)
        .map(|v| v.into_owned())
        .with_context(|| format!("cannot expand `{value}`"))
}

/// `/<prefix>/<path>` with redundant slashes removed.
fn object_key(prefix: &str, path: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        format!("/{path}")
    } else {
        format!("/{prefix}/{path}")
    }
}

/// 401/403 are credential problems, everything else a failed upload.
fn classify(key: &str, body: &str, status: Option<u16>) -> StageError {
    let reason = match status {
        Some(status) => format!("{key}: HTTP {status} {}", body.trim()),
        None => format!("{key}: {body}"),
    };
    let denied = matches!(status, Some(401 | 403))
        || ["AccessDenied", "InvalidAccessKeyId", "SignatureDoesNotMatch"]
            .iter()
            .any(|code| body.contains(code));
    if denied {
        StageError::Auth { target: "s3", reason }
    } else {
        StageError::Publish { target: "s3", reason }
    }
}
