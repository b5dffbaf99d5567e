//! Publish targets.
//!
//! Every target reads the same packaged artifact. GitHub Pages is the primary
//! target and the only one the health check follows; the S3 bucket is an
//! alternative host that stays off unless enabled.

mod bucket;
mod pages;

pub use bucket::S3Bucket;
pub use pages::GithubPages;

use crate::{
    package::Artifact,
    pipeline::{RunLease, StageError, is_cancellation},
};
use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Where an artifact went.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Published {
    pub target: String,
    /// Branch URL, bucket URL, ...
    pub location: String,
    pub files: usize,
}

/// A host the artifact can be published to.
///
/// Publishing replaces whatever the target served before.
pub trait PublishTarget: Sync {
    fn name(&self) -> &'static str;

    fn enabled(&self) -> bool;

    fn publish(&self, artifact: &Artifact, lease: &RunLease) -> Result<Published>;
}

/// Run a target, classifying plain errors as publish failures.
pub fn publish_with(
    target: &dyn PublishTarget,
    artifact: &Artifact,
    lease: &RunLease,
) -> Result<Published> {
    lease.check()?;
    target.publish(artifact, lease).map_err(|err| {
        if is_cancellation(&err) || err.downcast_ref::<StageError>().is_some() {
            err
        } else {
            StageError::Publish {
                target: target.name(),
                reason: format!("{err:#}"),
            }
            .into()
        }
    })
}

/// MIME type sent with an uploaded file.
pub fn content_type(path: &str) -> &'static str {
    let ext = path
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "js" | "mjs" => "text/javascript; charset=utf-8",
        "json" | "map" | "webmanifest" => "application/json",
        "xml" => "application/xml",
        "rss" => "application/rss+xml",
        "txt" => "text/plain; charset=utf-8",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "avif" => "image/avif",
        "ico" => "image/x-icon",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "pdf" => "application/pdf",
        "mp4" => "video/mp4",
        "wasm" => "application/wasm",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Failing;

    impl PublishTarget for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }
        fn enabled(&self) -> bool {
            true
        }
        fn publish(&self, _: &Artifact, _: &RunLease) -> Result<Published> {
            anyhow::bail!("connection reset")
        }
    }

    #[test]
    fn test_content_type() {
        assert_eq!(content_type("index.html"), "text/html; charset=utf-8");
        assert_eq!(content_type("static/app.JS"), "text/javascript; charset=utf-8");
        assert_eq!(content_type("img/cover.webp"), "image/webp");
        assert_eq!(content_type("CNAME"), "application/octet-stream");
    }

    #[test]
    fn test_plain_error_becomes_publish_error() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("public");
        std::fs::create_dir_all(&out).unwrap();
        std::fs::write(out.join("index.html"), "x").unwrap();
        let lease = RunLease::acquire(&dir.path().join("groups"), "pages", "run-1").unwrap();
        let artifact =
            crate::package::package(&out, &dir.path().join("artifacts"), "run-1", "abc", &lease)
                .unwrap();

        let err = publish_with(&Failing, &artifact, &lease).unwrap_err();
        match err.downcast_ref::<StageError>() {
            Some(StageError::Publish { target, reason }) => {
                assert_eq!(*target, "failing");
                assert!(reason.contains("connection reset"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
