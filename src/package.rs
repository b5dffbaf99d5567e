//! PACKAGE stage: freeze the build output into an immutable artifact.
//!
//! ```text
//! <state>/artifacts/<run_id>/
//! ├── manifest.json     # every file with size and blake3 hash
//! └── site/             # read-only copy of the generator output
//! ```
//!
//! Publish targets only ever read from `site/`, so every target serves
//! byte-identical files, and a previous good artifact can be published again.

use crate::{
    content::{Post, page_path},
    log,
    logger::ProgressBars,
    pipeline::{RunLease, StageError},
};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    io::Read,
    path::{Path, PathBuf},
};
use walkdir::WalkDir;

const MANIFEST: &str = "manifest.json";
const SITE_DIR: &str = "site";

// ============================================================================
// Manifest
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Path relative to `site/`, always with `/` separators.
    pub path: String,
    pub size: u64,
    /// Hex encoded blake3 hash of the content.
    pub blake3: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub run_id: String,
    pub commit: String,
    pub created_at: DateTime<Utc>,
    /// Hash over all `(path, hash)` pairs in path order.
    pub digest: String,
    pub files: Vec<ManifestEntry>,
}

impl Manifest {
    fn new(run_id: &str, commit: &str, mut files: Vec<ManifestEntry>) -> Self {
        files.sort_by(|a, b| a.path.cmp(&b.path));
        let digest = aggregate_digest(&files);
        Self {
            run_id: run_id.to_owned(),
            commit: commit.to_owned(),
            created_at: Utc::now(),
            digest,
            files,
        }
    }

    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }
}

fn aggregate_digest(files: &[ManifestEntry]) -> String {
    let mut hasher = blake3::Hasher::new();
    for file in files {
        hasher.update(file.path.as_bytes());
        hasher.update(&[0]);
        hasher.update(file.blake3.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize().as_bytes())
}

fn hash_file(path: &Path) -> Result<(u64, String)> {
    let mut file = fs::File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut hasher = blake3::Hasher::new();
    let mut buf = [0u8; 64 * 1024];
    let mut size = 0u64;
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        size += n as u64;
        hasher.update(&buf[..n]);
    }
    Ok((size, hex::encode(hasher.finalize().as_bytes())))
}

/// `a/b/index.html` regardless of platform separator.
fn manifest_key(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

// ============================================================================
// Artifact
// ============================================================================

/// A packaged build output.
#[derive(Debug, Clone)]
pub struct Artifact {
    root: PathBuf,
    manifest: Manifest,
}

impl Artifact {
    /// Open the artifact of a previous run.
    pub fn open(artifacts_dir: &Path, run_id: &str) -> Result<Self> {
        if run_id.is_empty()
            || run_id.contains(['/', '\\'])
            || run_id.contains("..")
            || run_id.starts_with('.')
        {
            return Err(StageError::Package(format!("invalid run id `{run_id}`")).into());
        }
        let root = artifacts_dir.join(run_id);
        let path = root.join(MANIFEST);
        if !path.is_file() {
            return Err(StageError::Package(format!("no artifact for run `{run_id}`")).into());
        }
        let content =
            fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))?;
        let manifest: Manifest = serde_json::from_str(&content)
            .with_context(|| format!("Malformed manifest {}", path.display()))?;
        Ok(Self { root, manifest })
    }

    pub fn run_id(&self) -> &str {
        &self.manifest.run_id
    }

    pub fn commit(&self) -> &str {
        &self.manifest.commit
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the files to publish.
    pub fn site_dir(&self) -> PathBuf {
        self.root.join(SITE_DIR)
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn files(&self) -> &[ManifestEntry] {
        &self.manifest.files
    }

    /// Absolute path of a manifest entry.
    pub fn file_path(&self, entry: &ManifestEntry) -> PathBuf {
        self.site_dir().join(&entry.path)
    }

    /// Whether the page for `slug` was rendered.
    pub fn contains_page(&self, slug: &str) -> bool {
        let key = manifest_key(&page_path(slug));
        self.manifest
            .files
            .binary_search_by(|f| f.path.as_str().cmp(key.as_str()))
            .is_ok()
    }

    /// Every post must have its page in the artifact.
    pub fn check_pages(&self, posts: &[Post]) -> Result<()> {
        let missing: Vec<String> = posts
            .iter()
            .filter(|post| !self.contains_page(&post.slug))
            .map(|post| {
                format!(
                    "{} (slug `{}`) has no page `{}`",
                    post.source.display(),
                    post.slug,
                    manifest_key(&post.page_path())
                )
            })
            .collect();

        if !missing.is_empty() {
            return Err(StageError::Package(missing.join("\n")).into());
        }
        Ok(())
    }

    /// Re-hash every file and compare against the manifest.
    pub fn verify_integrity(&self) -> Result<()> {
        let site = self.site_dir();
        let corrupt: Vec<String> = self
            .manifest
            .files
            .par_iter()
            .filter_map(|entry| match hash_file(&site.join(&entry.path)) {
                Ok((size, hash)) if size == entry.size && hash == entry.blake3 => None,
                Ok(_) => Some(format!("{} changed since packaging", entry.path)),
                Err(err) => Some(format!("{}: {err:#}", entry.path)),
            })
            .collect();

        if !corrupt.is_empty() {
            return Err(StageError::Package(corrupt.join("\n")).into());
        }
        Ok(())
    }
}

// ============================================================================
// Packaging
// ============================================================================

/// Copy `output` into `<artifacts_dir>/<run_id>` and write its manifest.
///
/// The artifact is assembled under a temporary name and renamed into place,
/// so an interrupted package never looks like a complete artifact.
pub fn package(
    output: &Path,
    artifacts_dir: &Path,
    run_id: &str,
    commit: &str,
    lease: &RunLease,
) -> Result<Artifact> {
    let files = collect_files(output)?;
    if files.is_empty() {
        return Err(StageError::EmptyOutput(output.to_path_buf()).into());
    }

    let staging = artifacts_dir.join(format!(".{run_id}.partial"));
    let root = artifacts_dir.join(run_id);
    if root.exists() {
        return Err(StageError::Package(format!("artifact `{run_id}` already exists")).into());
    }
    if staging.exists() {
        remove_tree(&staging)?;
    }
    let site = staging.join(SITE_DIR);
    fs::create_dir_all(&site).with_context(|| format!("Failed to create {}", site.display()))?;

    log!("package"; "{} files from {}", files.len(), output.display());
    let progress = ProgressBars::new(&[("package", files.len())]);

    let entries: Result<Vec<ManifestEntry>> = files
        .par_iter()
        .map(|rel| {
            lease.check()?;
            let dest = site.join(rel);
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(output.join(rel), &dest)
                .with_context(|| format!("Failed to copy {}", rel.display()))?;
            let (size, hash) = hash_file(&dest)?;
            make_read_only(&dest)?;
            progress.inc(0);
            Ok(ManifestEntry {
                path: manifest_key(rel),
                size,
                blake3: hash,
            })
        })
        .collect();
    progress.finish();

    let entries = match entries {
        Ok(entries) => entries,
        Err(err) => {
            remove_tree(&staging).ok();
            return Err(err);
        }
    };

    let manifest = Manifest::new(run_id, commit, entries);
    let json = serde_json::to_string_pretty(&manifest)?;
    fs::write(staging.join(MANIFEST), json)?;
    fs::rename(&staging, &root)
        .with_context(|| format!("Failed to move artifact into {}", root.display()))?;

    log!("package"; "artifact {} ({} files, {} bytes, digest {})",
        run_id, manifest.files.len(), manifest.total_size(), &manifest.digest[..12]);

    Ok(Artifact { root, manifest })
}

/// Regular files under `dir`, relative to it, sorted.
fn collect_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).follow_links(true) {
        let entry = entry.with_context(|| format!("Failed to walk {}", dir.display()))?;
        if entry.file_type().is_file() {
            let rel = entry.path().strip_prefix(dir)?.to_path_buf();
            files.push(rel);
        }
    }
    files.sort();
    Ok(files)
}

fn make_read_only(path: &Path) -> Result<()> {
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_readonly(true);
    fs::set_permissions(path, perms)?;
    Ok(())
}

/// Remove a directory tree, clearing read-only flags first.
pub fn remove_tree(dir: &Path) -> Result<()> {
    for entry in WalkDir::new(dir).into_iter().filter_map(Result::ok) {
        if entry.file_type().is_file()
            && let Ok(meta) = entry.metadata()
        {
            let mut perms = meta.permissions();
            if perms.readonly() {
                #[allow(clippy::permissions_set_readonly_false)]
                perms.set_readonly(false);
                fs::set_permissions(entry.path(), perms).ok();
            }
        }
    }
    fs::remove_dir_all(dir).with_context(|| format!("Failed to remove {}", dir.display()))
}

/// Keep the newest `keep` artifacts, never removing `current`.
///
/// Returns how many artifacts were deleted.
pub fn prune(artifacts_dir: &Path, keep: usize, current: &str) -> Result<usize> {
    if keep == 0 || !artifacts_dir.is_dir() {
        return Ok(0);
    }
    let mut ids: Vec<String> = fs::read_dir(artifacts_dir)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().join(MANIFEST).is_file())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .collect();
    ids.sort();

    let excess = ids.len().saturating_sub(keep);
    let mut removed = 0;
    for id in ids.iter().take(excess).filter(|id| id.as_str() != current) {
        remove_tree(&artifacts_dir.join(id))?;
        removed += 1;
    }
    if removed > 0 {
        log!("package"; "pruned {removed} old artifact(s)");
    }
    Ok(removed)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn site(dir: &Path) -> PathBuf {
        let out = dir.join("public");
        fs::create_dir_all(out.join("foo")).unwrap();
        fs::write(out.join("index.html"), "<h1>home</h1>").unwrap();
        fs::write(out.join("foo/index.html"), "<h1>foo</h1>").unwrap();
        fs::write(out.join("app.js"), "console.log(1)").unwrap();
        out
    }

    fn lease(dir: &Path) -> RunLease {
        RunLease::acquire(&dir.join("groups"), "pages", "run-1").unwrap()
    }

    fn post(slug: &str) -> Post {
        Post {
            title: "t".into(),
            date: chrono::NaiveDate::from_ymd_opt(2021, 3, 4).unwrap(),
            slug: slug.into(),
            tags: BTreeSet::new(),
            source: PathBuf::from(format!("{}.mdx", slug.trim_matches('/'))),
        }
    }

    #[test]
    fn test_package_writes_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let out = site(dir.path());
        let artifacts = dir.path().join("artifacts");

        let artifact = package(&out, &artifacts, "run-1", "abc123", &lease(dir.path())).unwrap();
        let paths: Vec<_> = artifact.files().iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["app.js", "foo/index.html", "index.html"]);
        assert_eq!(artifact.files()[2].size, "<h1>home</h1>".len() as u64);
        assert_eq!(
            artifact.files()[2].blake3,
            blake3::hash(b"<h1>home</h1>").to_hex().to_string()
        );
        assert_eq!(artifact.commit(), "abc123");
        assert!(artifacts.join("run-1").join(MANIFEST).is_file());
        assert!(!artifacts.join(".run-1.partial").exists());

        let reopened = Artifact::open(&artifacts, "run-1").unwrap();
        assert_eq!(reopened.manifest().digest, artifact.manifest().digest);
    }

    #[test]
    fn test_artifact_files_read_only() {
        let dir = tempfile::tempdir().unwrap();
        let out = site(dir.path());
        let artifact =
            package(&out, &dir.path().join("artifacts"), "run-1", "abc", &lease(dir.path())).unwrap();

        let meta = fs::metadata(artifact.site_dir().join("index.html")).unwrap();
        assert!(meta.permissions().readonly());
    }

    #[test]
    fn test_empty_output_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("public");
        fs::create_dir_all(out.join("static")).unwrap();

        let err = package(&out, &dir.path().join("artifacts"), "run-1", "abc", &lease(dir.path()))
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StageError>(),
            Some(StageError::EmptyOutput(_))
        ));

        let missing = dir.path().join("nope");
        assert!(
            package(&missing, &dir.path().join("artifacts"), "run-1", "abc", &lease(dir.path()))
                .is_err()
        );
    }

    #[test]
    fn test_new_post_page_present() {
        let dir = tempfile::tempdir().unwrap();
        let out = site(dir.path());
        let artifact =
            package(&out, &dir.path().join("artifacts"), "run-1", "abc", &lease(dir.path())).unwrap();

        assert!(artifact.contains_page("/foo"));
        assert!(artifact.contains_page("/"));
        assert!(!artifact.contains_page("/bar"));

        assert!(artifact.check_pages(&[post("/foo")]).is_ok());
        let err = artifact.check_pages(&[post("/foo"), post("/bar")]).unwrap_err();
        assert!(err.to_string().contains("bar/index.html"));
    }

    #[test]
    fn test_digest_depends_on_content() {
        let a = vec![ManifestEntry {
            path: "index.html".into(),
            size: 1,
            blake3: "aa".into(),
        }];
        let mut b = a.clone();
        b[0].blake3 = "bb".into();
        assert_ne!(aggregate_digest(&a), aggregate_digest(&b));
        assert_eq!(aggregate_digest(&a), aggregate_digest(&a.clone()));
    }

    #[cfg(unix)]
    #[test]
    fn test_verify_integrity_detects_change() {
        let dir = tempfile::tempdir().unwrap();
        let out = site(dir.path());
        let artifact =
            package(&out, &dir.path().join("artifacts"), "run-1", "abc", &lease(dir.path())).unwrap();
        assert!(artifact.verify_integrity().is_ok());

        let path = artifact.site_dir().join("app.js");
        let mut perms = fs::metadata(&path).unwrap().permissions();
        #[allow(clippy::permissions_set_readonly_false)]
        perms.set_readonly(false);
        fs::set_permissions(&path, perms).unwrap();
        fs::write(&path, "tampered").unwrap();

        let err = artifact.verify_integrity().unwrap_err();
        assert!(err.to_string().contains("app.js"));
    }

    #[test]
    fn test_open_missing_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let err = Artifact::open(dir.path(), "run-404").unwrap_err();
        assert!(err.to_string().contains("run-404"));
    }

    #[test]
    fn test_open_rejects_paths_outside_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = dir.path().join("state/artifacts");
        let outside = dir.path().join("elsewhere");
        fs::create_dir_all(&outside).unwrap();
        fs::write(outside.join(MANIFEST), "{}").unwrap();

        for id in ["../../elsewhere", "a/b", "a\\b", "..", ".run-1.partial", ""] {
            let err = Artifact::open(&artifacts, id).unwrap_err();
            assert!(err.to_string().contains("invalid run id"), "{id}: {err}");
        }
    }

    #[test]
    fn test_prune_keeps_newest() {
        let dir = tempfile::tempdir().unwrap();
        let out = site(dir.path());
        let artifacts = dir.path().join("artifacts");
        let lease = lease(dir.path());
        for id in ["r1", "r2", "r3", "r4"] {
            package(&out, &artifacts, id, "abc", &lease).unwrap();
        }

        assert_eq!(prune(&artifacts, 2, "r4").unwrap(), 2);
        assert!(!artifacts.join("r1").exists());
        assert!(!artifacts.join("r2").exists());
        assert!(artifacts.join("r3").exists());
        assert!(artifacts.join("r4").exists());

        assert_eq!(prune(&artifacts, 0, "r4").unwrap(), 0);
    }
}
