//! Blog posts and their front-matter.
//!
//! The site generator renders the MDX bodies; here we only read the YAML
//! block at the top of each post so broken metadata fails the run before the
//! generator is started, and so slug collisions are reported explicitly
//! instead of surfacing as a routing clash inside the generator.
//!
//! ```text
//! ---
//! title: Hello
//! date: 2021-03-04
//! slug: /hello
//! tags: [rust, blog]
//! ---
//! Body in MDX...
//! ```

use crate::pipeline::StageError;
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate};
use rayon::prelude::*;
use serde::Deserialize;
use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    path::{Path, PathBuf},
};
use walkdir::WalkDir;

/// Extensions treated as posts.
const POST_EXTENSIONS: &[&str] = &["mdx", "md"];

/// Front-matter delimiter line.
const FENCE: &str = "---";

// ============================================================================
// Types
// ============================================================================

/// Raw front-matter as written by the author.
///
/// Unknown keys (description, cover image, ...) are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct FrontMatter {
    pub title: String,
    pub date: String,
    pub slug: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// A validated post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Post {
    pub title: String,
    pub date: NaiveDate,
    /// Normalized URL path, e.g. `/hello`.
    pub slug: String,
    pub tags: BTreeSet<String>,
    pub source: PathBuf,
}

impl Post {
    /// Build a post from the full text of a source file.
    pub fn parse(source: &Path, text: &str) -> Result<Self> {
        let front = parse_front_matter(text)?;

        if front.title.trim().is_empty() {
            anyhow::bail!("`title` must not be empty");
        }

        Ok(Self {
            title: front.title.trim().to_owned(),
            date: parse_date(&front.date)?,
            slug: normalize_slug(&front.slug)?,
            tags: front
                .tags
                .iter()
                .map(|t| t.trim().to_owned())
                .filter(|t| !t.is_empty())
                .collect(),
            source: source.to_path_buf(),
        })
    }

    /// File the generator renders this post to, relative to the output root.
    ///
    /// `/foo` → `foo/index.html`, `/` → `index.html`.
    pub fn page_path(&self) -> PathBuf {
        page_path(&self.slug)
    }
}

/// File a slug renders to, relative to the output root.
pub fn page_path(slug: &str) -> PathBuf {
    let trimmed = slug.trim_matches('/');
    if trimmed.is_empty() {
        PathBuf::from("index.html")
    } else {
        Path::new(trimmed).join("index.html")
    }
}

// ============================================================================
// Parsing
// ============================================================================

/// Extract and deserialize the YAML block between the two `---` lines.
pub fn parse_front_matter(text: &str) -> Result<FrontMatter> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut lines = text.lines();

    match lines.next() {
        Some(first) if first.trim_end() == FENCE => {}
        _ => anyhow::bail!("missing front-matter: the file must start with `---`"),
    }

    let mut yaml = String::new();
    let mut closed = false;
    for line in lines {
        if line.trim_end() == FENCE {
            closed = true;
            break;
        }
        yaml.push_str(line);
        yaml.push('\n');
    }
    if !closed {
        anyhow::bail!("unterminated front-matter: no closing `---`");
    }

    serde_yaml_ng::from_str(&yaml).context("invalid front-matter")
}

/// Accept `YYYY-MM-DD` or an RFC 3339 timestamp.
fn parse_date(raw: &str) -> Result<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| DateTime::parse_from_rfc3339(raw).map(|dt| dt.date_naive()))
        .with_context(|| format!("invalid `date` `{raw}`: expected YYYY-MM-DD or RFC 3339"))
}

/// Normalize a slug to `/segment/segment` form.
pub fn normalize_slug(raw: &str) -> Result<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        anyhow::bail!("`slug` must not be empty");
    }
    if raw.chars().any(|c| c.is_whitespace() || c == '?' || c == '#') {
        anyhow::bail!("`slug` `{raw}` must not contain whitespace, `?` or `#`");
    }
    if raw.split('/').any(|seg| seg == "..") {
        anyhow::bail!("`slug` `{raw}` must not contain `..`");
    }

    let segments: Vec<&str> = raw.split('/').filter(|s| !s.is_empty() && *s != ".").collect();
    Ok(format!("/{}", segments.join("/")))
}

// ============================================================================
// Collection & Validation
// ============================================================================

fn is_post(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| POST_EXTENSIONS.contains(&ext))
}

/// Load every post under `content_dir`, sorted by source path.
///
/// All broken files are reported together.
pub fn load_posts(content_dir: &Path) -> Result<Vec<Post>> {
    if !content_dir.is_dir() {
        return Err(StageError::Content(format!(
            "content directory `{}` not found",
            content_dir.display()
        ))
        .into());
    }

    let mut paths: Vec<PathBuf> = WalkDir::new(content_dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file() && is_post(e.path()))
        .map(walkdir::DirEntry::into_path)
        .collect();
    paths.sort();

    let results: Vec<_> = paths
        .par_iter()
        .map(|path| {
            let rel = path.strip_prefix(content_dir).unwrap_or(path);
            fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))
                .and_then(|text| Post::parse(rel, &text))
                .map_err(|err| format!("{}: {err:#}", rel.display()))
        })
        .collect();

    let (posts, errors): (Vec<_>, Vec<_>) = results.into_iter().partition(Result::is_ok);
    let errors: Vec<String> = errors.into_iter().filter_map(Result::err).collect();
    if !errors.is_empty() {
        return Err(StageError::Content(errors.join("\n")).into());
    }

    Ok(posts.into_iter().filter_map(Result::ok).collect())
}

/// Reject posts that share a slug.
pub fn validate_posts(posts: &[Post]) -> Result<()> {
    let mut by_slug: BTreeMap<&str, Vec<&Path>> = BTreeMap::new();
    for post in posts {
        by_slug
            .entry(post.slug.as_str())
            .or_default()
            .push(post.source.as_path());
    }

    let duplicates: Vec<String> = by_slug
        .iter()
        .filter(|(_, sources)| sources.len() > 1)
        .map(|(slug, sources)| {
            let files: Vec<String> = sources.iter().map(|p| p.display().to_string()).collect();
            format!("slug `{slug}` used by {}", files.join(", "))
        })
        .collect();

    if !duplicates.is_empty() {
        return Err(StageError::Content(duplicates.join("\n")).into());
    }
    Ok(())
}

/// Load and validate in one step.
pub fn check_content(content_dir: &Path) -> Result<Vec<Post>> {
    let posts = load_posts(content_dir)?;
    validate_posts(&posts)?;
    Ok(posts)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO: &str = "---\ntitle: Hello\ndate: 2021-03-04\nslug: /hello\ntags: [rust, blog]\n---\n# Hi\n";

    fn write(dir: &Path, name: &str, text: &str) {
        let path = dir.join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, text).unwrap();
    }

    #[test]
    fn test_parse_post() {
        let post = Post::parse(Path::new("hello.mdx"), HELLO).unwrap();
        assert_eq!(post.title, "Hello");
        assert_eq!(post.date, NaiveDate::from_ymd_opt(2021, 3, 4).unwrap());
        assert_eq!(post.slug, "/hello");
        assert!(post.tags.contains("rust"));
        assert_eq!(post.tags.len(), 2);
    }

    #[test]
    fn test_parse_rfc3339_date_and_no_tags() {
        let text = "---\ntitle: Later\ndate: \"2022-01-02T10:30:00+02:00\"\nslug: later/\n---\n";
        let post = Post::parse(Path::new("later.mdx"), text).unwrap();
        assert_eq!(post.date, NaiveDate::from_ymd_opt(2022, 1, 2).unwrap());
        assert_eq!(post.slug, "/later");
        assert!(post.tags.is_empty());
    }

    #[test]
    fn test_parse_ignores_unknown_keys() {
        let text = "---\ntitle: T\ndate: 2020-01-01\nslug: /t\ndescription: extra\n---\n";
        assert!(Post::parse(Path::new("t.mdx"), text).is_ok());
    }

    #[test]
    fn test_missing_front_matter() {
        let err = parse_front_matter("# just markdown").unwrap_err();
        assert!(err.to_string().contains("must start with `---`"));
    }

    #[test]
    fn test_unterminated_front_matter() {
        let err = parse_front_matter("---\ntitle: T\n").unwrap_err();
        assert!(err.to_string().contains("unterminated"));
    }

    #[test]
    fn test_missing_required_field() {
        let text = "---\ntitle: T\ndate: 2020-01-01\n---\n";
        assert!(Post::parse(Path::new("t.mdx"), text).is_err());
    }

    #[test]
    fn test_invalid_date() {
        let text = "---\ntitle: T\ndate: yesterday\nslug: /t\n---\n";
        let err = Post::parse(Path::new("t.mdx"), text).unwrap_err();
        assert!(format!("{err:#}").contains("yesterday"));
    }

    #[test]
    fn test_normalize_slug() {
        assert_eq!(normalize_slug("/foo").unwrap(), "/foo");
        assert_eq!(normalize_slug("foo/").unwrap(), "/foo");
        assert_eq!(normalize_slug("/2021//03/post/").unwrap(), "/2021/03/post");
        assert_eq!(normalize_slug("/").unwrap(), "/");
        assert!(normalize_slug("").is_err());
        assert!(normalize_slug("/with space").is_err());
        assert!(normalize_slug("/a/../b").is_err());
        assert!(normalize_slug("/a?b").is_err());
    }

    #[test]
    fn test_page_path() {
        assert_eq!(page_path("/foo"), PathBuf::from("foo/index.html"));
        assert_eq!(page_path("/2021/post"), PathBuf::from("2021/post/index.html"));
        assert_eq!(page_path("/"), PathBuf::from("index.html"));
    }

    #[test]
    fn test_load_posts_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "b.mdx", "---\ntitle: B\ndate: 2020-01-02\nslug: /b\n---\n");
        write(dir.path(), "nested/a.md", "---\ntitle: A\ndate: 2020-01-01\nslug: /a\n---\n");
        write(dir.path(), "image.png", "not a post");

        let posts = load_posts(dir.path()).unwrap();
        assert_eq!(posts.len(), 2);
        assert_eq!(posts[0].source, PathBuf::from("b.mdx"));
        assert_eq!(posts[1].source, PathBuf::from("nested/a.md"));
    }

    #[test]
    fn test_load_posts_reports_every_broken_file() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "ok.mdx", HELLO);
        write(dir.path(), "bad1.mdx", "no front-matter");
        write(dir.path(), "bad2.mdx", "---\ntitle: [unclosed\n---\n");

        let err = load_posts(dir.path()).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("bad1.mdx"));
        assert!(msg.contains("bad2.mdx"));
        assert!(!msg.contains("ok.mdx"));
    }

    #[test]
    fn test_load_posts_missing_dir() {
        let err = load_posts(Path::new("/no/such/content")).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StageError>(),
            Some(StageError::Content(_))
        ));
    }

    #[test]
    fn test_duplicate_slugs() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "one.mdx", "---\ntitle: One\ndate: 2020-01-01\nslug: /same\n---\n");
        write(dir.path(), "two.mdx", "---\ntitle: Two\ndate: 2020-01-02\nslug: same/\n---\n");

        let err = check_content(dir.path()).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("slug `/same`"));
        assert!(msg.contains("one.mdx"));
        assert!(msg.contains("two.mdx"));
    }
}
