//! Repository file discovery and path eligibility.

use std::path::{Component, Path, PathBuf};

use ignore::overrides::{Override, OverrideBuilder};

use crate::error::{IndexError, Result};
use crate::languages::is_supported;

/// Directory names never descended into.
const EXCLUDED_DIRS: &[&str] = &[
    "__pycache__",
    "node_modules",
    ".git",
    "target",
    "build",
    "dist",
    "out",
    ".vscode",
    ".idea",
];

const EXCLUDED_SUFFIXES: &[&str] = &[".min.js", ".min.css", ".pyc"];

const EXCLUDED_NAMES: &[&str] = &["package-lock.json", "yarn.lock"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    /// Path relative to the repository root, `/`-separated.
    pub rel_path: String,
    pub abs_path: PathBuf,
    pub size: u64,
}

/// Include/exclude globs and size ceiling applied on top of the built-in
/// exclusions.
pub struct FileFilter {
    root: PathBuf,
    overrides: Override,
    max_file_size: u64,
}

impl FileFilter {
    /// Compile the glob lists for `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if a glob is malformed.
    pub fn new(root: &Path, include: &[String], exclude: &[String], max_file_size: u64) -> Result<Self> {
        let mut builder = OverrideBuilder::new(root);
        for glob in include {
            builder
                .add(glob)
                .map_err(|e| IndexError::Other(format!("invalid include glob {glob:?}: {e}")))?;
        }
        for glob in exclude {
            builder
                .add(&format!("!{glob}"))
                .map_err(|e| IndexError::Other(format!("invalid exclude glob {glob:?}: {e}")))?;
        }
        let overrides = builder
            .build()
            .map_err(|e| IndexError::Other(format!("glob set: {e}")))?;
        Ok(Self {
            root: root.to_path_buf(),
            overrides,
            max_file_size,
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether a relative file path passes every name-based rule.
    #[must_use]
    pub fn accepts_path(&self, rel_path: &str) -> bool {
        let path = Path::new(rel_path);
        let mut components = path.components().peekable();
        while let Some(component) = components.next() {
            let Component::Normal(name) = component else {
                return false;
            };
            let Some(name) = name.to_str() else {
                return false;
            };
            if name.starts_with('.') {
                return false;
            }
            let is_file = components.peek().is_none();
            if is_file {
                if is_excluded_file(name) {
                    return false;
                }
            } else if EXCLUDED_DIRS.contains(&name) {
                return false;
            }
        }
        is_supported(path) && !self.overrides.matched(self.root.join(path), false).is_ignore()
    }

    /// Name rules plus the size ceiling.
    #[must_use]
    pub fn accepts(&self, rel_path: &str, size: u64) -> bool {
        size <= self.max_file_size && self.accepts_path(rel_path)
    }

    /// Walk the root and return every eligible file, sorted by path.
    ///
    /// Honors `.gitignore`. Unreadable entries are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns an error if the root is not a directory.
    pub fn discover(&self) -> Result<Vec<DiscoveredFile>> {
        if !self.root.is_dir() {
            return Err(IndexError::InvalidPath(format!(
                "{} is not a directory",
                self.root.display()
            )));
        }

        let mut files = Vec::new();
        let walker = ignore::WalkBuilder::new(&self.root)
            .hidden(true)
            .git_ignore(true)
            .require_git(false)
            .overrides(self.overrides.clone())
            .filter_entry(|entry| {
                let is_dir = entry.file_type().is_some_and(|ft| ft.is_dir());
                !(is_dir && entry.file_name().to_str().is_some_and(|n| EXCLUDED_DIRS.contains(&n)))
            })
            .build();

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!("skipping unreadable entry: {e}");
                    continue;
                }
            };
            if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                continue;
            }
            let Some(rel_path) = relative_path(&self.root, entry.path()) else {
                continue;
            };
            let size = entry.metadata().map(|m| m.len()).unwrap_or(u64::MAX);
            if size > self.max_file_size {
                tracing::debug!(file = %rel_path, size, "skipping oversized file");
                continue;
            }
            if !self.accepts_path(&rel_path) {
                continue;
            }
            files.push(DiscoveredFile {
                rel_path,
                abs_path: entry.into_path(),
                size,
            });
        }

        files.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
        Ok(files)
    }
}

fn is_excluded_file(name: &str) -> bool {
    EXCLUDED_NAMES.contains(&name) || EXCLUDED_SUFFIXES.iter().any(|s| name.ends_with(s))
}

/// `/`-separated path of `path` below `root`.
fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Option<Vec<&str>> = rel
        .components()
        .map(|c| match c {
            Component::Normal(s) => s.to_str(),
            _ => None,
        })
        .collect();
    let parts = parts?;
    (!parts.is_empty()).then(|| parts.join("/"))
}

/// Validate a path from a change event: it must be relative and stay inside
/// the repository. Returns the normalized `/`-separated form.
///
/// # Errors
///
/// Returns [`IndexError::InvalidPath`] for absolute paths, `..` segments or
/// empty paths.
pub fn normalize_relative(path: &str) -> Result<String> {
    let trimmed = path.trim();
    let candidate = Path::new(trimmed);
    if trimmed.is_empty() || candidate.is_absolute() || trimmed.starts_with('/') {
        return Err(IndexError::InvalidPath(path.to_owned()));
    }
    let mut parts = Vec::new();
    for component in candidate.components() {
        match component {
            Component::Normal(s) => {
                let s = s
                    .to_str()
                    .ok_or_else(|| IndexError::InvalidPath(path.to_owned()))?;
                parts.push(s);
            }
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(IndexError::InvalidPath(path.to_owned()));
            }
        }
    }
    if parts.is_empty() {
        return Err(IndexError::InvalidPath(path.to_owned()));
    }
    Ok(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn paths(files: &[DiscoveredFile]) -> Vec<&str> {
        files.iter().map(|f| f.rel_path.as_str()).collect()
    }

    #[test]
    fn discovers_supported_files_only() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "a.py", "def a(): pass\n");
        write(root, "docs/guide.md", "# Guide\n");
        write(root, "image.png", "binary");
        write(root, ".env", "SECRET=1");
        write(root, ".hidden/x.py", "x = 1\n");
        write(root, "node_modules/dep/index.js", "x");
        write(root, "target/debug/gen.rs", "fn main() {}");
        write(root, "web/app.min.js", "x");
        write(root, "package-lock.json", "{}");

        let filter = FileFilter::new(root, &[], &[], 1024 * 1024).unwrap();
        let files = filter.discover().unwrap();
        assert_eq!(paths(&files), vec!["a.py", "docs/guide.md"]);
    }

    #[test]
    fn include_and_exclude_globs() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "src/a.py", "a = 1\n");
        write(root, "src/gen/b.py", "b = 1\n");
        write(root, "README.md", "# r\n");

        let filter = FileFilter::new(
            root,
            &["src/**".to_string()],
            &["src/gen/**".to_string()],
            1024,
        )
        .unwrap();
        assert_eq!(paths(&filter.discover().unwrap()), vec!["src/a.py"]);
        assert!(!filter.accepts_path("README.md"));
        assert!(!filter.accepts_path("src/gen/b.py"));
    }

    #[test]
    fn oversized_files_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "big.txt", &"x".repeat(200));
        write(dir.path(), "small.txt", "x");
        let filter = FileFilter::new(dir.path(), &[], &[], 100).unwrap();
        assert_eq!(paths(&filter.discover().unwrap()), vec!["small.txt"]);
        assert!(!filter.accepts("big.txt", 200));
    }

    #[test]
    fn gitignore_respected() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), ".gitignore", "secret.py\n");
        write(dir.path(), "secret.py", "x = 1\n");
        write(dir.path(), "public.py", "x = 1\n");
        let filter = FileFilter::new(dir.path(), &[], &[], 1024).unwrap();
        assert_eq!(paths(&filter.discover().unwrap()), vec!["public.py"]);
    }

    #[test]
    fn missing_root_is_invalid() {
        let filter = FileFilter::new(Path::new("/definitely/not/here"), &[], &[], 1).unwrap();
        assert!(matches!(filter.discover(), Err(IndexError::InvalidPath(_))));
    }

    #[test]
    fn normalize_rejects_escapes() {
        assert_eq!(normalize_relative("./src/a.py").unwrap(), "src/a.py");
        assert_eq!(normalize_relative("src//b.md").unwrap(), "src/b.md");
        assert!(normalize_relative("/etc/passwd").is_err());
        assert!(normalize_relative("../outside.py").is_err());
        assert!(normalize_relative("src/../../x.py").is_err());
        assert!(normalize_relative("").is_err());
        assert!(normalize_relative(".").is_err());
    }

    #[test]
    fn accepts_path_rules() {
        let filter = FileFilter::new(Path::new("/repo"), &[], &[], 10).unwrap();
        assert!(filter.accepts_path("pkg/mod.py"));
        assert!(!filter.accepts_path("pkg/__pycache__/mod.py"));
        assert!(!filter.accepts_path("pkg/.cache/mod.py"));
        assert!(!filter.accepts_path("yarn.lock"));
        assert!(!filter.accepts_path("bin/tool.exe"));
    }
}
