//! Project tree discovery.
//!
//! Built on the `ignore` walker: hidden entries and gitignored files are
//! skipped, a denylist catches the usual dependency and build directories,
//! and an optional gitignore-style filter file layers extra exclusions on
//! top.

use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;

const IGNORED_DIRS: &[&str] = &[
    "node_modules",
    "venv",
    ".venv",
    "vendor",
    "dist",
    "build",
    "__pycache__",
    "target",
    ".idea",
    ".vscode",
];

/// Extra exclusion patterns applied on top of the built-in denylist.
#[derive(Default)]
pub struct FileFilter {
    extra: Option<GlobSet>,
}

impl FileFilter {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse a gitignore-like file: one pattern per line, blank lines and
    /// `#` comments skipped. Unparseable patterns are logged and dropped.
    pub fn from_file(path: &Path) -> std::io::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(Self::from_patterns(contents.lines()))
    }

    pub fn from_patterns<'a>(patterns: impl IntoIterator<Item = &'a str>) -> Self {
        let mut builder = GlobSetBuilder::new();
        let mut added = false;
        for line in patterns {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let pattern = line.trim_end_matches('/');
            for candidate in [
                pattern.to_string(),
                format!("**/{pattern}"),
                format!("**/{pattern}/**"),
            ] {
                match Glob::new(&candidate) {
                    Ok(glob) => {
                        builder.add(glob);
                        added = true;
                    }
                    Err(e) => tracing::warn!(pattern = candidate, "skipping invalid ignore pattern: {e}"),
                }
            }
        }
        let extra = if added { builder.build().ok() } else { None };
        Self { extra }
    }

    fn excludes(&self, relative: &Path) -> bool {
        self.extra.as_ref().is_some_and(|set| set.is_match(relative))
    }
}

/// Enumerate the files of a project, returning each path with its byte size.
#[must_use]
pub fn walk_project(root: &Path, filter: &FileFilter) -> Vec<(PathBuf, u64)> {
    let walker = WalkBuilder::new(root)
        .hidden(true)
        .git_ignore(true)
        .git_global(false)
        .git_exclude(false)
        .follow_links(false)
        .filter_entry(|entry| {
            let is_dir = entry.file_type().is_some_and(|t| t.is_dir());
            let name = entry.file_name().to_string_lossy();
            !(is_dir && IGNORED_DIRS.contains(&name.as_ref()))
        })
        .build();

    let mut files = Vec::new();
    for result in walker {
        match result {
            Ok(entry) => {
                if !entry.file_type().is_some_and(|t| t.is_file()) {
                    continue;
                }
                let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
                if filter.excludes(relative) {
                    continue;
                }
                let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
                files.push((entry.path().to_path_buf(), size));
            }
            Err(e) => tracing::warn!("skipping unreadable entry: {e}"),
        }
    }
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(path: &Path, contents: &str) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn skips_denylisted_and_hidden_entries() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(&root.join("main.py"), "print()");
        touch(&root.join("node_modules/pkg/index.js"), "x");
        touch(&root.join("__pycache__/main.cpython-312.pyc"), "x");
        touch(&root.join(".hidden/secret.py"), "x");

        let files = walk_project(root, &FileFilter::empty());
        let names: Vec<&str> = files
            .iter()
            .filter_map(|(p, _)| p.file_name().and_then(|n| n.to_str()))
            .collect();
        assert_eq!(names, vec!["main.py"]);
    }

    #[test]
    fn reports_byte_sizes() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("a.py"), "12345");

        let files = walk_project(dir.path(), &FileFilter::empty());
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].1, 5);
    }

    #[test]
    fn extra_patterns_layer_over_the_denylist() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(&root.join("app.py"), "x");
        touch(&root.join("debug.log"), "x");
        touch(&root.join("generated/schema.py"), "x");

        let filter = FileFilter::from_patterns(["*.log", "generated/", "# a comment", ""]);
        let mut names: Vec<String> = walk_project(root, &filter)
            .into_iter()
            .filter_map(|(p, _)| p.file_name().and_then(|n| n.to_str()).map(String::from))
            .collect();
        names.sort();
        assert_eq!(names, vec!["app.py"]);
    }

    #[test]
    fn filter_file_parses_like_gitignore() {
        let dir = tempfile::tempdir().unwrap();
        let ignore_file = dir.path().join(".analyzerignore");
        touch(&ignore_file, "# exclusions\n*.tmp\n\ncache/\n");

        let filter = FileFilter::from_file(&ignore_file).unwrap();
        assert!(filter.excludes(Path::new("scratch.tmp")));
        assert!(filter.excludes(Path::new("cache/entry.bin")));
        assert!(!filter.excludes(Path::new("src/main.py")));
    }
}
