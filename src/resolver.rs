// src/resolver.rs

//! Glob expansion and ignore matching.
//!
//! Every watcher's `files` and `invalidators.files` patterns go through
//! [`resolve`], which walks the project root once, matches relative paths
//! against a compiled glob set, applies ignore patterns, and returns
//! lexicographically ordered paths relative to the root. Deterministic
//! ordering is what makes cache keys insensitive to filesystem iteration
//! order.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use globset::{Glob, GlobBuilder, GlobSet, GlobSetBuilder};
use regex::bytes::Regex;

/// A single compiled ignore rule. See [`IgnoreMatcher`] for the semantics.
#[derive(Debug, Clone)]
enum IgnoreRule {
    /// `foo` / `foo/`: the path itself and anything under it.
    Prefix(String),
    /// `**/X`: any path containing `X` as a segment sequence.
    Segment(String),
    /// Any other glob, translated to an anchored regex.
    Glob(Regex),
}

/// Compiled ignore patterns.
///
/// Pattern semantics:
/// - exact match: `foo/bar.txt` matches only that path;
/// - directory prefix: `foo` and `foo/` both match `foo` and anything
///   under `foo/`;
/// - `**/X`: matches any path that contains `X` as a path segment
///   (prefix, infix, or suffix);
/// - any other glob: anchored full-path match.
#[derive(Debug, Clone, Default)]
pub struct IgnoreMatcher {
    rules: Vec<IgnoreRule>,
}

impl IgnoreMatcher {
    pub fn new(patterns: &[String]) -> Result<Self> {
        let mut rules = Vec::with_capacity(patterns.len());

        for pattern in patterns {
            let trimmed = pattern.trim_end_matches('/');
            if let Some(rest) = trimmed.strip_prefix("**/") {
                if !has_glob_meta(rest) {
                    rules.push(IgnoreRule::Segment(rest.to_string()));
                    continue;
                }
            }
            if !has_glob_meta(trimmed) {
                rules.push(IgnoreRule::Prefix(trimmed.to_string()));
                continue;
            }
            let glob = GlobBuilder::new(trimmed)
                .literal_separator(true)
                .build()
                .with_context(|| format!("invalid ignore pattern: {pattern}"))?;
            let regex = Regex::new(glob.regex())
                .with_context(|| format!("compiling ignore pattern: {pattern}"))?;
            rules.push(IgnoreRule::Glob(regex));
        }

        Ok(Self { rules })
    }

    /// Returns true if the path (relative, forward slashes) is ignored.
    pub fn matches(&self, rel_path: &str) -> bool {
        let rel_path = rel_path.trim_end_matches('/');
        for rule in &self.rules {
            let hit = match rule {
                IgnoreRule::Prefix(prefix) => {
                    rel_path == prefix || rel_path.starts_with(&format!("{prefix}/"))
                }
                IgnoreRule::Segment(segment) => {
                    format!("/{rel_path}/").contains(&format!("/{segment}/"))
                }
                IgnoreRule::Glob(regex) => regex.is_match(rel_path.as_bytes()),
            };
            if hit {
                return true;
            }
        }
        false
    }

    /// Path-typed convenience for archive entry filtering.
    pub fn matches_path(&self, rel_path: &Path) -> bool {
        self.matches(&path_to_slash(rel_path))
    }
}

/// Expand `globs` relative to `root`, filter through `ignores`, and return
/// matching regular files as root-relative paths in lexicographic order.
///
/// Literal (non-glob) patterns that name an existing directory are kept
/// as-is, so artifact directories can appear as inputs of other commands.
/// With `preserve_nonexistent`, literal patterns that do not exist on disk
/// are also kept; the dependency-layering plugin relies on this to see
/// edges to artifacts that have not been built yet.
pub fn resolve(
    root: &Path,
    globs: &[String],
    ignores: &IgnoreMatcher,
    preserve_nonexistent: bool,
) -> Result<Vec<PathBuf>> {
    let mut set_builder = GlobSetBuilder::new();
    let mut literals: Vec<String> = Vec::new();

    for pattern in globs {
        let normalized = pattern.trim_end_matches('/');
        if !has_glob_meta(normalized) {
            literals.push(normalized.to_string());
        }
        let glob = Glob::new(normalized)
            .with_context(|| format!("invalid file pattern: {pattern}"))?;
        set_builder.add(glob);
    }
    let glob_set = set_builder.build()?;

    // BTreeSet gives lexicographic order and deduplication in one pass.
    let mut matched: BTreeSet<String> = BTreeSet::new();

    walk(root, root, &glob_set, ignores, &mut matched)?;

    for literal in literals {
        if ignores.matches(&literal) {
            continue;
        }
        let on_disk = root.join(&literal);
        if on_disk.is_dir() || (preserve_nonexistent && !on_disk.exists()) {
            matched.insert(literal);
        }
    }

    Ok(matched.into_iter().map(PathBuf::from).collect())
}

fn walk(
    root: &Path,
    dir: &Path,
    glob_set: &GlobSet,
    ignores: &IgnoreMatcher,
    matched: &mut BTreeSet<String>,
) -> Result<()> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        // Directories can disappear between listing and descent.
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(err) => {
            return Err(err).with_context(|| format!("reading directory {dir:?}"));
        }
    };

    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let rel = match path.strip_prefix(root) {
            Ok(rel) => path_to_slash(rel),
            Err(_) => continue,
        };

        if ignores.matches(&rel) {
            continue;
        }

        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            walk(root, &path, glob_set, ignores, matched)?;
        } else if file_type.is_file() && glob_set.is_match(&rel) {
            matched.insert(rel);
        }
    }

    Ok(())
}

/// True if the pattern contains glob metacharacters.
fn has_glob_meta(pattern: &str) -> bool {
    pattern.contains(['*', '?', '[', '{'])
}

/// Relative path with forward slashes, the form all matchers operate on.
pub fn path_to_slash(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"x").unwrap();
    }

    fn resolve_strs(
        root: &Path,
        globs: &[&str],
        ignores: &[&str],
        preserve_nonexistent: bool,
    ) -> Vec<String> {
        let globs: Vec<String> = globs.iter().map(|s| s.to_string()).collect();
        let ignores: Vec<String> = ignores.iter().map(|s| s.to_string()).collect();
        let matcher = IgnoreMatcher::new(&ignores).unwrap();
        resolve(root, &globs, &matcher, preserve_nonexistent)
            .unwrap()
            .into_iter()
            .map(|p| path_to_slash(&p))
            .collect()
    }

    #[test]
    fn resolves_in_lexicographic_order() {
        let tmp = tempfile::tempdir().unwrap();
        touch(tmp.path(), "src/b.txt");
        touch(tmp.path(), "src/a.txt");
        touch(tmp.path(), "src/sub/c.txt");

        let files = resolve_strs(tmp.path(), &["src/**/*.txt"], &[], false);
        assert_eq!(files, vec!["src/a.txt", "src/b.txt", "src/sub/c.txt"]);
    }

    #[test]
    fn ignore_exact_and_dir_prefix() {
        let tmp = tempfile::tempdir().unwrap();
        touch(tmp.path(), "src/a.txt");
        touch(tmp.path(), "src/skip/b.txt");

        let files = resolve_strs(tmp.path(), &["src/**/*.txt"], &["src/skip"], false);
        assert_eq!(files, vec!["src/a.txt"]);

        let files = resolve_strs(tmp.path(), &["src/**/*.txt"], &["src/skip/"], false);
        assert_eq!(files, vec!["src/a.txt"]);
    }

    #[test]
    fn ignore_doublestar_segment_matches_anywhere() {
        let matcher = IgnoreMatcher::new(&["**/node_modules".to_string()]).unwrap();
        assert!(matcher.matches("node_modules"));
        assert!(matcher.matches("a/node_modules"));
        assert!(matcher.matches("a/node_modules/b/c.js"));
        assert!(!matcher.matches("a/node_modules_backup/c.js"));
    }

    #[test]
    fn ignore_general_glob_is_anchored() {
        let matcher = IgnoreMatcher::new(&["src/*.tmp".to_string()]).unwrap();
        assert!(matcher.matches("src/a.tmp"));
        assert!(!matcher.matches("src/sub/a.tmp"));
        assert!(!matcher.matches("other/src/a.tmp"));
    }

    #[test]
    fn preserve_nonexistent_keeps_literal_paths() {
        let tmp = tempfile::tempdir().unwrap();
        touch(tmp.path(), "src/a.txt");

        let files = resolve_strs(
            tmp.path(),
            &["src/a.txt", "dist/generated.json"],
            &[],
            true,
        );
        assert_eq!(files, vec!["dist/generated.json", "src/a.txt"]);

        let files = resolve_strs(tmp.path(), &["src/a.txt", "dist/generated.json"], &[], false);
        assert_eq!(files, vec!["src/a.txt"]);
    }

    #[test]
    fn existing_directory_literal_is_kept() {
        let tmp = tempfile::tempdir().unwrap();
        touch(tmp.path(), "assets/logo.png");

        let files = resolve_strs(tmp.path(), &["assets"], &[], false);
        assert_eq!(files, vec!["assets"]);
    }
}
