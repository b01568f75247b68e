// src/cache/content.rs

use std::path::Path;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

use crate::resolver::IgnoreMatcher;

/// Sentinel recorded in the lock file when an artifact is absent.
pub const MISSING_DIGEST: &str = "not-found";

const DIGEST_LEN: usize = 10;

/// Deterministic content digest of an artifact path.
///
/// - Regular file: SHA-256 over its bytes.
/// - Directory: SHA-256 over each contained file's root-relative path and
///   bytes, in lexicographic path order. Entries matching `ignore` are
///   excluded, mirroring what the archive codec packs, so a digest of an
///   extracted cache entry is comparable to a digest of the on-disk tree.
///
/// Returns `None` when the path does not exist.
pub fn content_digest(path: &Path, ignore: &IgnoreMatcher) -> Result<Option<String>> {
    let metadata = match std::fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err).with_context(|| format!("stat {path:?}")),
    };

    let mut hasher = Sha256::new();
    if metadata.is_dir() {
        let mut files = Vec::new();
        collect_files(path, path, ignore, &mut files)?;
        files.sort();
        for rel in files {
            let abs = path.join(&rel);
            let contents =
                std::fs::read(&abs).with_context(|| format!("reading {abs:?} for digest"))?;
            hasher.update(rel.as_bytes());
            hasher.update(b"\0");
            hasher.update(&contents);
            hasher.update(b"\0");
        }
    } else {
        let contents =
            std::fs::read(path).with_context(|| format!("reading {path:?} for digest"))?;
        hasher.update(&contents);
    }

    let mut hex = format!("{:x}", hasher.finalize());
    hex.truncate(DIGEST_LEN);
    Ok(Some(hex))
}

fn collect_files(
    base: &Path,
    dir: &Path,
    ignore: &IgnoreMatcher,
    out: &mut Vec<String>,
) -> Result<()> {
    let entries =
        std::fs::read_dir(dir).with_context(|| format!("reading directory {dir:?}"))?;

    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let rel = match path.strip_prefix(base) {
            Ok(rel) => crate::resolver::path_to_slash(rel),
            Err(_) => continue,
        };

        if ignore.matches(&rel) {
            continue;
        }

        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            collect_files(base, &path, ignore, out)?;
        } else if file_type.is_file() {
            out.push(rel);
        }
    }

    Ok(())
}
