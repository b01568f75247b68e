// src/cache/key.rs

use std::path::Path;

use anyhow::{Context, Result};
use blake3::Hasher;

/// Tool version folded into every cache key, so upgrading shadowdog
/// invalidates prior entries.
pub const TOOL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Host toolchain version folded into every cache key.
pub const TOOLCHAIN_VERSION: &str = env!("CARGO_PKG_RUST_VERSION");

/// Keyed-digest domain separator. Exactly 32 bytes, as blake3 requires.
const KEY: &[u8; 32] = b"shadowdog-cache-key-derivation-1";

/// Number of hex characters kept from the full digest.
const KEY_LEN: usize = 10;

/// Compute the cache key for a command.
///
/// The digest is updated in a fixed order: each resolved input path
/// followed by its contents, each invalidator environment variable's
/// current value (empty string when unset), the command string, the tool
/// version, and the toolchain version. `files` must already be sorted and
/// relative to `root` — the resolver guarantees both, which is what makes
/// the key insensitive to filesystem iteration order.
///
/// A path that does not exist on disk contributes its name with empty
/// contents; the lock file manifest preserves the same path list, so key
/// computation and manifest stay in agreement. Any other read failure is
/// an error carrying the offending path.
pub fn compute_cache_key(
    root: &Path,
    files: &[impl AsRef<Path>],
    environment: &[String],
    command: &str,
) -> Result<String> {
    let mut hasher = Hasher::new_keyed(KEY);

    for file in files {
        let rel = file.as_ref();
        hasher.update(crate::resolver::path_to_slash(rel).as_bytes());
        hasher.update(b"\0");

        let abs = root.join(rel);
        if !abs.is_dir() {
            // Directories resolve here when an artifact dir is an input;
            // their identity is the path alone.
            match std::fs::read(&abs) {
                Ok(contents) => {
                    hasher.update(&contents);
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => {
                    return Err(err).with_context(|| format!("reading cache key input {abs:?}"));
                }
            }
        }
        hasher.update(b"\0");
    }

    for name in environment {
        let value = std::env::var(name).unwrap_or_default();
        hasher.update(name.as_bytes());
        hasher.update(b"\0");
        hasher.update(value.as_bytes());
        hasher.update(b"\0");
    }

    hasher.update(command.as_bytes());
    hasher.update(b"\0");
    hasher.update(TOOL_VERSION.as_bytes());
    hasher.update(b"\0");
    hasher.update(TOOLCHAIN_VERSION.as_bytes());

    Ok(short_hex(&hasher))
}

/// Per-artifact object name: a second keyed digest over the cache key and
/// the artifact's output path.
pub fn artifact_object_name(cache_key: &str, output: &Path) -> String {
    let mut hasher = Hasher::new_keyed(KEY);
    hasher.update(cache_key.as_bytes());
    hasher.update(b"\0");
    hasher.update(crate::resolver::path_to_slash(output).as_bytes());
    short_hex(&hasher)
}

fn short_hex(hasher: &Hasher) -> String {
    let mut hex = hasher.finalize().to_hex().to_string();
    hex.truncate(KEY_LEN);
    hex
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    fn touch(root: &Path, rel: &str, contents: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn key_is_ten_hex_characters() {
        let tmp = tempfile::tempdir().unwrap();
        let key = compute_cache_key(tmp.path(), &[] as &[PathBuf], &[], "true").unwrap();
        assert_eq!(key.len(), 10);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn distinct_inputs_distinct_keys() {
        let tmp = tempfile::tempdir().unwrap();
        touch(tmp.path(), "a.txt", "hello");

        let files = [PathBuf::from("a.txt")];
        let base = compute_cache_key(tmp.path(), &files, &[], "cmd").unwrap();

        // Different command.
        let other = compute_cache_key(tmp.path(), &files, &[], "cmd2").unwrap();
        assert_ne!(base, other);

        // Different contents.
        touch(tmp.path(), "a.txt", "hello!");
        let other = compute_cache_key(tmp.path(), &files, &[], "cmd").unwrap();
        assert_ne!(base, other);

        // Same contents under a different path.
        touch(tmp.path(), "a.txt", "hello");
        touch(tmp.path(), "b.txt", "hello");
        let other =
            compute_cache_key(tmp.path(), &[PathBuf::from("b.txt")], &[], "cmd").unwrap();
        assert_ne!(base, other);
    }

    #[test]
    fn key_is_stable_across_calls() {
        let tmp = tempfile::tempdir().unwrap();
        touch(tmp.path(), "a.txt", "hello");
        let files = [PathBuf::from("a.txt")];

        let first = compute_cache_key(tmp.path(), &files, &[], "cmd").unwrap();
        let second = compute_cache_key(tmp.path(), &files, &[], "cmd").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn unset_environment_hashes_as_empty_string() {
        let tmp = tempfile::tempdir().unwrap();
        let name = "SHADOWDOG_TEST_UNSET_VARIABLE".to_string();
        std::env::remove_var(&name);

        let unset =
            compute_cache_key(tmp.path(), &[] as &[PathBuf], &[name.clone()], "cmd").unwrap();

        std::env::set_var(&name, "");
        let empty =
            compute_cache_key(tmp.path(), &[] as &[PathBuf], &[name.clone()], "cmd").unwrap();
        std::env::remove_var(&name);

        assert_eq!(unset, empty);
    }

    #[test]
    fn missing_file_contributes_its_path() {
        let tmp = tempfile::tempdir().unwrap();
        let with_ghost = compute_cache_key(
            tmp.path(),
            &[PathBuf::from("ghost.txt")],
            &[],
            "cmd",
        )
        .unwrap();
        let without = compute_cache_key(tmp.path(), &[] as &[PathBuf], &[], "cmd").unwrap();
        assert_ne!(with_ghost, without);
    }

    #[test]
    fn object_name_varies_with_output_path() {
        let a = artifact_object_name("abcdef0123", Path::new("dist/a.txt"));
        let b = artifact_object_name("abcdef0123", Path::new("dist/b.txt"));
        assert_ne!(a, b);
        assert_eq!(a.len(), 10);
    }
}
