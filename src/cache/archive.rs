// src/cache/archive.rs

use std::io::{Read, Write};
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::resolver::IgnoreMatcher;

/// Pack an artifact path into a gzip-framed tar archive.
///
/// The archive's root is the artifact's parent directory; its single
/// top-level member is the artifact's base name. For directory artifacts
/// every contained entry is appended in lexicographic order; entries whose
/// artifact-relative path matches `ignore` are omitted. Producer-side
/// errors propagate — no partial archive reaches the caller.
pub fn pack(artifact: &Path, ignore: &IgnoreMatcher) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    pack_into(artifact, ignore, &mut out)?;
    Ok(out)
}

/// Streaming variant of [`pack`].
pub fn pack_into(artifact: &Path, ignore: &IgnoreMatcher, writer: impl Write) -> Result<()> {
    let base = artifact
        .file_name()
        .ok_or_else(|| anyhow!("artifact path {artifact:?} has no base name"))?
        .to_string_lossy()
        .into_owned();

    let encoder = GzEncoder::new(writer, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(true);

    let metadata = std::fs::metadata(artifact)
        .with_context(|| format!("stat artifact {artifact:?} for packing"))?;

    if metadata.is_dir() {
        builder
            .append_dir(&base, artifact)
            .with_context(|| format!("appending {artifact:?}"))?;

        let mut entries = Vec::new();
        collect_entries(artifact, artifact, &mut entries)?;
        entries.sort();

        for rel in entries {
            if ignore.matches(&rel) {
                continue;
            }
            let abs = artifact.join(&rel);
            let name = format!("{base}/{rel}");
            if abs.is_dir() {
                builder
                    .append_dir(&name, &abs)
                    .with_context(|| format!("appending {abs:?}"))?;
            } else {
                builder
                    .append_path_with_name(&abs, &name)
                    .with_context(|| format!("appending {abs:?}"))?;
            }
        }
    } else {
        builder
            .append_path_with_name(artifact, &base)
            .with_context(|| format!("appending {artifact:?}"))?;
    }

    let encoder = builder.into_inner().context("finalizing tar stream")?;
    encoder.finish().context("finalizing gzip stream")?;
    Ok(())
}

/// Unpack an archive produced by [`pack`] into `dest`.
///
/// Writes `dest/<basename>`, creating intermediate directories. Entries
/// whose artifact-relative path matches `ignore` are skipped.
pub fn unpack(reader: impl Read, dest: &Path, ignore: &IgnoreMatcher) -> Result<()> {
    std::fs::create_dir_all(dest).with_context(|| format!("creating {dest:?}"))?;

    let decoder = GzDecoder::new(reader);
    let mut archive = tar::Archive::new(decoder);

    for entry in archive.entries().context("reading archive entries")? {
        let mut entry = entry.context("reading archive entry")?;
        let path = entry.path().context("reading entry path")?.into_owned();

        // First component is the artifact base name; the filter sees the
        // remainder, same as on the pack side.
        let mut components = path.components();
        components.next();
        let rel = components.as_path();
        if !rel.as_os_str().is_empty() && ignore.matches_path(rel) {
            continue;
        }

        entry
            .unpack_in(dest)
            .with_context(|| format!("unpacking {path:?} into {dest:?}"))?;
    }

    Ok(())
}

fn collect_entries(base: &Path, dir: &Path, out: &mut Vec<String>) -> Result<()> {
    let entries =
        std::fs::read_dir(dir).with_context(|| format!("reading directory {dir:?}"))?;

    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let rel = match path.strip_prefix(base) {
            Ok(rel) => crate::resolver::path_to_slash(rel),
            Err(_) => continue,
        };
        out.push(rel);

        if entry.file_type()?.is_dir() {
            collect_entries(base, &path, out)?;
        }
    }

    Ok(())
}
