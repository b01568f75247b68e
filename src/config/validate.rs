// src/config/validate.rs

use anyhow::{anyhow, Context, Result};
use globset::Glob;

use crate::config::model::Config;

/// Run semantic validation against a loaded configuration.
///
/// This checks:
/// - there is at least one watcher, each with at least one command
/// - every glob pattern compiles
/// - artifact outputs and working directories are relative and stay inside
///   the project root
///
/// Schema-level concerns (types, unknown keys, required fields) are already
/// enforced during deserialization.
pub fn validate_config(cfg: &Config) -> Result<()> {
    ensure_has_watchers(cfg)?;
    validate_patterns(cfg)?;
    validate_paths(cfg)?;
    Ok(())
}

fn ensure_has_watchers(cfg: &Config) -> Result<()> {
    if cfg.watchers.is_empty() {
        return Err(anyhow!("config must contain at least one watcher"));
    }
    for (idx, watcher) in cfg.watchers.iter().enumerate() {
        if watcher.files.is_empty() {
            return Err(anyhow!("watcher #{idx} must declare at least one file pattern"));
        }
        if watcher.commands.is_empty() {
            return Err(anyhow!("watcher #{idx} must declare at least one command"));
        }
    }
    Ok(())
}

fn validate_patterns(cfg: &Config) -> Result<()> {
    for (idx, watcher) in cfg.watchers.iter().enumerate() {
        for pattern in watcher.files.iter().chain(watcher.invalidators.files.iter()) {
            Glob::new(pattern)
                .with_context(|| format!("invalid glob pattern '{pattern}' in watcher #{idx}"))?;
        }
    }
    Ok(())
}

fn validate_paths(cfg: &Config) -> Result<()> {
    for (idx, watcher) in cfg.watchers.iter().enumerate() {
        for command in watcher.commands.iter() {
            if command.working_directory.is_absolute() {
                return Err(anyhow!(
                    "watcher #{idx}: workingDirectory {:?} must be relative to the project root",
                    command.working_directory
                ));
            }
            for artifact in command.artifacts.iter() {
                if artifact.output.is_absolute() {
                    return Err(anyhow!(
                        "watcher #{idx}: artifact output {:?} must be relative to the project root",
                        artifact.output
                    ));
                }
                if path_escapes_root(&artifact.output) {
                    return Err(anyhow!(
                        "watcher #{idx}: artifact output {:?} escapes the project root",
                        artifact.output
                    ));
                }
            }
        }
    }
    Ok(())
}

fn path_escapes_root(path: &std::path::Path) -> bool {
    use std::path::Component;

    let mut depth: i32 = 0;
    for component in path.components() {
        match component {
            Component::ParentDir => {
                depth -= 1;
                if depth < 0 {
                    return true;
                }
            }
            Component::Normal(_) => depth += 1,
            _ => {}
        }
    }
    false
}
