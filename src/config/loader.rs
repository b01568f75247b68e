// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::config::model::Config;
use crate::config::validate::validate_config;

/// Load a configuration file from a given path and return the raw `Config`.
///
/// This only performs JSON deserialization; it does **not** perform semantic
/// validation (path/glob sanity, etc.). Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    let contents =
        fs::read_to_string(path).with_context(|| format!("reading config file at {path:?}"))?;

    let config: Config = serde_json::from_str(&contents)
        .with_context(|| format!("parsing JSON config from {path:?}"))?;

    Ok(config)
}

/// Load a configuration file from path and run semantic validation.
///
/// This is the recommended entry point for the rest of the application:
///
/// - Reads JSON (unknown keys reject at every level).
/// - Applies defaults (handled by `serde` + `Default` impls).
/// - Checks for:
///   - at least one watcher and at least one command per watcher,
///   - relative output and working-directory paths,
///   - well-formed glob patterns.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<Config> {
    let config = load_from_path(&path)?;
    validate_config(&config)?;
    Ok(config)
}

/// Default config path: `shadowdog.json` in the current working directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("shadowdog.json")
}
