// src/config/mod.rs

//! Configuration loading and validation.
//!
//! Responsibilities:
//! - Define the JSON-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate semantic invariants like relative paths and glob syntax
//!   (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path};
pub use model::{
    ArtifactConfig, CommandConfig, CommandFusionOptions, Config, InvalidatorsConfig,
    LocalCacheOptions, PluginConfig, RemoteCacheOptions, TagFilterOptions, WatcherConfig,
};
pub use validate::validate_config;
