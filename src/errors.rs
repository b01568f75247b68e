// src/errors.rs

//! Structured error taxonomy for the build engine.
//!
//! `anyhow` is used at the orchestration edges (config loading, wiring,
//! ad-hoc IO); `TaskError` carries the cases callers need to distinguish:
//! cycle detection, command failure, and artifact readiness.

use std::path::PathBuf;

pub use anyhow::{Error, Result};

/// Errors surfaced by task execution and task-tree construction.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// The dependency-layering plugin found a cycle between command outputs.
    #[error("dependency cycle between outputs: {}", outputs.join(", "))]
    CycleDetected { outputs: Vec<String> },

    /// A command exited with a non-zero status.
    #[error("command `{command}` failed with exit code {exit_code}\n{stderr}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    /// A declared artifact was missing, unreadable, or empty after the
    /// producing command succeeded.
    #[error("artifact not available after command: {}", output.display())]
    ArtifactUnavailable { output: PathBuf },
}
