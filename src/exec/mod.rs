// src/exec/mod.rs

//! Process execution layer.
//!
//! [`supervisor`] spawns each command as a `sh -c` child in a fresh
//! process group, captures stderr, and reports exits back to the caller.
//! The daemon uses the spawn/exit hooks to track and kill superseded
//! process groups.

pub mod supervisor;

pub use supervisor::{kill_process_group, run_command, ChildHandle, ProcessRegistry};
