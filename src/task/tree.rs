// src/task/tree.rs

use std::path::PathBuf;

use crate::config::CommandConfig;

/// A command resolved against the filesystem: the configured command plus
/// the watcher-scoped file set and invalidator environment names that feed
/// its cache key.
#[derive(Debug, Clone)]
pub struct CommandTask {
    pub command: CommandConfig,

    /// Resolved input files (watched plus invalidators), relative to the
    /// project root, lexicographically ordered.
    pub files: Vec<PathBuf>,

    /// Invalidator environment variable names.
    pub environment: Vec<String>,

    /// Ignore patterns in effect for this command's watcher (combined with
    /// the config-wide defaults).
    pub ignored: Vec<String>,
}

impl CommandTask {
    /// Declared artifact outputs, in configured order.
    pub fn outputs(&self) -> impl Iterator<Item = &PathBuf> {
        self.command.artifacts.iter().map(|a| &a.output)
    }
}

/// The recursive task structure the generator executes.
///
/// `Empty` is the identity element: plugins that prune commands leave it
/// behind, and traversal treats it as an immediate success.
#[derive(Debug, Clone)]
pub enum Task {
    Command(CommandTask),
    Parallel(Vec<Task>),
    Serial(Vec<Task>),
    Empty,
}

impl Task {
    /// Flatten the tree into its command nodes, left-to-right.
    pub fn commands(&self) -> Vec<&CommandTask> {
        let mut out = Vec::new();
        self.collect_commands(&mut out);
        out
    }

    fn collect_commands<'a>(&'a self, out: &mut Vec<&'a CommandTask>) {
        match self {
            Task::Command(cmd) => out.push(cmd),
            Task::Parallel(children) | Task::Serial(children) => {
                for child in children {
                    child.collect_commands(out);
                }
            }
            Task::Empty => {}
        }
    }

    /// All artifact outputs declared anywhere in the tree.
    pub fn artifact_outputs(&self) -> Vec<PathBuf> {
        self.commands()
            .iter()
            .flat_map(|cmd| cmd.outputs().cloned())
            .collect()
    }

    /// Rewrite every command node with `f`, preserving structure.
    pub fn map_commands(self, f: &impl Fn(CommandTask) -> Task) -> Task {
        match self {
            Task::Command(cmd) => f(cmd),
            Task::Parallel(children) => {
                Task::Parallel(children.into_iter().map(|c| c.map_commands(f)).collect())
            }
            Task::Serial(children) => {
                Task::Serial(children.into_iter().map(|c| c.map_commands(f)).collect())
            }
            Task::Empty => Task::Empty,
        }
    }
}
