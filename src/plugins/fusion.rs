// src/plugins/fusion.rs

use std::collections::BTreeSet;
use std::path::PathBuf;

use tracing::debug;

use crate::config::CommandFusionOptions;
use crate::task::{CommandTask, Task};

/// Fuse sibling commands of the same command family.
///
/// Commands under the same `Parallel` node whose command string starts
/// with the configured prefix and that share a working directory collapse
/// into one invocation: `<prefix> arg1 arg2 ...`. Inputs, invalidator
/// names, artifacts, and tags of the fused command are the concatenations
/// of the components. The fused command takes the position of the first
/// member; the tree is otherwise untouched.
pub fn apply(task: Task, options: &CommandFusionOptions) -> Task {
    match task {
        Task::Parallel(children) => Task::Parallel(fuse_siblings(children, options)),
        Task::Serial(children) => Task::Serial(
            children
                .into_iter()
                .map(|child| apply(child, options))
                .collect(),
        ),
        other => other,
    }
}

fn fuse_siblings(children: Vec<Task>, options: &CommandFusionOptions) -> Vec<Task> {
    let prefix = options.prefix.trim();

    // (working directory, position of the group's fused slot)
    let mut groups: Vec<(PathBuf, usize)> = Vec::new();
    let mut out: Vec<Option<Task>> = Vec::new();

    for child in children {
        match child {
            Task::Command(cmd) if suffix_of(&cmd.command.command, prefix).is_some() => {
                let cwd = cmd.command.working_directory.clone();
                match groups.iter().position(|(dir, _)| *dir == cwd) {
                    Some(idx) => {
                        let slot = groups[idx].1;
                        let fused = match out[slot].take() {
                            Some(Task::Command(existing)) => fuse_pair(existing, cmd, prefix),
                            other => unreachable!("fusion slot held {other:?}"),
                        };
                        out[slot] = Some(Task::Command(fused));
                        out.push(None);
                    }
                    None => {
                        groups.push((cwd, out.len()));
                        out.push(Some(Task::Command(cmd)));
                    }
                }
            }
            // Nested groups fuse within their own parallel scope.
            Task::Parallel(nested) => {
                out.push(Some(Task::Parallel(fuse_siblings(nested, options))));
            }
            Task::Serial(nested) => {
                out.push(Some(apply(Task::Serial(nested), options)));
            }
            other => out.push(Some(other)),
        }
    }

    out.into_iter().flatten().collect()
}

fn suffix_of<'a>(command: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = command.strip_prefix(prefix)?;
    if rest.is_empty() {
        Some(rest)
    } else {
        rest.strip_prefix(' ').map(str::trim)
    }
}

fn fuse_pair(first: CommandTask, second: CommandTask, prefix: &str) -> CommandTask {
    let first_suffix = suffix_of(&first.command.command, prefix)
        .unwrap_or_default()
        .to_string();
    let second_suffix = suffix_of(&second.command.command, prefix).unwrap_or_default();

    let mut fused = first;
    fused.command.command = format!("{prefix} {first_suffix} {second_suffix}")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");

    debug!(command = %fused.command.command, "fused command family invocation");

    fused.command.artifacts.extend(second.command.artifacts);
    fused.command.tags.extend(second.command.tags);

    let files: BTreeSet<PathBuf> = fused
        .files
        .into_iter()
        .chain(second.files)
        .collect();
    fused.files = files.into_iter().collect();

    for name in second.environment {
        if !fused.environment.contains(&name) {
            fused.environment.push(name);
        }
    }
    for pattern in second.ignored {
        if !fused.ignored.contains(&pattern) {
            fused.ignored.push(pattern);
        }
    }

    fused
}
