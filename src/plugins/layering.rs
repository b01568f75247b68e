// src/plugins/layering.rs

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::Result;
use petgraph::algo::tarjan_scc;
use petgraph::graphmap::DiGraphMap;
use tracing::debug;

use crate::errors::TaskError;
use crate::task::Task;

/// Reorder commands into dependency layers.
///
/// Each command is a node whose outputs are its artifact paths and whose
/// inputs are its resolved files; a directed edge runs from producer to
/// consumer when a consumer input equals a producer output (or lies under
/// a producer's output directory). The result is a `Serial` of `Parallel`
/// layers, with original order preserved inside each layer. A cycle fails
/// with [`TaskError::CycleDetected`] naming the offending outputs.
pub fn apply(task: Task) -> Result<Task> {
    let commands: Vec<_> = task.commands().into_iter().cloned().collect();
    if commands.is_empty() {
        return Ok(task);
    }

    let mut graph: DiGraphMap<usize, ()> = DiGraphMap::new();
    for idx in 0..commands.len() {
        graph.add_node(idx);
    }

    for (producer_idx, producer) in commands.iter().enumerate() {
        for output in producer.outputs() {
            for (consumer_idx, consumer) in commands.iter().enumerate() {
                if producer_idx == consumer_idx {
                    continue;
                }
                if consumer.files.iter().any(|input| depends_on(input, output)) {
                    graph.add_edge(producer_idx, consumer_idx, ());
                }
            }
        }
    }

    // Strongly connected components of size > 1 (or with a self edge) are
    // the cycles; report every output involved.
    let mut cyclic: BTreeSet<String> = BTreeSet::new();
    for component in tarjan_scc(&graph) {
        let is_cycle = component.len() > 1
            || component
                .first()
                .is_some_and(|&n| graph.contains_edge(n, n));
        if is_cycle {
            for idx in component {
                cyclic.extend(
                    commands[idx]
                        .outputs()
                        .map(|o| crate::resolver::path_to_slash(o)),
                );
            }
        }
    }
    if !cyclic.is_empty() {
        return Err(TaskError::CycleDetected {
            outputs: cyclic.into_iter().collect(),
        }
        .into());
    }

    // Level = longest producer chain above the node. Kahn-style peeling
    // over in-degrees, assigning each wave to the next layer.
    let mut level = vec![0usize; commands.len()];
    let mut indegree = vec![0usize; commands.len()];
    for idx in 0..commands.len() {
        indegree[idx] = graph
            .neighbors_directed(idx, petgraph::Direction::Incoming)
            .count();
    }

    let mut wave: Vec<usize> = (0..commands.len()).filter(|&i| indegree[i] == 0).collect();
    while !wave.is_empty() {
        let mut next_wave = Vec::new();
        for &node in &wave {
            for succ in graph.neighbors_directed(node, petgraph::Direction::Outgoing) {
                level[succ] = level[succ].max(level[node] + 1);
                indegree[succ] -= 1;
                if indegree[succ] == 0 {
                    next_wave.push(succ);
                }
            }
        }
        wave = next_wave;
    }

    let layer_count = level.iter().max().map(|&m| m + 1).unwrap_or(0);
    let mut layers: Vec<Vec<Task>> = vec![Vec::new(); layer_count];
    for (idx, command) in commands.into_iter().enumerate() {
        layers[level[idx]].push(Task::Command(command));
    }

    debug!(layers = layers.len(), "dependency layering complete");
    Ok(Task::Serial(layers.into_iter().map(Task::Parallel).collect()))
}

/// True when `input` is produced by `output`: equal paths, or the input
/// lies under an output directory.
fn depends_on(input: &Path, output: &PathBuf) -> bool {
    input == output.as_path() || input.starts_with(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CommandConfig;
    use crate::task::CommandTask;

    fn command(name: &str, inputs: &[&str], outputs: &[&str]) -> Task {
        let config: CommandConfig = serde_json::from_value(serde_json::json!({
            "command": name,
            "artifacts": outputs.iter().map(|o| serde_json::json!({ "output": o })).collect::<Vec<_>>(),
        }))
        .unwrap();
        Task::Command(CommandTask {
            command: config,
            files: inputs.iter().map(PathBuf::from).collect(),
            environment: Vec::new(),
            ignored: Vec::new(),
        })
    }

    fn layer_commands(task: &Task) -> Vec<Vec<String>> {
        match task {
            Task::Serial(layers) => layers
                .iter()
                .map(|layer| {
                    layer
                        .commands()
                        .iter()
                        .map(|c| c.command.command.clone())
                        .collect()
                })
                .collect(),
            other => panic!("expected Serial of layers, got {other:?}"),
        }
    }

    #[test]
    fn producer_runs_before_consumer() {
        let tree = Task::Parallel(vec![
            command("build-client", &["schema.json"], &["client.ts"]),
            command("build-schema", &["schema.rb"], &["schema.json"]),
        ]);

        let layered = apply(tree).unwrap();
        let layers = layer_commands(&layered);
        assert_eq!(layers, vec![vec!["build-schema"], vec!["build-client"]]);
    }

    #[test]
    fn independent_commands_share_a_layer_in_original_order() {
        let tree = Task::Parallel(vec![
            command("one", &["a"], &["out/one"]),
            command("two", &["b"], &["out/two"]),
        ]);

        let layered = apply(tree).unwrap();
        let layers = layer_commands(&layered);
        assert_eq!(layers, vec![vec!["one", "two"]]);
    }

    #[test]
    fn input_under_output_directory_is_an_edge() {
        let tree = Task::Parallel(vec![
            command("consume", &["gen/types/api.ts"], &["bundle.js"]),
            command("generate", &["schema.rb"], &["gen/types"]),
        ]);

        let layered = apply(tree).unwrap();
        let layers = layer_commands(&layered);
        assert_eq!(layers, vec![vec!["generate"], vec!["consume"]]);
    }

    #[test]
    fn cycle_is_detected_and_names_outputs() {
        let tree = Task::Parallel(vec![
            command("a", &["b.out"], &["a.out"]),
            command("b", &["a.out"], &["b.out"]),
        ]);

        let err = apply(tree).unwrap_err();
        match err.downcast_ref::<TaskError>() {
            Some(TaskError::CycleDetected { outputs }) => {
                assert_eq!(outputs, &vec!["a.out".to_string(), "b.out".to_string()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn artifact_union_is_preserved() {
        let tree = Task::Parallel(vec![
            command("build-client", &["schema.json"], &["client.ts"]),
            command("build-schema", &["schema.rb"], &["schema.json"]),
        ]);
        let before: BTreeSet<_> = tree.artifact_outputs().into_iter().collect();
        let layered = apply(tree).unwrap();
        let after: BTreeSet<_> = layered.artifact_outputs().into_iter().collect();
        assert_eq!(before, after);
    }
}
