// tests/layering_pipeline.rs

//! Dependency layering through the full generator: producers run before
//! consumers, and cycles abort before anything executes.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use shadowdog::config::Config;
use shadowdog::errors::TaskError;
use shadowdog::events::EventBus;
use shadowdog::exec::ProcessRegistry;
use shadowdog::generate::{GenerateOptions, Pipeline};
use shadowdog::plugins::apply_tree_plugins;
use shadowdog::task::Task;

fn write_file(root: &Path, rel: &str, contents: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

fn pipeline_for(root: &Path) -> Arc<Pipeline> {
    Pipeline::new(root.to_path_buf(), EventBus::new(), ProcessRegistry::new())
}

/// `build-schema` produces `schema.json` from `schema.rb`; `build-client`
/// consumes `schema.json` and produces `client.ts`.
fn chained_config() -> Config {
    serde_json::from_value(serde_json::json!({
        "plugins": [{ "name": "dependency-layering" }],
        "watchers": [
            {
                "files": ["schema.json"],
                "commands": [{
                    "command": "cp schema.json client.ts",
                    "artifacts": [{ "output": "client.ts" }]
                }]
            },
            {
                "files": ["schema.rb"],
                "commands": [{
                    "command": "cp schema.rb schema.json",
                    "artifacts": [{ "output": "schema.json" }]
                }]
            }
        ]
    }))
    .unwrap()
}

#[tokio::test]
async fn producer_layer_runs_before_consumer_layer() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().canonicalize().unwrap();
    write_file(&root, "schema.rb", "class Schema; end");

    let config = chained_config();
    let pipeline = pipeline_for(&root);

    // Tree shape: Serial(Parallel(build-schema), Parallel(build-client)).
    let tree = pipeline.build_task_tree(&config).unwrap();
    let tree = apply_tree_plugins(tree, &config.plugins).unwrap();
    match &tree {
        Task::Serial(layers) => {
            assert_eq!(layers.len(), 2);
            let first = layers[0].commands();
            let second = layers[1].commands();
            assert_eq!(first[0].command.command, "cp schema.rb schema.json");
            assert_eq!(second[0].command.command, "cp schema.json client.ts");
        }
        other => panic!("expected Serial of layers, got {other:?}"),
    }

    // Driving the tree produces both artifacts; the consumer sees the
    // producer's output.
    pipeline
        .generate(&config, GenerateOptions::default())
        .await
        .unwrap();

    assert_eq!(
        fs::read_to_string(root.join("client.ts")).unwrap(),
        "class Schema; end"
    );
}

#[tokio::test]
async fn cycle_fails_before_any_command_runs() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().canonicalize().unwrap();

    let config: Config = serde_json::from_value(serde_json::json!({
        "plugins": [{ "name": "dependency-layering" }],
        "watchers": [
            {
                "files": ["b.out"],
                "commands": [{
                    "command": "echo a > a.out && echo ran >> ran.log",
                    "artifacts": [{ "output": "a.out" }]
                }]
            },
            {
                "files": ["a.out"],
                "commands": [{
                    "command": "echo b > b.out && echo ran >> ran.log",
                    "artifacts": [{ "output": "b.out" }]
                }]
            }
        ]
    }))
    .unwrap();

    let pipeline = pipeline_for(&root);
    let err = pipeline
        .generate(&config, GenerateOptions::default())
        .await
        .unwrap_err();

    match err.downcast_ref::<TaskError>() {
        Some(TaskError::CycleDetected { outputs }) => {
            assert!(outputs.contains(&"a.out".to_string()));
            assert!(outputs.contains(&"b.out".to_string()));
        }
        other => panic!("unexpected error: {other:?}"),
    }

    assert!(!root.join("ran.log").exists());
}
