// tests/supervisor_kill.rs

//! Superseded-work semantics: killing the pending process groups stops a
//! running command before it produces output.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use shadowdog::config::CommandConfig;
use shadowdog::events::EventBus;
use shadowdog::exec::{run_command, ProcessRegistry};
use shadowdog::task::RunContext;

fn ctx_for(root: &Path, command: &str) -> RunContext {
    let command: CommandConfig =
        serde_json::from_value(serde_json::json!({ "command": command })).unwrap();
    RunContext::new(
        root.to_path_buf(),
        Vec::new(),
        Vec::new(),
        command,
        Vec::new(),
        None,
        EventBus::new(),
    )
}

#[tokio::test]
async fn killed_process_group_never_writes_output() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().canonicalize().unwrap();
    let registry = ProcessRegistry::new();

    // A shell with a sleeping child: the kill must reach the whole group.
    let worker_root = root.clone();
    let worker_registry = Arc::clone(&registry);
    let worker = tokio::spawn(async move {
        let ctx = ctx_for(&worker_root, "sleep 2 && echo done > out.txt");
        run_command(&ctx, &worker_registry).await
    });

    // Wait for the child to register as pending.
    for _ in 0..100 {
        if registry.pending_count() > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(registry.pending_count(), 1);

    registry.kill_all();

    let result = worker.await.unwrap();
    assert!(result.is_err());
    assert_eq!(registry.pending_count(), 0);

    // Give the filesystem a beat, then confirm nothing was written.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!root.join("out.txt").exists());
}

#[tokio::test]
async fn second_run_after_kill_completes_normally() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().canonicalize().unwrap();
    let registry = ProcessRegistry::new();

    let worker_root = root.clone();
    let worker_registry = Arc::clone(&registry);
    let worker = tokio::spawn(async move {
        let ctx = ctx_for(&worker_root, "sleep 2 && echo first > out.txt");
        run_command(&ctx, &worker_registry).await
    });

    for _ in 0..100 {
        if registry.pending_count() > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    registry.kill_all();
    let _ = worker.await.unwrap();

    // The superseding run writes the only output the test ever observes.
    let ctx = ctx_for(&root, "echo second > out.txt");
    run_command(&ctx, &registry).await.unwrap();

    assert_eq!(
        std::fs::read_to_string(root.join("out.txt")).unwrap().trim(),
        "second"
    );
}
