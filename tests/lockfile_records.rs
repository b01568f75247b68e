// tests/lockfile_records.rs

//! Lock file behavior through a full generation pass: records carry real
//! digests, regeneration is deterministic, and environment values are
//! obfuscated.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use shadowdog::config::Config;
use shadowdog::events::{Event, EventBus};
use shadowdog::exec::ProcessRegistry;
use shadowdog::generate::{GenerateOptions, Pipeline};
use shadowdog::lockfile::{read_lock_records, LockFileWriter};

fn write_file(root: &Path, rel: &str, contents: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

fn copy_config() -> Arc<Config> {
    Arc::new(
        serde_json::from_value(serde_json::json!({
            "watchers": [{
                "files": ["src/**/*.txt"],
                "invalidators": {
                    "environment": ["SHADOWDOG_LOCKFILE_TEST_TOKEN"]
                },
                "commands": [{
                    "command": "mkdir -p dist && cp src/app.txt dist/app.txt",
                    "artifacts": [{ "output": "dist/app.txt" }]
                }]
            }]
        }))
        .unwrap(),
    )
}

#[tokio::test]
async fn generation_writes_lock_records_with_digests() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().canonicalize().unwrap();
    write_file(&root, "src/app.txt", "hello");
    std::env::set_var("SHADOWDOG_LOCKFILE_TEST_TOKEN", "supersecret");

    let events = EventBus::new();
    let writer = LockFileWriter::attach(root.clone(), &events);
    let pipeline = Pipeline::new(root.clone(), Arc::clone(&events), ProcessRegistry::new());

    let config = copy_config();
    events.emit(Event::ConfigLoaded {
        config: Arc::clone(&config),
    });

    pipeline
        .generate(&config, GenerateOptions::default())
        .await
        .unwrap();

    let records = read_lock_records(writer.path());
    assert_eq!(records.len(), 1);

    let record = &records[0];
    assert_eq!(record.output, "dist/app.txt");
    assert_eq!(record.sha.len(), 10);
    assert_ne!(record.sha, "not-found");
    assert_eq!(record.cache_key.len(), 10);
    assert_eq!(record.manifest.files, vec!["src/app.txt"]);
    assert_eq!(record.manifest.command, "mkdir -p dist && cp src/app.txt dist/app.txt");

    // Environment values never appear in the clear.
    let obfuscated = record
        .manifest
        .environment
        .get("SHADOWDOG_LOCKFILE_TEST_TOKEN")
        .unwrap();
    assert_eq!(obfuscated, "su*******et");

    // Regeneration is deterministic modulo execution times.
    let first = read_lock_records(writer.path());
    writer.rebuild_now().unwrap();
    let second = read_lock_records(writer.path());
    assert_eq!(first.len(), second.len());
    for (a, b) in first.iter().zip(second.iter()) {
        assert_eq!(a.output, b.output);
        assert_eq!(a.sha, b.sha);
        assert_eq!(a.cache_key, b.cache_key);
        assert_eq!(a.manifest.files, b.manifest.files);
        assert_eq!(a.manifest.command, b.manifest.command);
    }

    std::env::remove_var("SHADOWDOG_LOCKFILE_TEST_TOKEN");

    // The file is newline-terminated, two-space-indented JSON.
    let raw = fs::read_to_string(writer.path()).unwrap();
    assert!(raw.ends_with('\n'));
    assert!(raw.contains("\n  {"));
}
