// src/lockfile.rs

//! Durable, deterministic artifact manifest.
//!
//! The writer subscribes to the event bus and rebuilds `shadowdog.lock`
//! after a full generation pass, or after every `end` event once daemon
//! mode is enabled. A rebuild walks the configuration in its declared
//! order, so identical configurations produce byte-identical lock files
//! modulo execution times. Writes are serialized behind a single mutex; a
//! lock file containing merge-conflict markers or invalid JSON is
//! discarded and regenerated from scratch.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cache::{compute_cache_key, content_digest, MISSING_DIGEST};
use crate::config::Config;
use crate::events::{Event, EventBus};
use crate::generate::watcher_file_set;
use crate::resolver::IgnoreMatcher;

/// Lock file name, at the project root.
pub const LOCK_FILE_NAME: &str = "shadowdog.lock";

/// One artifact record in the lock file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockRecord {
    pub output: String,

    /// Short content digest of the produced artifact, or `"not-found"`.
    pub sha: String,

    #[serde(rename = "cacheKey")]
    pub cache_key: String,

    /// Milliseconds between the last `begin` and matching `end`.
    #[serde(rename = "executionTime")]
    pub execution_time: u64,

    pub manifest: LockManifest,
}

/// The inputs that went into an artifact's cache key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockManifest {
    pub files: Vec<String>,

    /// Invalidator environment values, obfuscated.
    pub environment: BTreeMap<String, String>,

    pub command: String,
}

/// Event-driven lock file writer. Exclusively owns the lock file handle.
pub struct LockFileWriter {
    root: PathBuf,
    path: PathBuf,
    config: Mutex<Option<Arc<Config>>>,
    daemon_mode: AtomicBool,
    begins: Mutex<HashMap<String, Instant>>,
    durations: Mutex<HashMap<String, u64>>,
    /// Serializes rebuilds: at most one write in flight at any instant.
    write_lock: Mutex<()>,
}

impl LockFileWriter {
    /// Create a writer and subscribe it to the bus.
    pub fn attach(root: PathBuf, bus: &EventBus) -> Arc<Self> {
        let path = root.join(LOCK_FILE_NAME);
        let writer = Arc::new(Self {
            root,
            path,
            config: Mutex::new(None),
            daemon_mode: AtomicBool::new(false),
            begins: Mutex::new(HashMap::new()),
            durations: Mutex::new(HashMap::new()),
            write_lock: Mutex::new(()),
        });

        let subscriber = Arc::clone(&writer);
        bus.subscribe(move |event| subscriber.on_event(event));

        writer
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// After this call every `end` event triggers a rebuild, matching the
    /// daemon's post-initial-generate behavior.
    pub fn enable_daemon_mode(&self) {
        self.daemon_mode.store(true, Ordering::SeqCst);
    }

    fn on_event(&self, event: &Event) {
        match event {
            Event::ConfigLoaded { config } => {
                *self.config.lock().expect("lock writer config poisoned") =
                    Some(Arc::clone(config));
            }
            Event::GenerateStarted => {
                self.begins.lock().expect("lock writer begins poisoned").clear();
            }
            Event::Begin { artifacts } => {
                let mut begins = self.begins.lock().expect("lock writer begins poisoned");
                let now = Instant::now();
                for artifact in artifacts {
                    begins.insert(crate::resolver::path_to_slash(artifact), now);
                }
            }
            Event::End { artifacts } => {
                self.record_durations(artifacts);
                if self.daemon_mode.load(Ordering::SeqCst) {
                    self.rebuild();
                }
            }
            Event::Error { artifacts, .. } => {
                self.record_durations(artifacts);
            }
            Event::AllTasksComplete => {
                self.rebuild();
            }
            _ => {}
        }
    }

    fn record_durations(&self, artifacts: &[PathBuf]) {
        let begins = self.begins.lock().expect("lock writer begins poisoned");
        let mut durations = self.durations.lock().expect("lock writer durations poisoned");
        for artifact in artifacts {
            let key = crate::resolver::path_to_slash(artifact);
            if let Some(begin) = begins.get(&key) {
                durations.insert(key, begin.elapsed().as_millis() as u64);
            }
        }
    }

    /// Rebuild, logging instead of propagating: the lock file is
    /// introspection state and must never fail a build.
    fn rebuild(&self) {
        if let Err(err) = self.rebuild_now() {
            warn!(error = %err, "lock file rebuild failed");
        }
    }

    /// Regenerate the lock file from the current configuration.
    pub fn rebuild_now(&self) -> Result<()> {
        let config = match self.config.lock().expect("lock writer config poisoned").clone() {
            Some(config) => config,
            None => {
                debug!("no configuration loaded; skipping lock file rebuild");
                return Ok(());
            }
        };

        let _guard = self.write_lock.lock().expect("lock writer serialization poisoned");

        let previous = self.read_previous();
        let records = self.build_records(&config, &previous)?;

        let mut json = serde_json::to_string_pretty(&records)
            .context("serializing lock file records")?;
        json.push('\n');

        let tmp = self.path.with_extension("lock.tmp");
        std::fs::write(&tmp, &json)
            .with_context(|| format!("writing lock file {tmp:?}"))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("publishing lock file {:?}", self.path))?;

        info!(path = ?self.path, records = records.len(), "lock file written");
        Ok(())
    }

    /// Previous execution times, keyed by output. A file with merge
    /// conflict markers or invalid JSON is discarded wholesale.
    fn read_previous(&self) -> HashMap<String, u64> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(_) => return HashMap::new(),
        };

        if contents.contains("<<<<<<<") || contents.contains(">>>>>>>") {
            info!("lock file contains merge conflict markers; regenerating from scratch");
            return HashMap::new();
        }

        match serde_json::from_str::<Vec<LockRecord>>(&contents) {
            Ok(records) => records
                .into_iter()
                .map(|record| (record.output, record.execution_time))
                .collect(),
            Err(_) => {
                info!("lock file is not valid JSON; regenerating from scratch");
                HashMap::new()
            }
        }
    }

    fn build_records(
        &self,
        config: &Config,
        previous: &HashMap<String, u64>,
    ) -> Result<Vec<LockRecord>> {
        let durations = self
            .durations
            .lock()
            .expect("lock writer durations poisoned")
            .clone();

        let mut records = Vec::new();

        for watcher in config.enabled_watchers() {
            let (files, _ignores) = watcher_file_set(&self.root, config, watcher)?;
            let file_names: Vec<String> = files
                .iter()
                .map(|p| crate::resolver::path_to_slash(p))
                .collect();

            let environment: BTreeMap<String, String> = watcher
                .invalidators
                .environment
                .iter()
                .map(|name| {
                    let value = std::env::var(name).unwrap_or_default();
                    (name.clone(), obfuscate(&value))
                })
                .collect();

            for command in &watcher.commands {
                let cache_key = compute_cache_key(
                    &self.root,
                    &files,
                    &watcher.invalidators.environment,
                    &command.command,
                )?;

                for artifact in &command.artifacts {
                    let output = crate::resolver::path_to_slash(&artifact.output);
                    let ignore = IgnoreMatcher::new(&artifact.ignore)?;
                    let sha = content_digest(&self.root.join(&artifact.output), &ignore)?
                        .unwrap_or_else(|| MISSING_DIGEST.to_string());

                    let execution_time = durations
                        .get(&output)
                        .or_else(|| previous.get(&output))
                        .copied()
                        .unwrap_or(0);

                    records.push(LockRecord {
                        output,
                        sha,
                        cache_key: cache_key.clone(),
                        execution_time,
                        manifest: LockManifest {
                            files: file_names.clone(),
                            environment: environment.clone(),
                            command: command.command.clone(),
                        },
                    });
                }
            }
        }

        Ok(records)
    }
}

/// Obfuscate an environment value: first two characters, stars, last two.
fn obfuscate(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 4 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..2].iter().collect();
    let tail: String = chars[chars.len() - 2..].iter().collect();
    format!("{head}{}{tail}", "*".repeat(chars.len() - 4))
}

/// Parse an existing lock file, tolerating absence.
pub fn read_lock_records(path: &Path) -> Vec<LockRecord> {
    match std::fs::read_to_string(path) {
        Ok(contents) => serde_json::from_str(&contents).unwrap_or_default(),
        Err(_) => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn obfuscation_keeps_edges() {
        assert_eq!(obfuscate("supersecret"), "su*******et");
        assert_eq!(obfuscate("abcd"), "****");
        assert_eq!(obfuscate(""), "");
    }

    fn test_config(root: &Path) -> Arc<Config> {
        std::fs::create_dir_all(root.join("src")).unwrap();
        std::fs::write(root.join("src/app.txt"), "hello").unwrap();
        let config: Config = serde_json::from_value(serde_json::json!({
            "watchers": [{
                "files": ["src/**/*.txt"],
                "commands": [{
                    "command": "cp src/app.txt dist/app.txt",
                    "artifacts": [{ "output": "dist/app.txt" }]
                }]
            }]
        }))
        .unwrap();
        Arc::new(config)
    }

    #[test]
    fn rebuild_is_deterministic_and_newline_terminated() {
        let tmp = tempfile::tempdir().unwrap();
        let bus = EventBus::new();
        let writer = LockFileWriter::attach(tmp.path().to_path_buf(), &bus);

        bus.emit(Event::ConfigLoaded {
            config: test_config(tmp.path()),
        });
        bus.emit(Event::AllTasksComplete);

        let first = std::fs::read_to_string(writer.path()).unwrap();
        assert!(first.ends_with('\n'));

        bus.emit(Event::AllTasksComplete);
        let second = std::fs::read_to_string(writer.path()).unwrap();
        assert_eq!(first, second);

        let records: Vec<LockRecord> = serde_json::from_str(&first).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].output, "dist/app.txt");
        assert_eq!(records[0].sha, MISSING_DIGEST);
        assert_eq!(records[0].manifest.files, vec!["src/app.txt"]);
    }

    #[test]
    fn conflicted_lock_file_is_regenerated() {
        let tmp = tempfile::tempdir().unwrap();
        let bus = EventBus::new();
        let writer = LockFileWriter::attach(tmp.path().to_path_buf(), &bus);

        std::fs::write(
            writer.path(),
            "<<<<<<< HEAD\n[]\n=======\n[]\n>>>>>>> theirs\n",
        )
        .unwrap();

        bus.emit(Event::ConfigLoaded {
            config: test_config(tmp.path()),
        });
        bus.emit(Event::AllTasksComplete);

        let contents = std::fs::read_to_string(writer.path()).unwrap();
        let records: Vec<LockRecord> = serde_json::from_str(&contents).unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn end_event_records_execution_time() {
        let tmp = tempfile::tempdir().unwrap();
        let bus = EventBus::new();
        let writer = LockFileWriter::attach(tmp.path().to_path_buf(), &bus);

        bus.emit(Event::ConfigLoaded {
            config: test_config(tmp.path()),
        });

        let artifacts = vec![PathBuf::from("dist/app.txt")];
        bus.emit(Event::Begin {
            artifacts: artifacts.clone(),
        });
        std::thread::sleep(std::time::Duration::from_millis(10));
        bus.emit(Event::End { artifacts });
        bus.emit(Event::AllTasksComplete);

        let records = read_lock_records(writer.path());
        assert!(records[0].execution_time >= 10);
    }
}
