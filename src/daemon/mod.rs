// src/daemon/mod.rs

//! Watch-mode daemon.
//!
//! The daemon owns the active filesystem watchers, the pause flag, and
//! the pending-change set. Each debounced change kills the pending
//! process groups and re-enters the generator's command pipeline; RPC
//! triggers (`pause` / `resume` / `computeArtifact` / ...) arrive over
//! the event bus and are handled in the same single-threaded loop. A
//! separate watch on the configuration file hot-reloads it, rebuilding
//! the watchers on success and keeping the previous configuration on
//! failure.

pub mod watcher;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, SystemTime};

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cache::CacheMiddleware;
use crate::config::{load_and_validate, Config, WatcherConfig};
use crate::events::{Event, EventBus};
use crate::generate::{watcher_file_set, Pipeline};
use crate::task::CommandTask;

use watcher::{spawn_config_watch, spawn_watch, WatchEvent, WatcherHandle};

/// Shared daemon state the RPC surface can observe.
#[derive(Debug, Default)]
pub struct DaemonState {
    pub running: AtomicBool,
    pub paused: AtomicBool,
}

pub struct Daemon {
    root: PathBuf,
    config_path: PathBuf,
    config: Arc<RwLock<Arc<Config>>>,
    events: Arc<EventBus>,
    pipeline: Arc<Pipeline>,
    state: Arc<DaemonState>,
    pending_changes: Mutex<BTreeSet<PathBuf>>,
}

impl Daemon {
    pub fn new(
        root: PathBuf,
        config_path: PathBuf,
        config: Arc<RwLock<Arc<Config>>>,
        events: Arc<EventBus>,
        pipeline: Arc<Pipeline>,
        state: Arc<DaemonState>,
    ) -> Self {
        Self {
            root,
            config_path,
            config,
            events,
            pipeline,
            state,
            pending_changes: Mutex::new(BTreeSet::new()),
        }
    }

    fn current_config(&self) -> Arc<Config> {
        Arc::clone(&self.config.read().expect("config lock poisoned"))
    }

    /// Main daemon loop. Returns after a shutdown signal or an `exit`
    /// event; shutdown is idempotent.
    pub async fn run(self) -> Result<()> {
        self.state.running.store(true, Ordering::SeqCst);

        let (change_tx, mut change_rx) = mpsc::unbounded_channel::<WatchEvent>();
        let (reload_tx, mut reload_rx) = mpsc::unbounded_channel::<()>();
        let (bus_tx, mut bus_rx) = mpsc::unbounded_channel::<Event>();
        self.events.forward(bus_tx);

        let mut watch_handles = self.spawn_watch_handles(&change_tx)?;
        let _config_watch = spawn_config_watch(&self.config_path, reload_tx)?;

        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

        info!("daemon started; watching for changes");

        loop {
            tokio::select! {
                Some(event) = change_rx.recv() => {
                    self.handle_change(event).await;
                }
                Some(()) = reload_rx.recv() => {
                    if self.reload_config() {
                        watch_handles = self.spawn_watch_handles(&change_tx)?;
                    }
                }
                Some(event) = bus_rx.recv() => {
                    match event {
                        Event::Pause => self.handle_pause(),
                        Event::Resume => self.handle_resume(),
                        Event::ComputeArtifact { output } => {
                            self.handle_compute_artifact(&output).await;
                        }
                        Event::ComputeAllArtifacts { .. } => {
                            self.handle_compute_all().await;
                        }
                        Event::Exit => break,
                        _ => {}
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    self.events.emit(Event::Exit);
                    break;
                }
                _ = sigterm.recv() => {
                    self.events.emit(Event::Exit);
                    break;
                }
            }
        }

        drop(watch_handles);
        self.pipeline.registry.kill_all();
        self.state.running.store(false, Ordering::SeqCst);
        info!("daemon stopped");
        Ok(())
    }

    fn spawn_watch_handles(
        &self,
        change_tx: &mpsc::UnboundedSender<WatchEvent>,
    ) -> Result<Vec<WatcherHandle>> {
        let config = self.current_config();
        let debounce = Duration::from_millis(config.debounce_time);
        let mut handles = Vec::new();

        for (index, watcher) in config.watchers.iter().enumerate() {
            if !watcher.enabled {
                continue;
            }
            let ignore_patterns: Vec<String> = watcher
                .ignored
                .iter()
                .chain(config.default_ignored_files.iter())
                .cloned()
                .collect();
            let ignores = crate::resolver::IgnoreMatcher::new(&ignore_patterns)?;

            handles.push(spawn_watch(
                &self.root,
                index,
                &watcher.files,
                ignores,
                debounce,
                change_tx.clone(),
            )?);
        }

        Ok(handles)
    }

    /// One debounced filesystem event: record it when paused, otherwise
    /// kill superseded work and re-run the owning watcher's commands.
    async fn handle_change(&self, event: WatchEvent) {
        self.events.emit(Event::Changed {
            path: event.path.clone(),
            kind: event.kind,
        });

        if self.state.paused.load(Ordering::SeqCst) {
            info!(path = ?event.path, "paused; recording change for replay");
            self.pending_changes
                .lock()
                .expect("pending changes poisoned")
                .insert(event.path);
            return;
        }

        self.pipeline.registry.kill_all();

        let config = self.current_config();
        let Some(watcher) = config.watchers.get(event.watcher_index) else {
            return;
        };

        self.run_watcher_commands(&config, watcher, Some(event.path), None)
            .await;
    }

    /// Run every command of a watcher through the pipeline. Failures are
    /// surfaced via `error` events and logged; the daemon keeps running.
    async fn run_watcher_commands(
        &self,
        config: &Config,
        watcher: &WatcherConfig,
        changed_file: Option<PathBuf>,
        only_output: Option<&Path>,
    ) {
        debug!(
            watcher = watcher.display_label(),
            changed = ?changed_file,
            "running watcher commands"
        );
        let middlewares = CacheMiddleware::stack_from_config(&self.root, &config.plugins);

        let (files, ignore_patterns) = match watcher_file_set(&self.root, config, watcher) {
            Ok(resolved) => resolved,
            Err(err) => {
                warn!(error = %err, "failed to resolve watcher files");
                return;
            }
        };

        for command in &watcher.commands {
            let mut command = command.clone();
            if let Some(output) = only_output {
                if !command.artifacts.iter().any(|a| a.output == output) {
                    continue;
                }
                command.artifacts.retain(|a| a.output == output);
            }

            let task = CommandTask {
                command,
                files: files.clone(),
                environment: watcher.invalidators.environment.clone(),
                ignored: ignore_patterns.clone(),
            };

            // Errors already reached subscribers via the error event.
            let _ = self
                .pipeline
                .run_command_task(&task, &middlewares, changed_file.clone())
                .await;
        }
    }

    fn handle_pause(&self) {
        info!("daemon paused");
        self.state.paused.store(true, Ordering::SeqCst);
    }

    /// Replay recorded changes by bumping their modification times, so
    /// they re-enter the watch pipeline like any other change.
    fn handle_resume(&self) {
        info!("daemon resumed");
        self.state.paused.store(false, Ordering::SeqCst);

        let pending: Vec<PathBuf> = {
            let mut set = self
                .pending_changes
                .lock()
                .expect("pending changes poisoned");
            std::mem::take(&mut *set).into_iter().collect()
        };

        for path in pending {
            let abs = self.root.join(&path);
            match std::fs::OpenOptions::new().append(true).open(&abs) {
                Ok(file) => {
                    if let Err(err) = file.set_modified(SystemTime::now()) {
                        warn!(path = ?abs, error = %err, "failed to bump mtime for replay");
                    } else {
                        debug!(path = ?abs, "replayed pending change");
                    }
                }
                Err(err) => {
                    debug!(path = ?abs, error = %err, "pending change no longer on disk");
                }
            }
        }
    }

    async fn handle_compute_artifact(&self, output: &Path) {
        if self.state.paused.load(Ordering::SeqCst) {
            info!(output = ?output, "daemon paused; ignoring compute request");
            return;
        }

        let config = self.current_config();
        let owner = config.watchers.iter().find(|watcher| {
            watcher
                .commands
                .iter()
                .any(|c| c.artifacts.iter().any(|a| a.output == output))
        });

        let Some(watcher) = owner else {
            warn!(output = ?output, "compute request for unknown artifact");
            return;
        };

        info!(output = ?output, "computing single artifact");
        self.pipeline.registry.kill_all();
        self.run_watcher_commands(&config, watcher, None, Some(output))
            .await;
    }

    async fn handle_compute_all(&self) {
        if self.state.paused.load(Ordering::SeqCst) {
            info!("daemon paused; ignoring compute-all request");
            return;
        }

        info!("computing all artifacts");
        self.pipeline.registry.kill_all();

        let config = self.current_config();
        for watcher in config.enabled_watchers() {
            self.run_watcher_commands(&config, watcher, None, None).await;
        }
    }

    /// Reload the configuration file. On success the new config replaces
    /// the shared snapshot and `configLoaded` is emitted; on failure the
    /// previous configuration stays active.
    fn reload_config(&self) -> bool {
        match load_and_validate(&self.config_path) {
            Ok(new_config) => {
                let new_config = Arc::new(new_config);
                *self.config.write().expect("config lock poisoned") = Arc::clone(&new_config);
                info!(path = ?self.config_path, "configuration reloaded");
                self.events.emit(Event::ConfigLoaded { config: new_config });
                true
            }
            Err(err) => {
                warn!(
                    path = ?self.config_path,
                    error = %err,
                    "configuration reload failed; keeping previous configuration"
                );
                false
            }
        }
    }
}
