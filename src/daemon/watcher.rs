// src/daemon/watcher.rs

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use notify::{Config as NotifyConfig, Event as NotifyEvent, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::events::ChangeKind;
use crate::resolver::IgnoreMatcher;

/// Debounce interval for config file reloads.
const CONFIG_RELOAD_DEBOUNCE: Duration = Duration::from_millis(250);

/// A debounced change observed by one watcher.
#[derive(Debug, Clone)]
pub struct WatchEvent {
    /// Index into the configuration's watcher list.
    pub watcher_index: usize,
    /// Changed path, relative to the project root.
    pub path: PathBuf,
    pub kind: ChangeKind,
}

/// Keeps the underlying notify watcher and its bridge task alive.
/// Dropping the handle stops file watching.
pub struct WatcherHandle {
    _inner: RecommendedWatcher,
    bridge: tokio::task::JoinHandle<()>,
}

impl Drop for WatcherHandle {
    fn drop(&mut self) {
        self.bridge.abort();
    }
}

impl std::fmt::Debug for WatcherHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatcherHandle").finish()
    }
}

/// Spawn one recursive filesystem watch for a configured watcher.
///
/// Raw notify callbacks are bridged into the async world over an
/// unbounded channel; a background task filters events through the
/// watcher's globs and ignores, debounces them by `debounce`, and sends
/// the surviving latest event into `tx`.
pub fn spawn_watch(
    root: &Path,
    watcher_index: usize,
    files: &[String],
    ignores: IgnoreMatcher,
    debounce: Duration,
    tx: mpsc::UnboundedSender<WatchEvent>,
) -> Result<WatcherHandle> {
    let glob_set = build_globset(files)?;
    let root = root.to_path_buf();
    let root = root.canonicalize().unwrap_or(root);

    let (raw_tx, mut raw_rx) = mpsc::unbounded_channel::<NotifyEvent>();

    let mut watcher = RecommendedWatcher::new(
        move |result: notify::Result<NotifyEvent>| match result {
            Ok(event) => {
                if raw_tx.send(event).is_err() {
                    // Bridge task is gone; nothing left to notify.
                }
            }
            Err(err) => {
                eprintln!("shadowdog: file watch error: {err}");
            }
        },
        NotifyConfig::default(),
    )?;
    watcher.watch(&root, RecursiveMode::Recursive)?;

    info!(watcher = watcher_index, root = ?root, "file watcher started");

    let bridge = tokio::spawn(async move {
        loop {
            let Some(event) = raw_rx.recv().await else { break };
            let Some(mut latest) = filter_event(&root, &event, &glob_set, &ignores, watcher_index)
            else {
                continue;
            };

            // Debounce: keep replacing with the newest matching event
            // until the stream goes quiet for the configured interval.
            loop {
                match tokio::time::timeout(debounce, raw_rx.recv()).await {
                    Ok(Some(event)) => {
                        if let Some(next) =
                            filter_event(&root, &event, &glob_set, &ignores, watcher_index)
                        {
                            latest = next;
                        }
                    }
                    Ok(None) => {
                        let _ = tx.send(latest);
                        return;
                    }
                    Err(_) => break,
                }
            }

            debug!(
                watcher = watcher_index,
                path = ?latest.path,
                kind = ?latest.kind,
                "debounced change"
            );
            if tx.send(latest).is_err() {
                return;
            }
        }
        debug!(watcher = watcher_index, "watch bridge ended");
    });

    Ok(WatcherHandle {
        _inner: watcher,
        bridge,
    })
}

/// Watch the configuration file itself; each (debounced) change sends a
/// unit tick so the daemon can attempt a reload.
pub fn spawn_config_watch(
    config_path: &Path,
    tx: mpsc::UnboundedSender<()>,
) -> Result<WatcherHandle> {
    let config_path = config_path
        .canonicalize()
        .unwrap_or_else(|_| config_path.to_path_buf());
    let watch_dir = config_path
        .parent()
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."));

    let (raw_tx, mut raw_rx) = mpsc::unbounded_channel::<NotifyEvent>();

    let mut watcher = RecommendedWatcher::new(
        move |result: notify::Result<NotifyEvent>| {
            if let Ok(event) = result {
                let _ = raw_tx.send(event);
            }
        },
        NotifyConfig::default(),
    )?;
    watcher
        .watch(&watch_dir, RecursiveMode::NonRecursive)
        .with_context(|| format!("watching config directory {watch_dir:?}"))?;

    let bridge = tokio::spawn(async move {
        loop {
            let Some(event) = raw_rx.recv().await else { break };
            if !event.paths.iter().any(|p| p == &config_path) {
                continue;
            }

            // Editors often emit several events per save; coalesce them.
            loop {
                match tokio::time::timeout(CONFIG_RELOAD_DEBOUNCE, raw_rx.recv()).await {
                    Ok(Some(_)) => {}
                    Ok(None) => return,
                    Err(_) => break,
                }
            }

            if tx.send(()).is_err() {
                return;
            }
        }
    });

    Ok(WatcherHandle {
        _inner: watcher,
        bridge,
    })
}

fn filter_event(
    root: &Path,
    event: &NotifyEvent,
    glob_set: &GlobSet,
    ignores: &IgnoreMatcher,
    watcher_index: usize,
) -> Option<WatchEvent> {
    let kind = match event.kind {
        EventKind::Create(_) => ChangeKind::Add,
        EventKind::Modify(_) => ChangeKind::Modify,
        EventKind::Remove(_) => ChangeKind::Remove,
        _ => return None,
    };

    for path in &event.paths {
        let rel = match path.strip_prefix(root) {
            Ok(rel) => rel.to_path_buf(),
            Err(_) => {
                warn!(path = ?path, root = ?root, "could not relativize watched path");
                continue;
            }
        };
        let rel_str = crate::resolver::path_to_slash(&rel);

        if ignores.matches(&rel_str) {
            continue;
        }
        if glob_set.is_match(&rel_str) {
            return Some(WatchEvent {
                watcher_index,
                path: rel,
                kind,
            });
        }
    }

    None
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob =
            Glob::new(pattern).with_context(|| format!("invalid watch pattern: {pattern}"))?;
        builder.add(glob);
    }
    Ok(builder.build()?)
}
