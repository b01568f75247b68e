// src/generate.rs

//! Task tree construction and execution.
//!
//! The generator builds a top-level `Parallel` of every command across all
//! watchers, applies the configured tree plugins, and walks the result:
//! `Parallel` children progress concurrently, `Serial` children in order,
//! and each `Command` node runs through a task runner whose middlewares
//! are the configured cache backends and whose terminal is the process
//! supervisor. The daemon re-enters the same command path on every
//! debounced filesystem event and RPC trigger.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::cache::CacheMiddleware;
use crate::config::Config;
use crate::errors::TaskError;
use crate::events::{Event, EventBus};
use crate::exec::ProcessRegistry;
use crate::plugins::apply_tree_plugins;
use crate::resolver::{resolve, IgnoreMatcher};
use crate::task::{CommandTask, Middleware, MiddlewareFuture, RunContext, Task, TaskRunner};

/// Poll interval for the post-command artifact readiness check.
const ARTIFACT_WAIT_INTERVAL: Duration = Duration::from_millis(100);

/// Default number of readiness polls (~5 s at the default interval).
const ARTIFACT_WAIT_DEFAULT_RETRIES: u32 = 50;

#[derive(Debug, Clone, Copy, Default)]
pub struct GenerateOptions {
    /// When false the first command error aborts the whole walk; when true
    /// each failure is recorded via the `error` event and the walk
    /// continues.
    pub continue_on_error: bool,
}

/// Shared execution machinery: one value owns the project root, the event
/// bus, and the pending-process registry, and is re-entered by the
/// one-shot generator, the daemon's watch callbacks, and RPC triggers.
pub struct Pipeline {
    pub root: PathBuf,
    pub events: Arc<EventBus>,
    pub registry: Arc<ProcessRegistry>,
}

impl Pipeline {
    pub fn new(root: PathBuf, events: Arc<EventBus>, registry: Arc<ProcessRegistry>) -> Arc<Self> {
        Arc::new(Self {
            root,
            events,
            registry,
        })
    }

    /// Build the pre-plugin task tree from a configuration: a `Parallel`
    /// of every command, each carrying its watcher's resolved file set and
    /// invalidator environment names.
    pub fn build_task_tree(&self, config: &Config) -> Result<Task> {
        let mut commands = Vec::new();

        for watcher in config.enabled_watchers() {
            let (files, ignore_patterns) = watcher_file_set(&self.root, config, watcher)?;

            for command in &watcher.commands {
                commands.push(Task::Command(CommandTask {
                    command: command.clone(),
                    files: files.clone(),
                    environment: watcher.invalidators.environment.clone(),
                    ignored: ignore_patterns.clone(),
                }));
            }
        }

        Ok(Task::Parallel(commands))
    }

    /// Run one full generation pass: build the tree, apply plugins, walk.
    pub async fn generate(&self, config: &Config, options: GenerateOptions) -> Result<()> {
        self.events.emit(Event::GenerateStarted);

        let result = self.generate_inner(config, options).await;

        self.events.emit(Event::AllTasksComplete);
        result
    }

    async fn generate_inner(&self, config: &Config, options: GenerateOptions) -> Result<()> {
        let tree = self.build_task_tree(config)?;
        let tree = apply_tree_plugins(tree, &config.plugins)?;
        let middlewares = CacheMiddleware::stack_from_config(&self.root, &config.plugins);

        info!(commands = tree.commands().len(), "generating artifacts");
        self.drive(&tree, &middlewares, options).await
    }

    /// Walk a task tree. `Parallel` children are awaited concurrently,
    /// `Serial` children sequentially, `Empty` succeeds immediately.
    pub fn drive<'a>(
        &'a self,
        task: &'a Task,
        middlewares: &'a [Arc<dyn Middleware>],
        options: GenerateOptions,
    ) -> MiddlewareFuture<'a> {
        Box::pin(async move {
            match task {
                Task::Empty => Ok(()),
                Task::Command(command) => {
                    let result = self.run_command_task(command, middlewares, None).await;
                    match result {
                        Ok(()) => Ok(()),
                        Err(_) if options.continue_on_error => Ok(()),
                        Err(err) => Err(err),
                    }
                }
                Task::Serial(children) => {
                    for child in children {
                        self.drive(child, middlewares, options).await?;
                    }
                    Ok(())
                }
                Task::Parallel(children) => {
                    let walks = children
                        .iter()
                        .map(|child| self.drive(child, middlewares, options));
                    futures::future::try_join_all(walks).await?;
                    Ok(())
                }
            }
        })
    }

    /// Run one command through the full middleware + supervisor pipeline,
    /// emitting `begin` and `end`/`error` around it.
    pub async fn run_command_task(
        &self,
        command: &CommandTask,
        middlewares: &[Arc<dyn Middleware>],
        changed_file: Option<PathBuf>,
    ) -> Result<()> {
        let artifacts: Vec<PathBuf> = command.outputs().cloned().collect();
        self.events.emit(Event::Begin {
            artifacts: artifacts.clone(),
        });

        let ctx = RunContext::new(
            self.root.clone(),
            command.files.clone(),
            command.environment.clone(),
            command.command.clone(),
            command.ignored.clone(),
            changed_file,
            Arc::clone(&self.events),
        );

        let mut runner = TaskRunner::new();
        for middleware in middlewares {
            runner.push(Arc::clone(middleware));
        }

        let registry = Arc::clone(&self.registry);
        let terminal = terminal_fn(move |ctx: &RunContext| {
            let registry = Arc::clone(&registry);
            Box::pin(async move {
                // Force a fresh build so SHA verification can never match
                // stale identical content left from a previous run.
                delete_existing_artifacts(ctx)?;
                crate::exec::run_command(ctx, &registry).await
            })
        });

        let result = async {
            runner.run(&ctx, &terminal).await?;
            if !ctx.aborted() {
                self.verify_artifacts_ready(&ctx).await?;
            }
            Ok::<(), anyhow::Error>(())
        }
        .await;

        match result {
            Ok(()) => {
                self.events.emit(Event::End { artifacts });
                Ok(())
            }
            Err(err) => {
                warn!(
                    command = %command.command.command,
                    error = %err,
                    "[shadowdog] command pipeline failed"
                );
                self.events.emit(Event::Error {
                    artifacts,
                    message: format!("{err:#}"),
                });
                Err(err)
            }
        }
    }

    /// Wait for every declared artifact to exist, be readable, and be
    /// non-empty if it is a file. The retry budget is bounded; a missing
    /// artifact after the window is a structured error.
    async fn verify_artifacts_ready(&self, ctx: &RunContext) -> Result<()> {
        let retries = artifact_wait_max_retries();

        'artifact: for artifact in &ctx.command.artifacts {
            let path = ctx.root.join(&artifact.output);
            for attempt in 0..retries {
                if artifact_ready(&path) {
                    continue 'artifact;
                }
                debug!(
                    output = ?artifact.output,
                    attempt,
                    "artifact not ready yet; waiting"
                );
                tokio::time::sleep(ARTIFACT_WAIT_INTERVAL).await;
            }
            return Err(TaskError::ArtifactUnavailable {
                output: artifact.output.clone(),
            }
            .into());
        }

        Ok(())
    }
}

/// Resolve a watcher's effective file set: watched globs plus invalidator
/// files, through the watcher's ignores combined with the config-wide
/// defaults, sorted and deduplicated. Non-existent literal paths are
/// preserved so the dependency-layering plugin can see edges to artifacts
/// that have not been built yet; the lock file writer uses the same
/// resolution, keeping cache keys and manifests in agreement.
pub fn watcher_file_set(
    root: &std::path::Path,
    config: &Config,
    watcher: &crate::config::WatcherConfig,
) -> Result<(Vec<PathBuf>, Vec<String>)> {
    let ignore_patterns: Vec<String> = watcher
        .ignored
        .iter()
        .chain(config.default_ignored_files.iter())
        .cloned()
        .collect();
    let ignores = IgnoreMatcher::new(&ignore_patterns)?;

    let mut files = resolve(root, &watcher.files, &ignores, true)?;
    let invalidators = resolve(root, &watcher.invalidators.files, &ignores, true)?;
    for path in invalidators {
        if !files.contains(&path) {
            files.push(path);
        }
    }
    files.sort();

    Ok((files, ignore_patterns))
}

/// Shapes a closure into the higher-ranked terminal signature.
fn terminal_fn<F>(f: F) -> F
where
    F: for<'a> Fn(&'a RunContext) -> MiddlewareFuture<'a> + Send + Sync,
{
    f
}

fn artifact_wait_max_retries() -> u32 {
    std::env::var("SHADOWDOG_ARTIFACT_WAIT_MAX_RETRIES")
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(ARTIFACT_WAIT_DEFAULT_RETRIES)
}

/// A zero-byte file counts as not ready: producers that create the file
/// before writing it are still in flight.
fn artifact_ready(path: &std::path::Path) -> bool {
    match std::fs::metadata(path) {
        Ok(metadata) if metadata.is_dir() => true,
        Ok(metadata) if metadata.is_file() => {
            metadata.len() > 0 && std::fs::File::open(path).is_ok()
        }
        _ => false,
    }
}

fn delete_existing_artifacts(ctx: &RunContext) -> Result<()> {
    for artifact in &ctx.command.artifacts {
        let path = ctx.root.join(&artifact.output);
        match std::fs::symlink_metadata(&path) {
            Ok(metadata) => {
                debug!(output = ?artifact.output, "removing stale artifact before build");
                if metadata.is_dir() {
                    std::fs::remove_dir_all(&path)
                        .with_context(|| format!("removing stale artifact {path:?}"))?;
                } else {
                    std::fs::remove_file(&path)
                        .with_context(|| format!("removing stale artifact {path:?}"))?;
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(err).with_context(|| format!("stat stale artifact {path:?}"));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_ready_rules() {
        let tmp = tempfile::tempdir().unwrap();

        let missing = tmp.path().join("missing");
        assert!(!artifact_ready(&missing));

        let empty = tmp.path().join("empty");
        std::fs::write(&empty, b"").unwrap();
        assert!(!artifact_ready(&empty));

        let full = tmp.path().join("full");
        std::fs::write(&full, b"data").unwrap();
        assert!(artifact_ready(&full));

        let dir = tmp.path().join("dir");
        std::fs::create_dir(&dir).unwrap();
        assert!(artifact_ready(&dir));
    }

    #[test]
    fn retries_default_and_override() {
        std::env::remove_var("SHADOWDOG_ARTIFACT_WAIT_MAX_RETRIES");
        assert_eq!(artifact_wait_max_retries(), ARTIFACT_WAIT_DEFAULT_RETRIES);

        std::env::set_var("SHADOWDOG_ARTIFACT_WAIT_MAX_RETRIES", "3");
        assert_eq!(artifact_wait_max_retries(), 3);
        std::env::remove_var("SHADOWDOG_ARTIFACT_WAIT_MAX_RETRIES");
    }
}
