// src/lib.rs

pub mod cache;
pub mod cli;
pub mod config;
pub mod daemon;
pub mod errors;
pub mod events;
pub mod exec;
pub mod generate;
pub mod lockfile;
pub mod logging;
pub mod plugins;
pub mod resolver;
pub mod rpc;
pub mod socket;
pub mod task;

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use anyhow::Result;
use tracing::{info, warn};

use crate::cli::CliArgs;
use crate::config::{load_and_validate, Config};
use crate::daemon::{Daemon, DaemonState};
use crate::events::{Event, EventBus};
use crate::exec::ProcessRegistry;
use crate::generate::{GenerateOptions, Pipeline};
use crate::lockfile::LockFileWriter;
use crate::plugins::apply_tree_plugins;
use crate::socket::SocketNotifier;
use crate::task::Task;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - event bus + lock file writer + socket notifier
/// - the generator (initial or one-shot pass)
/// - (optional) the watch daemon and the RPC endpoint
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = PathBuf::from(&args.config);
    let root = project_root(&config_path);
    let config = Arc::new(load_and_validate(&config_path)?);

    let events = EventBus::new();
    let registry = ProcessRegistry::new();
    let pipeline = Pipeline::new(root.clone(), Arc::clone(&events), Arc::clone(&registry));
    let lock_writer = LockFileWriter::attach(root.clone(), &events);
    let _socket = SocketNotifier::attach(&events);

    events.emit(Event::Initialized);
    events.emit(Event::ConfigLoaded {
        config: Arc::clone(&config),
    });

    if args.dry_run {
        print_dry_run(&pipeline, &config)?;
        return Ok(());
    }

    // A watching invocation tolerates individual command failures during
    // the initial phase; a one-shot invocation fails fast.
    let options = GenerateOptions {
        continue_on_error: args.watch,
    };
    let generated = pipeline.generate(&config, options).await;

    if !args.watch {
        return generated;
    }
    // Structural errors (e.g. a dependency cycle) are fatal even in watch
    // mode; command failures were already surfaced via error events.
    generated?;

    lock_writer.enable_daemon_mode();

    let shared_config = Arc::new(RwLock::new(Arc::clone(&config)));
    let state = Arc::new(DaemonState::default());

    let rpc_state = rpc::RpcState {
        root: root.clone(),
        events: Arc::clone(&events),
        config: Arc::clone(&shared_config),
        daemon: Arc::clone(&state),
        lock_path: lock_writer.path().to_path_buf(),
    };
    tokio::spawn(async move {
        if let Err(err) = rpc::serve(rpc_state, rpc::DEFAULT_PORT).await {
            warn!(error = %err, "RPC endpoint stopped");
        }
    });

    let daemon = Daemon::new(root, config_path, shared_config, events, pipeline, state);
    daemon.run().await
}

/// Project root: the directory containing the config file, or the current
/// working directory for a bare filename.
fn project_root(config_path: &Path) -> PathBuf {
    let root = match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    };
    root.canonicalize().unwrap_or(root)
}

/// Print the post-plugin task tree and per-command cache keys without
/// executing anything.
fn print_dry_run(pipeline: &Pipeline, config: &Config) -> Result<()> {
    let tree = pipeline.build_task_tree(config)?;
    let tree = apply_tree_plugins(tree, &config.plugins)?;

    println!("shadowdog dry-run");
    println!(
        "  plugins: {}",
        config
            .plugins
            .iter()
            .map(|p| p.name())
            .collect::<Vec<_>>()
            .join(", ")
    );
    print_task(&pipeline.root, &tree, 1);

    info!("dry-run complete (no execution)");
    Ok(())
}

fn print_task(root: &Path, task: &Task, depth: usize) {
    let indent = "  ".repeat(depth);
    match task {
        Task::Empty => println!("{indent}(empty)"),
        Task::Parallel(children) => {
            println!("{indent}parallel:");
            for child in children {
                print_task(root, child, depth + 1);
            }
        }
        Task::Serial(children) => {
            println!("{indent}serial:");
            for child in children {
                print_task(root, child, depth + 1);
            }
        }
        Task::Command(command) => {
            let cache_key = crate::cache::compute_cache_key(
                root,
                &command.files,
                &command.environment,
                &command.command.command,
            )
            .unwrap_or_else(|_| "<unavailable>".to_string());

            println!("{indent}- {} [{cache_key}]", command.command.command);
            for artifact in &command.command.artifacts {
                println!("{indent}    -> {}", artifact.output.display());
            }
        }
    }
}
