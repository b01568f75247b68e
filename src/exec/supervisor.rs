// src/exec/supervisor.rs

use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::errors::TaskError;
use crate::task::RunContext;

/// Literal token substituted with the changed file's path.
const FILE_TOKEN: &str = "$FILE";

/// Handle to a spawned child, as seen by the daemon's pending list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildHandle {
    /// Process id; also the process-group id, since the child is spawned
    /// as a group leader.
    pub pid: i32,
}

/// Send SIGKILL to the whole process group so descendants die too.
pub fn kill_process_group(handle: ChildHandle) {
    debug!(pid = handle.pid, "killing process group");
    // Negated pid addresses the group.
    unsafe {
        libc::kill(-handle.pid, libc::SIGKILL);
    }
}

/// The daemon's pending-process list: every live child registers here on
/// spawn and deregisters on exit, so superseded runs can be killed as a
/// batch.
#[derive(Debug, Default)]
pub struct ProcessRegistry {
    pending: Mutex<Vec<ChildHandle>>,
}

impl ProcessRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(&self, handle: ChildHandle) {
        self.pending.lock().expect("process registry poisoned").push(handle);
    }

    pub fn deregister(&self, handle: ChildHandle) {
        self.pending
            .lock()
            .expect("process registry poisoned")
            .retain(|h| *h != handle);
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().expect("process registry poisoned").len()
    }

    /// SIGKILL every pending process group and clear the list.
    pub fn kill_all(&self) {
        let drained: Vec<ChildHandle> = {
            let mut pending = self.pending.lock().expect("process registry poisoned");
            std::mem::take(&mut *pending)
        };
        if !drained.is_empty() {
            info!(count = drained.len(), "killing superseded process groups");
        }
        for handle in drained {
            kill_process_group(handle);
        }
    }
}

/// Run the context's command to completion.
///
/// - `$FILE` in the command string is replaced with the changed file's
///   path when the run was triggered by a filesystem event.
/// - The child runs under `sh -c` in its own process group, with stdout
///   inherited and stderr buffered.
/// - Exit status 0 resolves `Ok`; anything else fails with
///   [`TaskError::CommandFailed`] carrying the accumulated stderr.
pub async fn run_command(ctx: &RunContext, registry: &ProcessRegistry) -> Result<()> {
    let command_line = substitute_changed_file(&ctx.command.command, ctx);
    let cwd = ctx.root.join(&ctx.command.working_directory);

    info!(command = %command_line, cwd = ?cwd, "spawning command");
    let started = Instant::now();

    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(&command_line)
        .current_dir(&cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    // Fresh process group so a kill reaches the whole descendant tree.
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning process for command `{command_line}`"))?;

    let handle = child.id().map(|pid| ChildHandle { pid: pid as i32 });
    if let Some(handle) = handle {
        registry.register(handle);
    }

    let mut stderr_pipe = child.stderr.take();
    let stderr_task = async {
        let mut buf = Vec::new();
        if let Some(pipe) = stderr_pipe.as_mut() {
            let _ = pipe.read_to_end(&mut buf).await;
        }
        buf
    };

    let (status, stderr_buf) = tokio::join!(child.wait(), stderr_task);

    if let Some(handle) = handle {
        registry.deregister(handle);
    }

    let status = status.with_context(|| format!("waiting for command `{command_line}`"))?;
    let elapsed = started.elapsed();

    if status.success() {
        debug!(
            command = %command_line,
            elapsed_ms = elapsed.as_millis() as u64,
            "command exited successfully"
        );
        return Ok(());
    }

    let exit_code = status.code().unwrap_or(-1);
    let stderr = String::from_utf8_lossy(&stderr_buf).into_owned();
    warn!(
        command = %command_line,
        exit_code,
        "command failed"
    );

    Err(TaskError::CommandFailed {
        command: command_line,
        exit_code,
        stderr,
    }
    .into())
}

fn substitute_changed_file(command: &str, ctx: &RunContext) -> String {
    match &ctx.changed_file {
        Some(path) => command.replace(FILE_TOKEN, &crate::resolver::path_to_slash(path)),
        None => command.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CommandConfig;
    use crate::events::EventBus;
    use std::path::PathBuf;

    fn ctx_for(command: &str, changed: Option<&str>) -> RunContext {
        let command: CommandConfig =
            serde_json::from_str(&format!(r#"{{ "command": {} }}"#, serde_json::json!(command)))
                .unwrap();
        RunContext::new(
            std::env::temp_dir(),
            Vec::new(),
            Vec::new(),
            command,
            Vec::new(),
            changed.map(PathBuf::from),
            EventBus::new(),
        )
    }

    #[test]
    fn file_token_is_substituted() {
        let ctx = ctx_for("echo $FILE", Some("src/app.txt"));
        assert_eq!(
            substitute_changed_file(&ctx.command.command, &ctx),
            "echo src/app.txt"
        );

        let ctx = ctx_for("echo $FILE", None);
        assert_eq!(substitute_changed_file(&ctx.command.command, &ctx), "echo $FILE");
    }

    #[tokio::test]
    async fn successful_command_resolves() {
        let registry = ProcessRegistry::new();
        let ctx = ctx_for("true", None);
        run_command(&ctx, &registry).await.unwrap();
        assert_eq!(registry.pending_count(), 0);
    }

    #[tokio::test]
    async fn failing_command_carries_exit_code_and_stderr() {
        let registry = ProcessRegistry::new();
        let ctx = ctx_for("echo broken >&2; exit 3", None);
        let err = run_command(&ctx, &registry).await.unwrap_err();

        match err.downcast_ref::<TaskError>() {
            Some(TaskError::CommandFailed {
                exit_code, stderr, ..
            }) => {
                assert_eq!(*exit_code, 3);
                assert!(stderr.contains("broken"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(registry.pending_count(), 0);
    }
}
