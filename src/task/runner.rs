// src/task/runner.rs

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;

use crate::config::CommandConfig;
use crate::events::EventBus;

/// Boxed future returned by middlewares and terminals.
pub type MiddlewareFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// The innermost frame of the chain, usually the process supervisor.
pub type Terminal = dyn for<'a> Fn(&'a RunContext) -> MiddlewareFuture<'a> + Send + Sync;

/// Everything a middleware can see about the run it wraps.
///
/// All fields other than the abort flag are read-only to middlewares;
/// per-middleware options live on the middleware value itself.
pub struct RunContext {
    /// Project root all relative paths resolve against.
    pub root: PathBuf,

    /// Resolved input files, relative to the root, sorted.
    pub files: Vec<PathBuf>,

    /// Invalidator environment variable names.
    pub environment: Vec<String>,

    /// The command being run, with its declared artifacts.
    pub command: CommandConfig,

    /// Ignore patterns of the owning watcher (with config defaults).
    pub ignored: Vec<String>,

    /// The path whose change triggered this run, when driven by the
    /// watcher. Substituted for `$FILE` by the supervisor.
    pub changed_file: Option<PathBuf>,

    pub events: Arc<EventBus>,

    aborted: AtomicBool,
}

impl RunContext {
    pub fn new(
        root: PathBuf,
        files: Vec<PathBuf>,
        environment: Vec<String>,
        command: CommandConfig,
        ignored: Vec<String>,
        changed_file: Option<PathBuf>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            root,
            files,
            environment,
            command,
            ignored,
            changed_file,
            events,
            aborted: AtomicBool::new(false),
        }
    }

    /// Skip the remainder of the chain and the terminal executor. Sticky:
    /// once set, no further frame is entered.
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    pub fn aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }
}

/// A composable wrapper around the terminal executor.
///
/// Implementations either call `next.run(ctx)` (optionally doing work
/// before and after), call `ctx.abort()` and return, or return an error.
/// Errors propagate and fail the task.
pub trait Middleware: Send + Sync {
    fn handle<'a>(&'a self, ctx: &'a RunContext, next: Next<'a>) -> MiddlewareFuture<'a>;
}

/// The remainder of the middleware chain, ending at the terminal.
pub struct Next<'a> {
    chain: &'a [Arc<dyn Middleware>],
    terminal: &'a Terminal,
}

impl<'a> Next<'a> {
    /// Enter the next frame, or the terminal if the chain is exhausted.
    /// A sticky abort short-circuits both.
    pub async fn run(self, ctx: &'a RunContext) -> Result<()> {
        if ctx.aborted() {
            return Ok(());
        }
        match self.chain.split_first() {
            Some((middleware, rest)) => {
                middleware
                    .handle(
                        ctx,
                        Next {
                            chain: rest,
                            terminal: self.terminal,
                        },
                    )
                    .await
            }
            None => (self.terminal)(ctx).await,
        }
    }
}

/// Ordered middleware chain around a terminal executor.
#[derive(Default)]
pub struct TaskRunner {
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl TaskRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a middleware. Registration order is execution order.
    pub fn push(&mut self, middleware: Arc<dyn Middleware>) {
        self.middlewares.push(middleware);
    }

    /// Drive the chain. The terminal executor is the innermost frame; it
    /// does not run if any middleware aborted.
    pub async fn run(&self, ctx: &RunContext, terminal: &Terminal) -> Result<()> {
        Next {
            chain: &self.middlewares,
            terminal,
        }
        .run(ctx)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::Mutex;

    fn test_ctx() -> RunContext {
        let command: CommandConfig = serde_json::from_str(r#"{ "command": "true" }"#).unwrap();
        RunContext::new(
            PathBuf::from("."),
            Vec::new(),
            Vec::new(),
            command,
            Vec::new(),
            None,
            EventBus::new(),
        )
    }

    struct Recorder {
        label: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        abort: bool,
        fail: bool,
    }

    impl Middleware for Recorder {
        fn handle<'a>(&'a self, ctx: &'a RunContext, next: Next<'a>) -> MiddlewareFuture<'a> {
            Box::pin(async move {
                self.log.lock().unwrap().push(format!("{}:enter", self.label));
                if self.fail {
                    return Err(anyhow!("middleware {} failed", self.label));
                }
                if self.abort {
                    ctx.abort();
                    return Ok(());
                }
                next.run(ctx).await?;
                self.log.lock().unwrap().push(format!("{}:exit", self.label));
                Ok(())
            })
        }
    }

    fn terminal_fn<F>(f: F) -> F
    where
        F: for<'a> Fn(&'a RunContext) -> MiddlewareFuture<'a> + Send + Sync,
    {
        f
    }

    fn terminal_into(
        log: Arc<Mutex<Vec<String>>>,
    ) -> impl for<'a> Fn(&'a RunContext) -> MiddlewareFuture<'a> + Send + Sync {
        terminal_fn(move |_ctx| {
            let log = Arc::clone(&log);
            Box::pin(async move {
                log.lock().unwrap().push("terminal".to_string());
                Ok(())
            })
        })
    }

    #[tokio::test]
    async fn middlewares_run_in_registration_order_around_terminal() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut runner = TaskRunner::new();
        for label in ["outer", "inner"] {
            runner.push(Arc::new(Recorder {
                label,
                log: Arc::clone(&log),
                abort: false,
                fail: false,
            }));
        }

        let terminal = terminal_into(Arc::clone(&log));
        runner.run(&test_ctx(), &terminal).await.unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["outer:enter", "inner:enter", "terminal", "inner:exit", "outer:exit"]
        );
    }

    #[tokio::test]
    async fn abort_skips_rest_of_chain_and_terminal() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut runner = TaskRunner::new();
        runner.push(Arc::new(Recorder {
            label: "aborter",
            log: Arc::clone(&log),
            abort: true,
            fail: false,
        }));
        runner.push(Arc::new(Recorder {
            label: "never",
            log: Arc::clone(&log),
            abort: false,
            fail: false,
        }));

        let ctx = test_ctx();
        let terminal = terminal_into(Arc::clone(&log));
        runner.run(&ctx, &terminal).await.unwrap();

        assert!(ctx.aborted());
        assert_eq!(*log.lock().unwrap(), vec!["aborter:enter"]);
    }

    #[tokio::test]
    async fn middleware_error_propagates() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut runner = TaskRunner::new();
        runner.push(Arc::new(Recorder {
            label: "boom",
            log: Arc::clone(&log),
            abort: false,
            fail: true,
        }));

        let terminal = terminal_into(Arc::clone(&log));
        let err = runner.run(&test_ctx(), &terminal).await.unwrap_err();
        assert!(err.to_string().contains("boom"));
        assert!(!log.lock().unwrap().contains(&"terminal".to_string()));
    }
}
