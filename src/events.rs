// src/events.rs

//! Typed in-process pub/sub.
//!
//! Lifecycle events are threaded through every component over a single
//! [`EventBus`]: the generator and daemon emit, the lock file writer and
//! socket notifier subscribe, and the RPC surface both emits (triggers) and
//! observes. Emission is synchronous: every subscriber runs on the emitting
//! call stack, in registration order. Subscribers must not panic across the
//! boundary; anything slow or fallible belongs behind a channel bridge (see
//! [`EventBus::forward`]).

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::config::Config;

/// What happened to a watched path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Add,
    Modify,
    Remove,
}

/// Lifecycle events, in the order components tend to see them.
#[derive(Debug, Clone)]
pub enum Event {
    /// Wiring is complete; emitted once at startup.
    Initialized,

    /// Shutdown is underway. Subscribers flush; the daemon kills children.
    Exit,

    /// A configuration was (re)loaded successfully.
    ConfigLoaded { config: Arc<Config> },

    /// A generation pass over the whole task tree is starting.
    GenerateStarted,

    /// A generation pass finished (successfully or not).
    AllTasksComplete,

    /// A command is about to run for these artifacts.
    Begin { artifacts: Vec<PathBuf> },

    /// A command finished successfully for these artifacts.
    End { artifacts: Vec<PathBuf> },

    /// A command failed for these artifacts.
    Error {
        artifacts: Vec<PathBuf>,
        message: String,
    },

    /// A watched file changed on disk.
    Changed { path: PathBuf, kind: ChangeKind },

    /// Record filesystem events instead of acting on them.
    Pause,

    /// Act again; recorded events are replayed.
    Resume,

    /// External request to rebuild one artifact.
    ComputeArtifact { output: PathBuf },

    /// External request to rebuild every artifact.
    ComputeAllArtifacts { artifacts: Vec<PathBuf> },
}

type Subscriber = Box<dyn Fn(&Event) + Send + Sync>;

/// Multi-subscriber synchronous event bus.
///
/// Cloneable via `Arc`; subscription order is dispatch order.
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Subscriber>>,
}

impl EventBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a subscriber invoked synchronously on every emission.
    pub fn subscribe(&self, subscriber: impl Fn(&Event) + Send + Sync + 'static) {
        self.subscribers
            .lock()
            .expect("event bus subscriber list poisoned")
            .push(Box::new(subscriber));
    }

    /// Dispatch an event to every subscriber, in registration order.
    pub fn emit(&self, event: Event) {
        let subscribers = self
            .subscribers
            .lock()
            .expect("event bus subscriber list poisoned");
        for subscriber in subscribers.iter() {
            subscriber(&event);
        }
    }

    /// Bridge events into the async world: every emitted event is cloned
    /// into `tx`. Send failures are ignored (the receiver is gone).
    pub fn forward(&self, tx: mpsc::UnboundedSender<Event>) {
        self.subscribe(move |event| {
            let _ = tx.send(event.clone());
        });
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.subscribers.lock().map(|s| s.len()).unwrap_or(0);
        f.debug_struct("EventBus").field("subscribers", &count).finish()
    }
}
