// src/socket.rs

//! Optional notification side channel.
//!
//! When `SHADOWDOG_SOCKET` names a UNIX-domain socket path, lifecycle
//! events are mirrored to it as length-delimited JSON frames
//! (`<decimal length>\n<payload>`). Delivery is connect-and-write,
//! best-effort: a broken socket logs one warning and then silently
//! no-ops.

use std::io::Write;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::json;
use tracing::{debug, warn};

use crate::events::{Event, EventBus};

/// Environment variable naming the socket path.
pub const SOCKET_PATH_VAR: &str = "SHADOWDOG_SOCKET";

pub struct SocketNotifier {
    path: PathBuf,
    warned: AtomicBool,
}

impl SocketNotifier {
    /// Subscribe a notifier to the bus when a socket path is configured.
    pub fn attach(bus: &EventBus) -> Option<Arc<Self>> {
        let path = std::env::var(SOCKET_PATH_VAR).ok()?;
        let notifier = Arc::new(Self {
            path: PathBuf::from(path),
            warned: AtomicBool::new(false),
        });

        let subscriber = Arc::clone(&notifier);
        bus.subscribe(move |event| subscriber.on_event(event));

        Some(notifier)
    }

    fn on_event(&self, event: &Event) {
        match event {
            Event::Initialized => {
                self.send(json!({ "type": "INITIALIZED" }));
            }
            Event::ConfigLoaded { .. } => {
                self.send(json!({ "type": "CLEAR" }));
            }
            Event::Begin { artifacts } => {
                for artifact in artifacts {
                    self.send(json!({
                        "type": "CHANGED_FILE",
                        "file": crate::resolver::path_to_slash(artifact),
                        "ready": false,
                    }));
                }
            }
            Event::End { artifacts } => {
                for artifact in artifacts {
                    self.send(json!({
                        "type": "CHANGED_FILE",
                        "file": crate::resolver::path_to_slash(artifact),
                        "ready": true,
                    }));
                }
            }
            Event::Error { artifacts, message } => {
                for artifact in artifacts {
                    self.send(json!({
                        "type": "ERROR",
                        "file": crate::resolver::path_to_slash(artifact),
                        "message": message,
                    }));
                }
            }
            _ => {}
        }
    }

    fn send(&self, payload: serde_json::Value) {
        let body = payload.to_string();
        let frame = format!("{}\n{}", body.len(), body);

        let result = UnixStream::connect(&self.path)
            .and_then(|mut stream| stream.write_all(frame.as_bytes()));

        match result {
            Ok(()) => {
                debug!(path = ?self.path, "notification frame sent");
            }
            Err(err) => {
                if !self.warned.swap(true, Ordering::SeqCst) {
                    warn!(
                        path = ?self.path,
                        error = %err,
                        "notification socket unavailable; further sends will be silent"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::os::unix::net::UnixListener;

    #[test]
    fn frames_are_length_delimited() {
        let tmp = tempfile::tempdir().unwrap();
        let socket_path = tmp.path().join("notify.sock");
        let listener = UnixListener::bind(&socket_path).unwrap();

        let notifier = SocketNotifier {
            path: socket_path.clone(),
            warned: AtomicBool::new(false),
        };
        notifier.send(json!({ "type": "INITIALIZED" }));

        let (mut stream, _) = listener.accept().unwrap();
        let mut frame = String::new();
        stream.read_to_string(&mut frame).unwrap();

        let (length, body) = frame.split_once('\n').unwrap();
        assert_eq!(length.parse::<usize>().unwrap(), body.len());
        let payload: serde_json::Value = serde_json::from_str(body).unwrap();
        assert_eq!(payload["type"], "INITIALIZED");
    }

    #[test]
    fn broken_socket_warns_once_then_no_ops() {
        let tmp = tempfile::tempdir().unwrap();
        let notifier = SocketNotifier {
            path: tmp.path().join("missing.sock"),
            warned: AtomicBool::new(false),
        };

        notifier.send(json!({ "type": "CLEAR" }));
        assert!(notifier.warned.load(Ordering::SeqCst));

        // Second send must not panic or reset the warning.
        notifier.send(json!({ "type": "CLEAR" }));
    }
}
