// src/rpc/mod.rs

//! JSON request/response endpoint for external agents.
//!
//! A single POST route (`/mcp` on `localhost:8473`) dispatches tool calls
//! against a static table of `{name, schema, handler}` entries. Unknown
//! tool names and malformed arguments return typed JSON errors without
//! touching daemon state; triggers (`pause`, `resume`, `compute_*`) are
//! forwarded to the daemon over the event bus.

pub mod tools;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use anyhow::{Context, Result};
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::config::Config;
use crate::daemon::DaemonState;
use crate::events::EventBus;

pub use tools::dispatch;

/// Default RPC listener address.
pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 8473;

/// Shared state behind the RPC handlers.
#[derive(Clone)]
pub struct RpcState {
    pub root: PathBuf,
    pub events: Arc<EventBus>,
    pub config: Arc<RwLock<Arc<Config>>>,
    pub daemon: Arc<DaemonState>,
    pub lock_path: PathBuf,
}

impl RpcState {
    pub fn current_config(&self) -> Arc<Config> {
        Arc::clone(&self.config.read().expect("config lock poisoned"))
    }
}

/// Incoming tool call.
#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    pub tool: String,

    #[serde(default)]
    pub arguments: Value,
}

/// Typed tool-level error, returned as JSON rather than an HTTP failure.
#[derive(Debug)]
pub struct RpcError {
    pub code: &'static str,
    pub message: String,
}

impl RpcError {
    pub fn unknown_tool(name: &str) -> Self {
        Self {
            code: "unknown_tool",
            message: format!("unknown tool: {name}"),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            code: "bad_request",
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            code: "internal",
            message: message.into(),
        }
    }
}

/// Serve the RPC endpoint until the process exits.
pub async fn serve(state: RpcState, port: u16) -> Result<()> {
    let app = Router::new()
        .route("/mcp", post(handle))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind((DEFAULT_HOST, port))
        .await
        .with_context(|| format!("binding RPC listener on {DEFAULT_HOST}:{port}"))?;
    let addr: SocketAddr = listener.local_addr().context("reading RPC listener address")?;

    info!(addr = %addr, "RPC endpoint listening on /mcp");
    axum::serve(listener, app).await.context("serving RPC endpoint")
}

async fn handle(State(state): State<RpcState>, Json(request): Json<RpcRequest>) -> Json<Value> {
    match dispatch(&state, &request.tool, request.arguments).await {
        Ok(result) => Json(json!({ "ok": true, "result": result })),
        Err(err) => Json(json!({
            "ok": false,
            "error": { "code": err.code, "message": err.message },
        })),
    }
}
