// src/rpc/tools.rs

use std::path::PathBuf;

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::events::Event;
use crate::lockfile::read_lock_records;
use crate::rpc::{RpcError, RpcState};

/// Static description of one tool, as advertised by `list_tools`.
pub struct ToolDef {
    pub name: &'static str,
    pub description: &'static str,
    pub schema: fn() -> Value,
}

/// The tool table. Dispatch and `list_tools` both derive from it.
pub fn tool_defs() -> &'static [ToolDef] {
    &[
        ToolDef {
            name: "list_tools",
            description: "List available tools and their argument schemas.",
            schema: empty_schema,
        },
        ToolDef {
            name: "pause",
            description: "Record filesystem events instead of acting on them.",
            schema: empty_schema,
        },
        ToolDef {
            name: "resume",
            description: "Act on filesystem events again, replaying changes recorded while paused.",
            schema: empty_schema,
        },
        ToolDef {
            name: "get_artifacts",
            description: "List declared artifacts joined with on-disk presence and lock file metadata.",
            schema: || {
                json!({
                    "type": "object",
                    "properties": {
                        "filter": { "type": "string" }
                    },
                    "additionalProperties": false
                })
            },
        },
        ToolDef {
            name: "compute_artifact",
            description: "Rebuild a single artifact by output path.",
            schema: || {
                json!({
                    "type": "object",
                    "properties": {
                        "output": { "type": "string" }
                    },
                    "required": ["output"],
                    "additionalProperties": false
                })
            },
        },
        ToolDef {
            name: "compute_all_artifacts",
            description: "Rebuild every configured artifact.",
            schema: empty_schema,
        },
        ToolDef {
            name: "get_status",
            description: "Daemon availability, configuration counts, and the lock file path.",
            schema: empty_schema,
        },
        ToolDef {
            name: "clear_cache",
            description: "Remove the local cache tree and the lock file.",
            schema: empty_schema,
        },
    ]
}

fn empty_schema() -> Value {
    json!({ "type": "object", "properties": {}, "additionalProperties": false })
}

/// Dispatch one tool call by name. Unknown names and malformed arguments
/// return typed errors; daemon state is untouched in both cases.
pub async fn dispatch(state: &RpcState, tool: &str, arguments: Value) -> Result<Value, RpcError> {
    if !tool_defs().iter().any(|def| def.name == tool) {
        return Err(RpcError::unknown_tool(tool));
    }

    match tool {
        "list_tools" => {
            let _: NoArgs = parse_args(arguments)?;
            Ok(list_tools())
        }
        "pause" => {
            let _: NoArgs = parse_args(arguments)?;
            state.events.emit(Event::Pause);
            Ok(json!({ "paused": true }))
        }
        "resume" => {
            let _: NoArgs = parse_args(arguments)?;
            state.events.emit(Event::Resume);
            Ok(json!({ "paused": false }))
        }
        "get_artifacts" => {
            let args: GetArtifactsArgs = parse_args(arguments)?;
            Ok(get_artifacts(state, args))
        }
        "compute_artifact" => {
            let args: ComputeArtifactArgs = parse_args(arguments)?;
            compute_artifact(state, args)
        }
        "compute_all_artifacts" => {
            let _: NoArgs = parse_args(arguments)?;
            let artifacts = state.current_config().artifact_outputs();
            state.events.emit(Event::ComputeAllArtifacts { artifacts });
            Ok(json!({ "requested": true }))
        }
        "get_status" => {
            let _: NoArgs = parse_args(arguments)?;
            Ok(get_status(state))
        }
        "clear_cache" => {
            let _: NoArgs = parse_args(arguments)?;
            clear_cache(state)
        }
        _ => Err(RpcError::unknown_tool(tool)),
    }
}

/// Deserialize arguments against the tool's typed shape; unknown keys and
/// type mismatches surface as `bad_request`.
fn parse_args<T: serde::de::DeserializeOwned>(arguments: Value) -> Result<T, RpcError> {
    let arguments = if arguments.is_null() {
        json!({})
    } else {
        arguments
    };
    serde_json::from_value(arguments)
        .map_err(|err| RpcError::bad_request(format!("invalid arguments: {err}")))
}

/// Argument shape for tools that take none; extra keys still reject.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct NoArgs {}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct GetArtifactsArgs {
    #[serde(default)]
    filter: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ComputeArtifactArgs {
    output: String,
}

fn list_tools() -> Value {
    let tools: Vec<Value> = tool_defs()
        .iter()
        .map(|def| {
            json!({
                "name": def.name,
                "description": def.description,
                "inputSchema": (def.schema)(),
            })
        })
        .collect();
    json!({ "tools": tools })
}

fn get_artifacts(state: &RpcState, args: GetArtifactsArgs) -> Value {
    let config = state.current_config();
    let records = read_lock_records(&state.lock_path);

    let mut artifacts = Vec::new();
    for watcher in config.watchers.iter() {
        for command in watcher.commands.iter() {
            for artifact in command.artifacts.iter() {
                let output = crate::resolver::path_to_slash(&artifact.output);
                if let Some(filter) = &args.filter {
                    if !output.contains(filter.as_str()) {
                        continue;
                    }
                }

                let record = records.iter().find(|r| r.output == output);
                artifacts.push(json!({
                    "output": output,
                    "description": artifact.description,
                    "command": command.command,
                    "exists": state.root.join(&artifact.output).exists(),
                    "sha": record.map(|r| r.sha.clone()),
                    "cacheKey": record.map(|r| r.cache_key.clone()),
                    "executionTime": record.map(|r| r.execution_time),
                }));
            }
        }
    }

    json!({ "artifacts": artifacts })
}

fn compute_artifact(state: &RpcState, args: ComputeArtifactArgs) -> Result<Value, RpcError> {
    let output = PathBuf::from(&args.output);
    let config = state.current_config();

    let known = config
        .watchers
        .iter()
        .flat_map(|w| w.commands.iter())
        .flat_map(|c| c.artifacts.iter())
        .any(|a| a.output == output);
    if !known {
        return Err(RpcError::bad_request(format!(
            "unknown artifact output: {}",
            args.output
        )));
    }

    info!(output = %args.output, "compute_artifact requested");
    state.events.emit(Event::ComputeArtifact { output });
    Ok(json!({ "requested": true, "output": args.output }))
}

fn get_status(state: &RpcState) -> Value {
    let config = state.current_config();
    let commands: usize = config.watchers.iter().map(|w| w.commands.len()).sum();
    let artifacts = config.artifact_outputs().len();

    json!({
        "daemonRunning": state.daemon.running.load(std::sync::atomic::Ordering::SeqCst),
        "paused": state.daemon.paused.load(std::sync::atomic::Ordering::SeqCst),
        "configLoaded": true,
        "watchers": config.watchers.len(),
        "commands": commands,
        "artifacts": artifacts,
        "lockFile": crate::resolver::path_to_slash(&state.lock_path),
    })
}

fn clear_cache(state: &RpcState) -> Result<Value, RpcError> {
    let config = state.current_config();

    // The cache directory honors the same precedence the middleware uses.
    let options = config
        .plugins
        .iter()
        .find_map(|plugin| match plugin {
            crate::config::PluginConfig::LocalCache(options) => Some(options.clone()),
            _ => None,
        })
        .unwrap_or_default();
    let store = crate::cache::LocalObjectStore::new(&state.root, &options);
    let cache_dir = store.dir().to_path_buf();

    let mut removed_cache = false;
    if cache_dir.exists() {
        std::fs::remove_dir_all(&cache_dir)
            .map_err(|err| RpcError::internal(format!("removing cache dir: {err}")))?;
        removed_cache = true;
    }

    let mut removed_lock = false;
    if state.lock_path.exists() {
        std::fs::remove_file(&state.lock_path)
            .map_err(|err| RpcError::internal(format!("removing lock file: {err}")))?;
        removed_lock = true;
    }

    info!(cache = removed_cache, lock = removed_lock, "cache cleared");
    Ok(json!({ "removedCache": removed_cache, "removedLockFile": removed_lock }))
}
