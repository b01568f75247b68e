// src/cache/middleware.rs

use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tracing::{debug, info, warn};

use crate::cache::archive;
use crate::cache::content::content_digest;
use crate::cache::key::{artifact_object_name, compute_cache_key};
use crate::cache::store::ObjectStore;
use crate::config::{ArtifactConfig, LocalCacheOptions, PluginConfig, RemoteCacheOptions};
use crate::resolver::IgnoreMatcher;
use crate::task::{Middleware, MiddlewareFuture, Next, RunContext};

/// Environment variable names that disable or flip a backend at runtime.
/// Read on every invocation, never cached.
struct KillSwitches {
    disable: &'static str,
    read: &'static str,
    write: &'static str,
}

const LOCAL_SWITCHES: KillSwitches = KillSwitches {
    disable: "SHADOWDOG_DISABLE_LOCAL_CACHE",
    read: "SHADOWDOG_LOCAL_CACHE_READ",
    write: "SHADOWDOG_LOCAL_CACHE_WRITE",
};

const REMOTE_SWITCHES: KillSwitches = KillSwitches {
    disable: "SHADOWDOG_DISABLE_REMOTE_CACHE",
    read: "SHADOWDOG_REMOTE_CACHE_READ",
    write: "SHADOWDOG_REMOTE_CACHE_WRITE",
};

/// Read-before / write-after cache middleware. The transport is behind
/// [`ObjectStore`]; local and remote backends share this protocol.
pub struct CacheMiddleware {
    store: Arc<dyn ObjectStore>,
    read: bool,
    write: bool,
    switches: KillSwitches,
}

impl CacheMiddleware {
    pub fn local(root: &Path, options: &LocalCacheOptions) -> Self {
        Self {
            store: Arc::new(crate::cache::store::LocalObjectStore::new(root, options)),
            read: options.read,
            write: options.write,
            switches: LOCAL_SWITCHES,
        }
    }

    pub fn remote(options: &RemoteCacheOptions) -> Self {
        Self {
            store: Arc::new(crate::cache::store::RemoteObjectStore::new(options.clone())),
            read: options.read,
            write: options.write,
            switches: REMOTE_SWITCHES,
        }
    }

    /// Build the middleware stack for the cache plugins in `plugins`,
    /// preserving configured order.
    pub fn stack_from_config(
        root: &Path,
        plugins: &[PluginConfig],
    ) -> Vec<Arc<dyn Middleware>> {
        let mut stack: Vec<Arc<dyn Middleware>> = Vec::new();
        for plugin in plugins {
            match plugin {
                PluginConfig::LocalCache(options) => {
                    stack.push(Arc::new(Self::local(root, options)));
                }
                PluginConfig::RemoteCache(options) => {
                    stack.push(Arc::new(Self::remote(options)));
                }
                _ => {}
            }
        }
        stack
    }

    /// Effective (read, write) flags for this invocation, combining
    /// configuration, kill switches, and store availability.
    async fn effective_flags(&self) -> (bool, bool) {
        if env_flag(self.switches.disable).unwrap_or(false) {
            return (false, false);
        }
        if !self.store.available().await.unwrap_or(false) {
            return (false, false);
        }
        let read = env_flag(self.switches.read).unwrap_or(self.read);
        let write = env_flag(self.switches.write).unwrap_or(self.write);
        (read, write)
    }

    /// Try to satisfy one artifact from the cache. `Ok(true)` means the
    /// artifact is now correct on disk (restored, or verified identical).
    /// Failures anywhere in the read path degrade to a miss.
    async fn restore_artifact(
        &self,
        ctx: &RunContext,
        cache_key: &str,
        artifact: &ArtifactConfig,
    ) -> bool {
        let object = artifact_object_name(cache_key, &artifact.output);
        match self.try_restore(ctx, &object, artifact).await {
            Ok(hit) => hit,
            Err(err) => {
                warn!(
                    backend = self.store.label(),
                    output = ?artifact.output,
                    error = %err,
                    "cache read failed; treating as miss"
                );
                false
            }
        }
    }

    async fn try_restore(
        &self,
        ctx: &RunContext,
        object: &str,
        artifact: &ArtifactConfig,
    ) -> Result<bool> {
        let data = match self.store.fetch(object).await? {
            Some(data) => data,
            None => {
                debug!(
                    backend = self.store.label(),
                    object = %object,
                    output = ?artifact.output,
                    "cache miss"
                );
                return Ok(false);
            }
        };

        let ignore = IgnoreMatcher::new(&artifact.ignore)?;
        let base = artifact
            .output
            .file_name()
            .ok_or_else(|| anyhow!("artifact output {:?} has no base name", artifact.output))?;

        // Extract to a unique temp dir first; TempDir removes it on every
        // exit path, including errors below.
        let temp = tempfile::Builder::new()
            .prefix("shadowdog-restore-")
            .tempdir()
            .context("creating temp extraction directory")?;
        archive::unpack(&data[..], temp.path(), &ignore)?;
        let extracted = temp.path().join(base);

        let cached_digest = content_digest(&extracted, &ignore)?
            .ok_or_else(|| anyhow!("cache object {object} missing entry {base:?}"))?;

        let dest = ctx.root.join(&artifact.output);
        if let Some(existing) = content_digest(&dest, &ignore)? {
            if existing == cached_digest {
                info!(
                    backend = self.store.label(),
                    output = ?artifact.output,
                    "[shadowdog] artifact already matches cache; skipping restore"
                );
                return Ok(true);
            }
        }

        if dest.exists() {
            remove_path(&dest)?;
        }
        let parent = dest
            .parent()
            .ok_or_else(|| anyhow!("artifact output {:?} has no parent", artifact.output))?;
        archive::unpack(&data[..], parent, &ignore)?;

        info!(
            backend = self.store.label(),
            object = %object,
            output = ?artifact.output,
            "restored artifact from cache"
        );
        Ok(true)
    }

    /// Pack and upload every artifact that exists on disk. Failures are
    /// logged and swallowed; a cache problem never fails the task.
    async fn store_artifacts(&self, ctx: &RunContext, cache_key: &str) {
        for artifact in &ctx.command.artifacts {
            let dest = ctx.root.join(&artifact.output);
            if !dest.exists() {
                info!(
                    backend = self.store.label(),
                    output = ?artifact.output,
                    "artifact not present; nothing to store"
                );
                continue;
            }

            let object = artifact_object_name(cache_key, &artifact.output);
            let result = async {
                let ignore = IgnoreMatcher::new(&artifact.ignore)?;
                let data = archive::pack(&dest, &ignore)?;
                self.store.store(&object, data).await
            }
            .await;

            match result {
                Ok(()) => {
                    debug!(
                        backend = self.store.label(),
                        object = %object,
                        output = ?artifact.output,
                        "stored artifact in cache"
                    );
                }
                Err(err) => {
                    warn!(
                        backend = self.store.label(),
                        output = ?artifact.output,
                        error = %err,
                        "cache write failed; continuing"
                    );
                }
            }
        }
    }
}

impl Middleware for CacheMiddleware {
    fn handle<'a>(&'a self, ctx: &'a RunContext, next: Next<'a>) -> MiddlewareFuture<'a> {
        Box::pin(async move {
            let (read, write) = self.effective_flags().await;
            if !read && !write {
                return next.run(ctx).await;
            }

            let cache_key =
                compute_cache_key(&ctx.root, &ctx.files, &ctx.environment, &ctx.command.command)?;

            if read && !ctx.command.artifacts.is_empty() {
                let mut all_hit = true;
                for artifact in &ctx.command.artifacts {
                    if !self.restore_artifact(ctx, &cache_key, artifact).await {
                        all_hit = false;
                    }
                }
                if all_hit {
                    info!(
                        backend = self.store.label(),
                        cache_key = %cache_key,
                        command = %ctx.command.command,
                        "all artifacts cached; skipping command"
                    );
                    ctx.abort();
                    return Ok(());
                }
            }

            next.run(ctx).await?;

            if write {
                self.store_artifacts(ctx, &cache_key).await;
            }

            Ok(())
        })
    }
}

fn remove_path(path: &Path) -> Result<()> {
    let metadata =
        std::fs::symlink_metadata(path).with_context(|| format!("stat {path:?}"))?;
    if metadata.is_dir() {
        std::fs::remove_dir_all(path).with_context(|| format!("removing {path:?}"))
    } else {
        std::fs::remove_file(path).with_context(|| format!("removing {path:?}"))
    }
}

/// Parse a boolean-ish environment variable. Unset or unrecognized values
/// yield `None` so the configured default applies.
fn env_flag(name: &str) -> Option<bool> {
    match std::env::var(name) {
        Ok(value) => match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => Some(true),
            "0" | "false" | "no" => Some(false),
            _ => None,
        },
        Err(_) => None,
    }
}
