// src/cache/store.rs

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use anyhow::{anyhow, Context, Result};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::config::{LocalCacheOptions, RemoteCacheOptions};

/// File extension for every cache object.
pub const OBJECT_EXT: &str = "tar.gz";

type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Transport behind a cache middleware. The protocol (key computation,
/// SHA verification, abort-on-hit) lives in the middleware; stores only
/// move bytes for named objects.
pub trait ObjectStore: Send + Sync {
    /// Short label for logs ("local" / "remote").
    fn label(&self) -> &'static str;

    /// True when the store can currently serve requests. Checked per
    /// invocation so credential loss degrades gracefully.
    fn available<'a>(&'a self) -> StoreFuture<'a, bool>;

    /// Fetch an object's bytes, `None` on miss.
    fn fetch<'a>(&'a self, name: &'a str) -> StoreFuture<'a, Option<Vec<u8>>>;

    /// Store an object's bytes under the given name.
    fn store<'a>(&'a self, name: &'a str, data: Vec<u8>) -> StoreFuture<'a, ()>;
}

/// Local directory store. Objects are written atomically (temp file then
/// rename) so a concurrent reader never observes a partial archive.
pub struct LocalObjectStore {
    dir: PathBuf,
}

impl LocalObjectStore {
    /// Cache directory precedence: `SHADOWDOG_LOCAL_CACHE_PATH`, then the
    /// configured path, then `.shadowdog/cache` under the project root.
    pub fn new(root: &std::path::Path, options: &LocalCacheOptions) -> Self {
        let dir = std::env::var("SHADOWDOG_LOCAL_CACHE_PATH")
            .map(PathBuf::from)
            .ok()
            .or_else(|| options.path.clone())
            .unwrap_or_else(|| PathBuf::from(".shadowdog/cache"));
        let dir = if dir.is_absolute() { dir } else { root.join(dir) };
        Self { dir }
    }

    pub fn dir(&self) -> &std::path::Path {
        &self.dir
    }

    fn object_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.{OBJECT_EXT}"))
    }
}

impl ObjectStore for LocalObjectStore {
    fn label(&self) -> &'static str {
        "local"
    }

    fn available<'a>(&'a self) -> StoreFuture<'a, bool> {
        Box::pin(async { Ok(true) })
    }

    fn fetch<'a>(&'a self, name: &'a str) -> StoreFuture<'a, Option<Vec<u8>>> {
        Box::pin(async move {
            let path = self.object_path(name);
            match tokio::fs::read(&path).await {
                Ok(data) => Ok(Some(data)),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(err) => Err(err).with_context(|| format!("reading cache object {path:?}")),
            }
        })
    }

    fn store<'a>(&'a self, name: &'a str, data: Vec<u8>) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let path = self.object_path(name);
            tokio::fs::create_dir_all(&self.dir)
                .await
                .with_context(|| format!("creating cache directory {:?}", self.dir))?;

            let tmp = self.dir.join(format!("{name}.{OBJECT_EXT}.tmp"));
            tokio::fs::write(&tmp, &data)
                .await
                .with_context(|| format!("writing cache object {tmp:?}"))?;
            tokio::fs::rename(&tmp, &path)
                .await
                .with_context(|| format!("publishing cache object {path:?}"))?;

            debug!(object = %name, path = ?path, "stored cache object");
            Ok(())
        })
    }
}

/// Credentials for the remote object gateway.
#[derive(Debug, Clone)]
pub struct RemoteCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

/// Remote object-store client over a plain HTTP gateway.
///
/// Object layout is `<endpoint>/<bucket>/<prefix>/<name>.tar.gz`.
/// Credentials come from explicit env keys (`AWS_ACCESS_KEY_ID` /
/// `AWS_SECRET_ACCESS_KEY`) or, when a profile is configured, from the
/// external credentials helper. With neither available the store reports
/// itself unavailable and the middleware skips both read and write.
pub struct RemoteObjectStore {
    options: RemoteCacheOptions,
    client: reqwest::Client,
    credentials: OnceCell<Option<RemoteCredentials>>,
}

impl RemoteObjectStore {
    pub fn new(options: RemoteCacheOptions) -> Self {
        Self {
            options,
            client: reqwest::Client::new(),
            credentials: OnceCell::new(),
        }
    }

    fn object_url(&self, name: &str) -> String {
        let endpoint = self.options.endpoint.trim_end_matches('/');
        format!(
            "{endpoint}/{}/{}/{name}.{OBJECT_EXT}",
            self.options.bucket,
            self.options.prefix.trim_matches('/')
        )
    }

    async fn credentials(&self) -> Option<RemoteCredentials> {
        self.credentials
            .get_or_init(|| async { resolve_credentials(self.options.profile.as_deref()).await })
            .await
            .clone()
    }
}

impl ObjectStore for RemoteObjectStore {
    fn label(&self) -> &'static str {
        "remote"
    }

    fn available<'a>(&'a self) -> StoreFuture<'a, bool> {
        Box::pin(async move { Ok(self.credentials().await.is_some()) })
    }

    fn fetch<'a>(&'a self, name: &'a str) -> StoreFuture<'a, Option<Vec<u8>>> {
        Box::pin(async move {
            let credentials = match self.credentials().await {
                Some(credentials) => credentials,
                None => return Ok(None),
            };

            let url = self.object_url(name);
            let response = self
                .client
                .get(&url)
                .basic_auth(&credentials.access_key_id, Some(&credentials.secret_access_key))
                .send()
                .await
                .with_context(|| format!("fetching cache object {url}"))?;

            if response.status() == reqwest::StatusCode::NOT_FOUND {
                return Ok(None);
            }
            let response = response
                .error_for_status()
                .with_context(|| format!("fetching cache object {url}"))?;

            let bytes = response
                .bytes()
                .await
                .with_context(|| format!("reading cache object body {url}"))?;
            Ok(Some(bytes.to_vec()))
        })
    }

    fn store<'a>(&'a self, name: &'a str, data: Vec<u8>) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let credentials = match self.credentials().await {
                Some(credentials) => credentials,
                None => return Ok(()),
            };

            let url = self.object_url(name);
            let mut request = self
                .client
                .put(&url)
                .basic_auth(&credentials.access_key_id, Some(&credentials.secret_access_key))
                .body(data);

            // Opaque caller-supplied metadata attached to uploads.
            if let Ok(extra) = std::env::var("SHADOWDOG_REMOTE_CACHE_EXTRA") {
                request = request.header("x-shadowdog-extra", extra);
            }

            request
                .send()
                .await
                .with_context(|| format!("uploading cache object {url}"))?
                .error_for_status()
                .with_context(|| format!("uploading cache object {url}"))?;

            debug!(object = %name, url = %url, "uploaded cache object");
            Ok(())
        })
    }
}

/// Resolve remote credentials: explicit env keys first, then the external
/// credentials helper for the configured profile.
async fn resolve_credentials(profile: Option<&str>) -> Option<RemoteCredentials> {
    if let (Ok(access_key_id), Ok(secret_access_key)) = (
        std::env::var("AWS_ACCESS_KEY_ID"),
        std::env::var("AWS_SECRET_ACCESS_KEY"),
    ) {
        return Some(RemoteCredentials {
            access_key_id,
            secret_access_key,
        });
    }

    let profile = profile?;
    match credentials_from_helper(profile).await {
        Ok(credentials) => Some(credentials),
        Err(err) => {
            warn!(
                profile = %profile,
                error = %err,
                "remote cache credentials unavailable; skipping remote cache"
            );
            None
        }
    }
}

/// Invoke the external credentials helper for a named profile and parse
/// its `KEY=VALUE` output.
async fn credentials_from_helper(profile: &str) -> Result<RemoteCredentials> {
    let output = tokio::process::Command::new("aws")
        .args([
            "configure",
            "export-credentials",
            "--profile",
            profile,
            "--format",
            "env-no-export",
        ])
        .output()
        .await
        .context("running credentials helper")?;

    if !output.status.success() {
        return Err(anyhow!(
            "credentials helper exited with {}",
            output.status.code().unwrap_or(-1)
        ));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let mut access_key_id = None;
    let mut secret_access_key = None;
    for line in stdout.lines() {
        if let Some((key, value)) = line.split_once('=') {
            match key.trim() {
                "AWS_ACCESS_KEY_ID" => access_key_id = Some(value.trim().to_string()),
                "AWS_SECRET_ACCESS_KEY" => secret_access_key = Some(value.trim().to_string()),
                _ => {}
            }
        }
    }

    match (access_key_id, secret_access_key) {
        (Some(access_key_id), Some(secret_access_key)) => Ok(RemoteCredentials {
            access_key_id,
            secret_access_key,
        }),
        _ => Err(anyhow!("credentials helper output missing keys")),
    }
}
