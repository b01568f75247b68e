// src/config/model.rs

use std::path::PathBuf;

use serde::de::DeserializeOwned;
use serde::Deserialize;

/// Top-level configuration as read from a JSON file.
///
/// ```json
/// {
///   "debounceTime": 2000,
///   "plugins": [{ "name": "local-cache" }],
///   "watchers": [
///     {
///       "files": ["src/**/*.txt"],
///       "commands": [
///         {
///           "command": "cp src/app.txt dist/app.txt",
///           "artifacts": [{ "output": "dist/app.txt" }]
///         }
///       ]
///     }
///   ]
/// }
/// ```
///
/// Unknown keys are rejected at every level.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Optional JSON-schema reference; accepted and otherwise ignored.
    #[serde(rename = "$schema", default)]
    pub schema: Option<String>,

    /// Debounce interval for filesystem events, in milliseconds.
    #[serde(rename = "debounceTime", default = "default_debounce_time")]
    pub debounce_time: u64,

    /// Ignore patterns applied to every watcher in addition to its own.
    #[serde(rename = "defaultIgnoredFiles", default = "default_ignored_files")]
    pub default_ignored_files: Vec<String>,

    /// Ordered plugin list. Order is significant: tree plugins rewrite the
    /// task tree left-to-right, and cache middlewares run in this order.
    #[serde(default)]
    pub plugins: Vec<PluginConfig>,

    /// All watchers. At least one is required.
    pub watchers: Vec<WatcherConfig>,
}

pub(crate) fn default_debounce_time() -> u64 {
    2000
}

pub(crate) fn default_ignored_files() -> Vec<String> {
    vec![".git".to_string(), "**/node_modules".to_string()]
}

fn default_true() -> bool {
    true
}

/// Raw plugin entry as it appears in JSON: a tag plus untyped options.
///
/// Typed [`PluginConfig`] values are produced via `TryFrom`, so that each
/// plugin can enforce its own option schema (including rejecting unknown
/// keys) while `options` stays omissible for plugins with defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawPluginConfig {
    pub name: String,

    #[serde(default)]
    pub options: serde_json::Value,
}

/// One configured plugin, with validated options.
#[derive(Debug, Clone)]
pub enum PluginConfig {
    /// Local filesystem cache middleware.
    LocalCache(LocalCacheOptions),

    /// Remote object-store cache middleware.
    RemoteCache(RemoteCacheOptions),

    /// Replace commands missing the active tag with `Task::Empty`.
    TagFilter(TagFilterOptions),

    /// Fuse commands that share a command-family prefix and working
    /// directory into a single invocation.
    CommandFusion(CommandFusionOptions),

    /// Reorder commands into serial layers so producers run before
    /// consumers of their artifacts.
    DependencyLayering(DependencyLayeringOptions),
}

impl PluginConfig {
    /// The `name` tag this plugin was configured under.
    pub fn name(&self) -> &'static str {
        match self {
            PluginConfig::LocalCache(_) => "local-cache",
            PluginConfig::RemoteCache(_) => "remote-cache",
            PluginConfig::TagFilter(_) => "tag-filter",
            PluginConfig::CommandFusion(_) => "command-fusion",
            PluginConfig::DependencyLayering(_) => "dependency-layering",
        }
    }
}

impl TryFrom<RawPluginConfig> for PluginConfig {
    type Error = String;

    fn try_from(raw: RawPluginConfig) -> Result<Self, Self::Error> {
        fn options<T: DeserializeOwned + Default>(value: serde_json::Value) -> Result<T, String> {
            if value.is_null() {
                Ok(T::default())
            } else {
                serde_json::from_value(value).map_err(|e| e.to_string())
            }
        }

        fn required<T: DeserializeOwned>(
            name: &str,
            value: serde_json::Value,
        ) -> Result<T, String> {
            if value.is_null() {
                return Err(format!("plugin '{name}' requires an options object"));
            }
            serde_json::from_value(value).map_err(|e| e.to_string())
        }

        let name = raw.name.clone();
        let plugin = match raw.name.as_str() {
            "local-cache" => PluginConfig::LocalCache(options(raw.options)?),
            "remote-cache" => PluginConfig::RemoteCache(required(&name, raw.options)?),
            "tag-filter" => PluginConfig::TagFilter(options(raw.options)?),
            "command-fusion" => PluginConfig::CommandFusion(required(&name, raw.options)?),
            "dependency-layering" => PluginConfig::DependencyLayering(options(raw.options)?),
            other => return Err(format!("unknown plugin name: {other}")),
        };
        Ok(plugin)
    }
}

impl<'de> Deserialize<'de> for PluginConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = RawPluginConfig::deserialize(deserializer)?;
        PluginConfig::try_from(raw).map_err(serde::de::Error::custom)
    }
}

/// Options for the local cache middleware.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocalCacheOptions {
    /// Cache directory, relative to the project root unless absolute.
    /// Defaults to `.shadowdog/cache`.
    #[serde(default)]
    pub path: Option<PathBuf>,

    #[serde(default = "default_true")]
    pub read: bool,

    #[serde(default = "default_true")]
    pub write: bool,
}

impl Default for LocalCacheOptions {
    fn default() -> Self {
        Self {
            path: None,
            read: true,
            write: true,
        }
    }
}

/// Options for the remote cache middleware.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RemoteCacheOptions {
    /// Base URL of the S3-compatible object gateway.
    pub endpoint: String,

    /// Bucket name appended to the endpoint.
    pub bucket: String,

    /// Key prefix under the bucket.
    #[serde(default = "default_remote_prefix")]
    pub prefix: String,

    /// Named credentials profile resolved via the external credentials
    /// helper. When absent, explicit env keys are used instead.
    #[serde(default)]
    pub profile: Option<String>,

    #[serde(default = "default_true")]
    pub read: bool,

    #[serde(default = "default_true")]
    pub write: bool,
}

fn default_remote_prefix() -> String {
    "shadowdog".to_string()
}

/// Options for the tag filter plugin.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TagFilterOptions {
    /// Environment variable holding the active tag.
    #[serde(default = "default_tag_variable")]
    pub variable: String,
}

impl Default for TagFilterOptions {
    fn default() -> Self {
        Self {
            variable: default_tag_variable(),
        }
    }
}

fn default_tag_variable() -> String {
    "SHADOWDOG_TAG".to_string()
}

/// Options for the command fusion plugin.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandFusionOptions {
    /// Command-family prefix, e.g. `"bundle exec rake"`. Commands starting
    /// with this prefix and sharing a working directory are fused.
    pub prefix: String,
}

/// Options for the dependency layering plugin (currently none).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DependencyLayeringOptions {}

/// One watcher: a set of input globs plus the commands they drive.
///
/// A watcher is the unit of cache-key scope: every command in it shares the
/// same resolved file set.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WatcherConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Input glob patterns, relative to the project root. Changes to
    /// matching files trigger the watcher's commands.
    pub files: Vec<String>,

    /// Extra cache-key inputs that are not watched.
    #[serde(default)]
    pub invalidators: InvalidatorsConfig,

    /// Ignore patterns local to this watcher.
    #[serde(default)]
    pub ignored: Vec<String>,

    /// Human-readable label for logs.
    #[serde(default)]
    pub label: Option<String>,

    pub commands: Vec<CommandConfig>,
}

impl WatcherConfig {
    /// Label for logs: the configured one, or the first glob pattern.
    pub fn display_label(&self) -> &str {
        match &self.label {
            Some(label) => label,
            None => self.files.first().map(|s| s.as_str()).unwrap_or("<watcher>"),
        }
    }
}

/// Non-watched cache-key contributors: extra files and environment
/// variable names.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InvalidatorsConfig {
    #[serde(default)]
    pub files: Vec<String>,

    #[serde(default)]
    pub environment: Vec<String>,
}

/// One shell command and the artifacts it is expected to produce.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandConfig {
    /// Opaque shell string. The literal token `$FILE` is substituted with
    /// the changed file's path when a filesystem event drives the run.
    pub command: String,

    /// Working directory, relative to the project root.
    #[serde(rename = "workingDirectory", default)]
    pub working_directory: PathBuf,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    pub artifacts: Vec<ArtifactConfig>,
}

/// A named output: a file or a directory subtree, relative to the
/// project root.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArtifactConfig {
    pub output: PathBuf,

    #[serde(default)]
    pub description: Option<String>,

    /// Subpaths excluded when the artifact is packed into the cache.
    #[serde(default)]
    pub ignore: Vec<String>,
}

impl Config {
    /// All artifact outputs across every watcher, in declared order.
    pub fn artifact_outputs(&self) -> Vec<PathBuf> {
        self.watchers
            .iter()
            .flat_map(|w| w.commands.iter())
            .flat_map(|c| c.artifacts.iter())
            .map(|a| a.output.clone())
            .collect()
    }

    /// Watchers that are enabled.
    pub fn enabled_watchers(&self) -> impl Iterator<Item = &WatcherConfig> {
        self.watchers.iter().filter(|w| w.enabled)
    }
}
