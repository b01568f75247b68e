// src/plugins/mod.rs

//! Command plugins: pure `Task -> Task` transformations applied
//! left-to-right over the configured plugin list.
//!
//! - [`tag_filter`] prunes commands missing the active tag.
//! - [`fusion`] merges commands of the same command family into one
//!   invocation.
//! - [`layering`] reorders commands into serial layers so artifact
//!   producers run before their consumers.
//!
//! Cache plugins are middlewares, not tree transforms; they are skipped
//! here and built by `CacheMiddleware::stack_from_config`.

pub mod fusion;
pub mod layering;
pub mod tag_filter;

use anyhow::Result;

use crate::config::PluginConfig;
use crate::task::Task;

/// Apply every configured tree plugin to the task tree, in order.
pub fn apply_tree_plugins(mut task: Task, plugins: &[PluginConfig]) -> Result<Task> {
    for plugin in plugins {
        task = match plugin {
            PluginConfig::TagFilter(options) => tag_filter::apply(task, options),
            PluginConfig::CommandFusion(options) => fusion::apply(task, options),
            PluginConfig::DependencyLayering(_) => layering::apply(task)?,
            PluginConfig::LocalCache(_) | PluginConfig::RemoteCache(_) => task,
        };
    }
    Ok(task)
}
