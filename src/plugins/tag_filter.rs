// src/plugins/tag_filter.rs

use tracing::debug;

use crate::config::TagFilterOptions;
use crate::task::Task;

/// Replace every command whose tags do not include the active tag with
/// `Task::Empty`. The active tag comes from the configured environment
/// variable; when it is unset or empty the tree passes through unchanged.
pub fn apply(task: Task, options: &TagFilterOptions) -> Task {
    let tag = match std::env::var(&options.variable) {
        Ok(tag) if !tag.trim().is_empty() => tag,
        _ => return task,
    };

    task.map_commands(&|cmd| {
        if cmd.command.tags.iter().any(|t| *t == tag) {
            Task::Command(cmd)
        } else {
            debug!(
                tag = %tag,
                command = %cmd.command.command,
                "tag filter pruning command"
            );
            Task::Empty
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CommandConfig;
    use crate::task::CommandTask;

    fn command_with_tags(command: &str, tags: &[&str]) -> Task {
        let config: CommandConfig = serde_json::from_value(serde_json::json!({
            "command": command,
            "tags": tags,
        }))
        .unwrap();
        Task::Command(CommandTask {
            command: config,
            files: Vec::new(),
            environment: Vec::new(),
            ignored: Vec::new(),
        })
    }

    #[test]
    fn prunes_commands_without_active_tag() {
        let options = TagFilterOptions {
            variable: "SHADOWDOG_TAG_FILTER_TEST".to_string(),
        };
        std::env::set_var(&options.variable, "assets");

        let tree = Task::Parallel(vec![
            command_with_tags("build-assets", &["assets"]),
            command_with_tags("build-docs", &["docs"]),
        ]);

        let filtered = apply(tree, &options);
        std::env::remove_var(&options.variable);

        let commands = filtered.commands();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].command.command, "build-assets");
    }

    #[test]
    fn inactive_tag_leaves_tree_unchanged() {
        let options = TagFilterOptions {
            variable: "SHADOWDOG_TAG_FILTER_UNSET_TEST".to_string(),
        };
        std::env::remove_var(&options.variable);

        let tree = Task::Parallel(vec![
            command_with_tags("a", &["x"]),
            command_with_tags("b", &[]),
        ]);

        let filtered = apply(tree, &options);
        assert_eq!(filtered.commands().len(), 2);
    }
}
