//! Slash-command resolution.
//!
//! Workflow steps are driven by agent slash commands (`/feature`, `/bug`,
//! `/chore`, `/pull_request`). A user can override any of them by dropping a
//! markdown file into `.claude/commands/`; otherwise the bundled plugin
//! version is addressed through its namespace.

use std::path::{Path, PathBuf};

/// Namespace the bundled command plugin publishes under.
const PLUGIN_NAMESPACE: &str = "sdlc";

#[derive(Debug, Clone)]
pub struct CommandRegistry {
    user_dir: PathBuf,
    plugin_dir: PathBuf,
}

impl CommandRegistry {
    pub fn new(user_dir: PathBuf, plugin_dir: PathBuf) -> Self {
        Self {
            user_dir,
            plugin_dir,
        }
    }

    pub fn from_working_dir(working_dir: &Path) -> Self {
        let claude_dir = working_dir.join(".claude");
        Self::new(
            claude_dir.join("commands"),
            claude_dir
                .join("plugins")
                .join(PLUGIN_NAMESPACE)
                .join("commands"),
        )
    }

    /// Resolves a slash command to the form that should be sent to the agent.
    ///
    /// A user-local `<name>.md` wins and keeps the command unchanged; failing
    /// that, a plugin-bundled `<name>.md` yields the namespaced form
    /// `/sdlc:<name>`. Unknown commands pass through untouched so the agent
    /// surfaces its own error.
    pub fn resolve(&self, command: &str) -> String {
        let name = command.trim_start_matches('/');
        if name.is_empty() {
            return command.to_string();
        }
        if command_file_exists(&self.user_dir, name) {
            command.to_string()
        } else if command_file_exists(&self.plugin_dir, name) {
            format!("/{PLUGIN_NAMESPACE}:{name}")
        } else {
            command.to_string()
        }
    }
}

fn command_file_exists(dir: &Path, name: &str) -> bool {
    dir.join(format!("{name}.md")).is_file()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with(user: &[&str], plugin: &[&str]) -> (tempfile::TempDir, CommandRegistry) {
        let tmp = tempfile::tempdir().unwrap();
        let user_dir = tmp.path().join("user");
        let plugin_dir = tmp.path().join("plugin");
        std::fs::create_dir_all(&user_dir).unwrap();
        std::fs::create_dir_all(&plugin_dir).unwrap();
        for name in user {
            std::fs::write(user_dir.join(format!("{name}.md")), "user override").unwrap();
        }
        for name in plugin {
            std::fs::write(plugin_dir.join(format!("{name}.md")), "plugin command").unwrap();
        }
        (tmp, CommandRegistry::new(user_dir, plugin_dir))
    }

    #[test]
    fn user_override_wins() {
        let (_tmp, registry) = registry_with(&["feature"], &["feature"]);
        assert_eq!(registry.resolve("/feature"), "/feature");
    }

    #[test]
    fn plugin_fallback_is_namespaced() {
        let (_tmp, registry) = registry_with(&[], &["feature"]);
        assert_eq!(registry.resolve("/feature"), "/sdlc:feature");
    }

    #[test]
    fn unknown_command_passes_through() {
        let (_tmp, registry) = registry_with(&[], &[]);
        assert_eq!(registry.resolve("/does_not_exist"), "/does_not_exist");
    }

    #[test]
    fn missing_directories_pass_through() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = CommandRegistry::from_working_dir(tmp.path());
        assert_eq!(registry.resolve("/bug"), "/bug");
    }

    #[test]
    fn bare_slash_is_untouched() {
        let (_tmp, registry) = registry_with(&["feature"], &[]);
        assert_eq!(registry.resolve("/"), "/");
    }
}
