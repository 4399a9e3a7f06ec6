//! Command policy registry.
//!
//! A read-only table of base command to allowed sub-actions. The table is
//! built once from configuration and has no mutation API.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::OnceLock;

use regex::Regex;

use crate::config::ConfigError;

/// Static allow-list of (base command, sub-action) pairs.
#[derive(Debug, Clone)]
pub struct CommandPolicy {
    entries: HashMap<String, HashSet<String>>,
}

fn command_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").expect("valid command regex")
    })
}

fn action_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9:._-]*$").expect("valid action regex")
    })
}

impl CommandPolicy {
    /// Build a policy from a configuration table.
    ///
    /// Fails if a command or action name is malformed, or if a command has
    /// no actions.
    pub fn from_table(table: &BTreeMap<String, Vec<String>>) -> Result<Self, ConfigError> {
        let mut entries = HashMap::with_capacity(table.len());

        for (command, actions) in table {
            if !command_pattern().is_match(command) {
                return Err(ConfigError::InvalidPolicy(format!(
                    "invalid command name '{}'",
                    command
                )));
            }
            if actions.is_empty() {
                return Err(ConfigError::InvalidPolicy(format!(
                    "command '{}' has no allowed actions",
                    command
                )));
            }

            let mut allowed = HashSet::with_capacity(actions.len());
            for action in actions {
                if !action_pattern().is_match(action) {
                    return Err(ConfigError::InvalidPolicy(format!(
                        "invalid action '{}' for command '{}'",
                        action, command
                    )));
                }
                allowed.insert(action.clone());
            }
            entries.insert(command.clone(), allowed);
        }

        Ok(Self { entries })
    }

    /// Default table for the process manager, container runtime and VCS.
    pub fn default_table() -> BTreeMap<String, Vec<String>> {
        let table: [(&str, &[&str]); 3] = [
            (
                "pm2",
                &["start", "stop", "restart", "reload", "delete", "logs", "describe"],
            ),
            ("docker", &["start", "stop", "restart", "logs", "inspect"]),
            ("git", &["pull", "fetch", "status", "log"]),
        ];

        table
            .iter()
            .map(|(command, actions)| {
                (
                    command.to_string(),
                    actions.iter().map(|a| a.to_string()).collect(),
                )
            })
            .collect()
    }

    /// Whether `action` is registered for `command`. Unknown commands fail closed.
    pub fn is_action_allowed(&self, command: &str, action: &str) -> bool {
        self.entries
            .get(command)
            .is_some_and(|actions| actions.contains(action))
    }

    /// Whether `command` has any registered actions.
    pub fn knows_command(&self, command: &str) -> bool {
        self.entries.contains_key(command)
    }

    /// Number of registered base commands.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for CommandPolicy {
    fn default() -> Self {
        Self::from_table(&Self::default_table()).unwrap_or_else(|_| Self {
            entries: HashMap::new(),
        })
    }
}
