//! Command history for runcon
//!
//! Remembers the last command confirmed for each working directory so it
//! can be re-run with a single key.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Last command per working directory. Entries live for the whole
/// application run and are only ever overwritten.
#[derive(Debug, Default, Clone)]
pub struct CommandHistory {
    entries: HashMap<PathBuf, String>,
}

impl CommandHistory {
    /// Create an empty history
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `command` as the last one run in `dir`
    pub fn record(&mut self, dir: &Path, command: &str) {
        let trimmed = command.trim();
        if trimmed.is_empty() {
            return;
        }
        self.entries.insert(dir.to_path_buf(), trimmed.to_string());
    }

    /// Last command confirmed for `dir`
    pub fn last_command(&self, dir: &Path) -> Option<&str> {
        self.entries.get(dir).map(String::as_str)
    }

    pub fn contains(&self, dir: &Path) -> bool {
        self.entries.contains_key(dir)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
