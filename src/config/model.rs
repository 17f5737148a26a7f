// src/config/model.rs

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::types::ThreadPriority;

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [config]
/// cancel_on_failure = true
///
/// [line.build]
/// workers = 2
///
/// [task.fetch]
/// cmd = "git fetch"
/// line = "build"
///
/// [task.compile]
/// cmd = "make"
/// line = "build"
/// after = ["fetch"]
/// ```
///
/// This is the unvalidated form; convert it with `ConfigFile::try_from`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    /// Global behaviour config from `[config]`.
    #[serde(default)]
    pub config: ConfigSection,

    /// Working lines from `[line.<tag>]`, keyed by queue tag.
    #[serde(default)]
    pub line: BTreeMap<String, LineConfig>,

    /// All tasks from `[task.<name>]`, keyed by task name.
    #[serde(default)]
    pub task: BTreeMap<String, TaskConfig>,
}

/// Validated configuration. Build it with `ConfigFile::try_from(raw)` or
/// [`load_and_validate`](crate::config::load_and_validate).
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub config: ConfigSection,
    pub line: BTreeMap<String, LineConfig>,
    pub task: BTreeMap<String, TaskConfig>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        config: ConfigSection,
        line: BTreeMap<String, LineConfig>,
        task: BTreeMap<String, TaskConfig>,
    ) -> Self {
        Self { config, line, task }
    }

    /// Progress regex source for `name`: the task's own, else the global one.
    pub fn progress_pattern(&self, name: &str) -> Option<&str> {
        self.task
            .get(name)
            .and_then(|t| t.progress_on_stdout.as_deref())
            .or(self.config.progress_on_stdout.as_deref())
    }
}

/// `[config]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigSection {
    /// Cancel the whole run as soon as one task fails.
    #[serde(default)]
    pub cancel_on_failure: bool,

    /// Default progress regex for every task; capture group 1 is read as a
    /// percentage.
    #[serde(default)]
    pub progress_on_stdout: Option<String>,
}

/// `[line.<tag>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct LineConfig {
    /// Number of worker threads (1 to 1024).
    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default)]
    pub priority: ThreadPriority,
}

fn default_workers() -> usize {
    1
}

impl Default for LineConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            priority: ThreadPriority::default(),
        }
    }
}

/// `[task.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskConfig {
    /// The command to execute.
    pub cmd: String,

    /// Queue tag of the working line that runs this task.
    pub line: String,

    /// Dependency list: this task waits for all tasks listed here.
    #[serde(default)]
    pub after: Vec<String>,

    /// Task-local progress regex, overriding `[config].progress_on_stdout`.
    #[serde(default)]
    pub progress_on_stdout: Option<String>,
}
