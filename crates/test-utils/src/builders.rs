#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use taskline::config::{ConfigFile, ConfigSection, LineConfig, RawConfigFile, TaskConfig};
use taskline::dag::Task;
use taskline::types::ThreadPriority;

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile {
                config: ConfigSection::default(),
                line: BTreeMap::new(),
                task: BTreeMap::new(),
            },
        }
    }

    pub fn with_line(mut self, tag: &str, workers: usize) -> Self {
        self.config.line.insert(
            tag.to_string(),
            LineConfig {
                workers,
                priority: ThreadPriority::Normal,
            },
        );
        self
    }

    pub fn with_line_priority(mut self, tag: &str, workers: usize, priority: ThreadPriority) -> Self {
        self.config
            .line
            .insert(tag.to_string(), LineConfig { workers, priority });
        self
    }

    pub fn with_task(mut self, name: &str, task: TaskConfig) -> Self {
        self.config.task.insert(name.to_string(), task);
        self
    }

    pub fn cancel_on_failure(mut self, val: bool) -> Self {
        self.config.config.cancel_on_failure = val;
        self
    }

    pub fn progress_on_stdout(mut self, pattern: &str) -> Self {
        self.config.config.progress_on_stdout = Some(pattern.to_string());
        self
    }

    /// The unvalidated config, for tests that expect validation to fail.
    pub fn build_raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `TaskConfig`.
pub struct TaskConfigBuilder {
    task: TaskConfig,
}

impl TaskConfigBuilder {
    pub fn new(cmd: &str, line: &str) -> Self {
        Self {
            task: TaskConfig {
                cmd: cmd.to_string(),
                line: line.to_string(),
                after: vec![],
                progress_on_stdout: None,
            },
        }
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.task.after.push(dep.to_string());
        self
    }

    pub fn progress_on_stdout(mut self, pattern: &str) -> Self {
        self.task.progress_on_stdout = Some(pattern.to_string());
        self
    }

    pub fn build(self) -> TaskConfig {
        self.task
    }
}

/// `labels[i]` depends on `labels[i - 1]`, all on the line `tag`.
pub fn chain(labels: &[&str], tag: &str) -> Vec<Arc<Task>> {
    let mut tasks: Vec<Arc<Task>> = Vec::with_capacity(labels.len());
    for label in labels {
        let mut builder = Task::builder(*label, tag);
        if let Some(previous) = tasks.last() {
            builder = builder.after(previous);
        }
        tasks.push(builder.build());
    }
    tasks
}

/// `count` tasks without dependencies, labelled `{prefix}{i}`.
pub fn independent(count: usize, prefix: &str, tag: &str) -> Vec<Arc<Task>> {
    (0..count)
        .map(|i| Task::new(format!("{prefix}{i}"), tag))
        .collect()
}

/// Task `i` is labelled `t{i}` and depends on the tasks listed in
/// `deps[i]`, each of which must be smaller than `i`. Task `i` runs on
/// `tags[i % tags.len()]`.
pub fn dag(deps: &[Vec<usize>], tags: &[&str]) -> Vec<Arc<Task>> {
    let mut tasks: Vec<Arc<Task>> = Vec::with_capacity(deps.len());
    for (i, task_deps) in deps.iter().enumerate() {
        let mut builder = Task::builder(format!("t{i}"), tags[i % tags.len()]);
        for &d in task_deps {
            assert!(d < i, "dependency t{d} of t{i} must come first");
            builder = builder.after(&tasks[d]);
        }
        tasks.push(builder.build());
    }
    tasks
}
