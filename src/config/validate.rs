// src/config/validate.rs

use std::collections::BTreeMap;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use regex::Regex;

use crate::config::model::{ConfigFile, RawConfigFile, TaskConfig};
use crate::engine::MAX_WORKERS;
use crate::errors::{Result, TasklineError};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = crate::errors::TasklineError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw.config, raw.line, raw.task))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_tasks(cfg)?;
    validate_lines(cfg)?;
    validate_task_lines(cfg)?;
    validate_task_dependencies(cfg)?;
    validate_patterns(cfg)?;
    validate_dag(cfg)?;
    Ok(())
}

fn ensure_has_tasks(cfg: &RawConfigFile) -> Result<()> {
    if cfg.task.is_empty() {
        return Err(TasklineError::ConfigError(
            "config must contain at least one [task.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_lines(cfg: &RawConfigFile) -> Result<()> {
    if cfg.line.is_empty() {
        return Err(TasklineError::ConfigError(
            "config must contain at least one [line.<tag>] section".to_string(),
        ));
    }

    for (tag, line) in cfg.line.iter() {
        if line.workers == 0 || line.workers > MAX_WORKERS {
            return Err(TasklineError::ConfigError(format!(
                "[line.{}].workers must be between 1 and {} (got {})",
                tag, MAX_WORKERS, line.workers
            )));
        }
    }
    Ok(())
}

fn validate_task_lines(cfg: &RawConfigFile) -> Result<()> {
    for (name, task) in cfg.task.iter() {
        if !cfg.line.contains_key(&task.line) {
            return Err(TasklineError::ConfigError(format!(
                "task '{}' uses unknown line '{}'",
                name, task.line
            )));
        }
    }
    Ok(())
}

fn validate_task_dependencies(cfg: &RawConfigFile) -> Result<()> {
    for (name, task) in cfg.task.iter() {
        for dep in task.after.iter() {
            if !cfg.task.contains_key(dep) {
                return Err(TasklineError::ConfigError(format!(
                    "task '{}' has unknown dependency '{}' in `after`",
                    name, dep
                )));
            }
            if dep == name {
                return Err(TasklineError::ConfigError(format!(
                    "task '{}' cannot depend on itself in `after`",
                    name
                )));
            }
        }
    }
    Ok(())
}

fn validate_patterns(cfg: &RawConfigFile) -> Result<()> {
    if let Some(pattern) = cfg.config.progress_on_stdout.as_deref() {
        compile_pattern(pattern, "[config].progress_on_stdout")?;
    }
    for (name, task) in cfg.task.iter() {
        if let Some(pattern) = task.progress_on_stdout.as_deref() {
            compile_pattern(pattern, &format!("[task.{name}].progress_on_stdout"))?;
        }
    }
    Ok(())
}

/// Compile a progress regex, naming `origin` in the error.
pub(crate) fn compile_pattern(pattern: &str, origin: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| {
        TasklineError::ConfigError(format!("{origin}: invalid regex '{pattern}': {e}"))
    })
}

fn validate_dag(cfg: &RawConfigFile) -> Result<()> {
    dependency_order(&cfg.task).map(|_| ())
}

/// Task names ordered so that every task comes after its dependencies.
///
/// Fails with `DagCycle` when the `after` references form a cycle.
pub(crate) fn dependency_order(tasks: &BTreeMap<String, TaskConfig>) -> Result<Vec<&str>> {
    // Edge direction: dep -> task
    // For:
    //   [task.B]
    //   after = ["A"]
    // we add edge A -> B.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for name in tasks.keys() {
        graph.add_node(name.as_str());
    }

    for (name, task) in tasks.iter() {
        for dep in task.after.iter() {
            graph.add_edge(dep.as_str(), name.as_str(), ());
        }
    }

    // A topological sort will fail if there is a cycle.
    toposort(&graph, None).map_err(|cycle| {
        TasklineError::DagCycle(format!(
            "cycle detected in task DAG involving task '{}'",
            cycle.node_id()
        ))
    })
}
