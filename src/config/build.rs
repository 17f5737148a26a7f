// src/config/build.rs

//! Turn a validated [`ConfigFile`] into tasks and a ready-to-start
//! [`TaskManager`].

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::config::model::ConfigFile;
use crate::config::validate::{compile_pattern, dependency_order};
use crate::dag::Task;
use crate::engine::TaskManager;
use crate::errors::{Result, TasklineError};
use crate::exec::{CommandSpec, CommandWorker, WorkerFactory};

/// Build one task per `[task.<name>]`, in dependency order, each carrying a
/// [`CommandSpec`] payload.
pub fn build_tasks(cfg: &ConfigFile) -> Result<Vec<Arc<Task>>> {
    let order = dependency_order(&cfg.task)?;
    let mut built: HashMap<&str, Arc<Task>> = HashMap::with_capacity(order.len());
    let mut tasks = Vec::with_capacity(order.len());

    for name in order {
        let Some(task_cfg) = cfg.task.get(name) else {
            continue;
        };

        let mut spec = CommandSpec::new(task_cfg.cmd.clone());
        if let Some(pattern) = cfg.progress_pattern(name) {
            spec = spec.with_progress(compile_pattern(
                pattern,
                &format!("[task.{name}].progress_on_stdout"),
            )?);
        }

        let mut builder = Task::builder(name, task_cfg.line.clone()).payload(spec);
        for dep in task_cfg.after.iter() {
            let dependency = built.get(dep.as_str()).ok_or_else(|| {
                TasklineError::ConfigError(format!(
                    "task '{}' has unknown dependency '{}' in `after`",
                    name, dep
                ))
            })?;
            builder = builder.after(dependency);
        }

        let task = builder.build();
        debug!(task = %name, line = %task_cfg.line, deps = task_cfg.after.len(), "task built");
        built.insert(name, Arc::clone(&task));
        tasks.push(task);
    }

    Ok(tasks)
}

/// Build a manager with one [`CommandWorker`] line per `[line.<tag>]` and
/// every configured task added.
pub fn build_manager(cfg: &ConfigFile) -> Result<TaskManager> {
    let manager = TaskManager::new()?;
    manager.set_cancel_on_failure(cfg.config.cancel_on_failure)?;

    let factory: Arc<dyn WorkerFactory> = Arc::new(CommandWorker::new());
    for (tag, line) in cfg.line.iter() {
        manager.add_working_line(tag.clone(), Arc::clone(&factory), line.workers, line.priority)?;
    }

    manager.add_tasks(build_tasks(cfg)?)?;
    Ok(manager)
}
