// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod sync;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::model::ConfigFile;
use crate::config::{build_manager, build_tasks, load_and_validate};
use crate::dag::{TaskGraph, TaskState};
use crate::engine::ManagerEvent;

/// How long to wait for the last notifications after a run ended.
const NOTIFICATION_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Final state of one task after a run.
#[derive(Debug, Clone)]
pub struct TaskReport {
    pub label: String,
    pub line: String,
    pub state: TaskState,
    pub error_message: Option<String>,
}

/// Outcome of [`run`].
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub tasks: Vec<TaskReport>,
}

impl RunReport {
    pub fn all_succeeded(&self) -> bool {
        self.tasks.iter().all(|t| t.state == TaskState::Succeeded)
    }

    pub fn count(&self, state: TaskState) -> usize {
        self.tasks.iter().filter(|t| t.state == state).count()
    }
}

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - task manager with one command working line per `[line.<tag>]`
/// - Ctrl-C handling (cancels the run)
/// - the final summary
pub async fn run(args: CliArgs) -> Result<RunReport> {
    let cfg = load_and_validate(&args.config)
        .with_context(|| format!("loading config from {:?}", args.config))?;

    if args.dry_run {
        print_dry_run(&cfg)?;
        return Ok(RunReport::default());
    }

    let manager = Arc::new(build_manager(&cfg)?);
    manager.subscribe(log_manager_event);
    manager.start()?;

    // Ctrl-C -> cancel the run; running commands are killed by their worker.
    let ctrl_c = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            warn!("Ctrl+C received; canceling run");
            manager.cancel();
        })
    };

    // The manager blocks on OS primitives; keep that off the async workers.
    let waiter = Arc::clone(&manager);
    tokio::task::spawn_blocking(move || {
        waiter.wait_for_end(None);
        waiter.wait_for_notifications(Some(NOTIFICATION_FLUSH_TIMEOUT));
    })
    .await
    .context("waiting for the task manager")?;
    ctrl_c.abort();

    let report = RunReport {
        tasks: manager
            .tasks()
            .iter()
            .map(|task| TaskReport {
                label: task.label().to_string(),
                line: task.queue_tag().to_string(),
                state: task.state(),
                error_message: task.error_message(),
            })
            .collect(),
    };

    let disposer = Arc::clone(&manager);
    tokio::task::spawn_blocking(move || disposer.dispose())
        .await
        .context("disposing the task manager")?;

    print_summary(&report);
    Ok(report)
}

fn log_manager_event(event: &ManagerEvent) {
    match event {
        ManagerEvent::TaskBegin { line, task } => {
            info!(line = %line, task = %task.label(), "task started");
        }
        ManagerEvent::TaskEnd { line, task } => {
            info!(line = %line, task = %task.label(), state = %task.state(), "task ended");
        }
        ManagerEvent::WorkerError { line, task, error } => {
            warn!(line = %line, task = %task.label(), error = %error, "task failed");
        }
        ManagerEvent::UnhandledFailure { message } => {
            warn!(%message, "unhandled failure in event handler");
        }
        other => debug!(event = ?other, "manager event"),
    }
}

fn print_summary(report: &RunReport) {
    println!("taskline summary");
    for task in &report.tasks {
        match &task.error_message {
            Some(msg) => println!("  {:<10} {} [{}]: {}", task.state, task.label, task.line, msg),
            None => println!("  {:<10} {} [{}]", task.state, task.label, task.line),
        }
    }
    println!(
        "  {} succeeded, {} failed, {} canceled, {} obsolete",
        report.count(TaskState::Succeeded),
        report.count(TaskState::Failed),
        report.count(TaskState::Canceled),
        report.count(TaskState::Obsolete),
    );
}

/// Simple dry-run output: print lines, then tasks level by level.
fn print_dry_run(cfg: &ConfigFile) -> Result<()> {
    println!("taskline dry-run");
    println!("  config.cancel_on_failure = {}", cfg.config.cancel_on_failure);
    if let Some(ref s) = cfg.config.progress_on_stdout {
        println!("  config.progress_on_stdout = {s}");
    }
    println!();

    println!("lines ({}):", cfg.line.len());
    for (tag, line) in cfg.line.iter() {
        println!("  - {tag}: {} worker(s), priority {}", line.workers, line.priority);
    }
    println!();

    let tasks = build_tasks(cfg)?;
    let graph = TaskGraph::from_tasks(&tasks);
    let levels = graph.levels();

    println!("tasks ({}), {} level(s):", tasks.len(), levels.len());
    for (depth, level) in levels.iter().enumerate() {
        println!("  level {depth}:");
        for id in level {
            let Some(name) = graph.label_of(*id) else {
                continue;
            };
            let Some(task) = cfg.task.get(name) else {
                continue;
            };
            println!("    - {name} [{}]", task.line);
            println!("        cmd: {}", task.cmd);
            if !task.after.is_empty() {
                println!("        after: {:?}", task.after);
            }
            if let Some(pattern) = cfg.progress_pattern(name) {
                println!("        progress_on_stdout: {pattern}");
            }
        }
    }

    debug!("dry-run complete (no execution)");
    Ok(())
}
