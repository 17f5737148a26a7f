#![allow(dead_code)]

pub use taskline_test_utils::builders;
pub use taskline_test_utils::{
    init_tracing, wait_until, Behaviour, Recorder, TestWorkerFactory, TIMEOUT,
};

use std::sync::Arc;

use taskline::dag::Task;
use taskline::engine::{ManagerEvent, TaskManager, ThreadPriority};

pub type TestResult = Result<(), Box<dyn std::error::Error>>;

/// A manager with one line per `(tag, workers)` entry, all served by
/// `factory`.
pub fn manager_with_lines(
    factory: &TestWorkerFactory,
    lines: &[(&str, usize)],
) -> taskline::errors::Result<TaskManager> {
    let manager = TaskManager::with_name("test")?;
    for (tag, workers) in lines {
        manager.add_working_line(*tag, factory.as_factory(), *workers, ThreadPriority::Normal)?;
    }
    Ok(manager)
}

/// Start `manager`, wait for the run to end and for every notification to
/// be delivered.
pub fn run_to_end(manager: &TaskManager) -> TestResult {
    manager.start()?;
    assert!(manager.wait_for_end(Some(TIMEOUT)), "run did not end in time");
    assert!(
        manager.wait_for_notifications(Some(TIMEOUT)),
        "notifications were not delivered in time"
    );
    Ok(())
}

/// Labels of the tasks in `TaskBegin` events, in order.
pub fn begun(events: &[ManagerEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            ManagerEvent::TaskBegin { task, .. } => Some(task.label().to_string()),
            _ => None,
        })
        .collect()
}

/// Index of the first event matching `pred`.
pub fn position(events: &[ManagerEvent], pred: impl Fn(&ManagerEvent) -> bool) -> Option<usize> {
    events.iter().position(pred)
}

pub fn find<'a>(tasks: &'a [Arc<Task>], label: &str) -> &'a Arc<Task> {
    tasks
        .iter()
        .find(|t| t.label() == label)
        .unwrap_or_else(|| panic!("no task labelled {label}"))
}
