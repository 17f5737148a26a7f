mod common;
use crate::common::{TestResult, TestWorkerFactory, builders, manager_with_lines, run_to_end};

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use proptest::prelude::*;

use taskline::dag::{Task, TaskEvent, TaskState};

const TAGS: [&str; 3] = ["red", "green", "blue"];

// Task i may only depend on tasks 0..i, which keeps every graph acyclic.
fn dag_strategy(max_tasks: usize) -> impl Strategy<Value = Vec<Vec<usize>>> {
    (1..=max_tasks).prop_flat_map(|count| {
        proptest::collection::vec(proptest::collection::vec(any::<usize>(), 0..4), count).prop_map(
            |raw| {
                raw.into_iter()
                    .enumerate()
                    .map(|(i, picks)| {
                        if i == 0 {
                            return Vec::new();
                        }
                        let unique: BTreeSet<usize> = picks.into_iter().map(|p| p % i).collect();
                        unique.into_iter().collect()
                    })
                    .collect()
            },
        )
    })
}

/// Labels of tasks whose dependencies had not all succeeded when they
/// entered InProgress.
fn record_early_starts(tasks: &[Arc<Task>]) -> Arc<Mutex<Vec<String>>> {
    let early = Arc::new(Mutex::new(Vec::new()));
    for task in tasks {
        let sink = Arc::clone(&early);
        let weak = Arc::downgrade(task);
        task.subscribe(move |event| {
            if let TaskEvent::StateChanged {
                new: TaskState::InProgress,
                ..
            } = event
            {
                if let Some(task) = weak.upgrade() {
                    if task
                        .dependencies()
                        .iter()
                        .any(|d| d.state() != TaskState::Succeeded)
                    {
                        sink.lock().push(task.label().to_string());
                    }
                }
            }
        });
    }
    early
}

fn run_random_dag(deps: &[Vec<usize>], failing: &HashSet<usize>) -> TestResult {
    let factory = TestWorkerFactory::with_steps(2, Duration::from_micros(200));
    for index in failing {
        factory.fail(&format!("t{index}"), "scripted failure");
    }
    let manager = manager_with_lines(&factory, &[("red", 1), ("green", 2), ("blue", 3)])?;

    let tasks = builders::dag(deps, &TAGS);
    let early = record_early_starts(&tasks);
    manager.add_tasks(tasks.iter().cloned())?;

    run_to_end(&manager)?;
    assert!(!manager.is_running());
    assert!(early.lock().is_empty(), "started too early: {:?}", early.lock());

    for (i, task) in tasks.iter().enumerate() {
        let label = task.label();
        let runs = factory.execution_count(label);
        assert!(runs <= 1, "{label} ran {runs} times");

        let deps_succeeded = deps[i]
            .iter()
            .all(|d| tasks[*d].state() == TaskState::Succeeded);
        let expected = match (deps_succeeded, failing.contains(&i)) {
            (false, _) => TaskState::Obsolete,
            (true, true) => TaskState::Failed,
            (true, false) => TaskState::Succeeded,
        };
        assert_eq!(task.state(), expected, "{label} with deps {:?}", deps[i]);

        if expected == TaskState::Obsolete {
            assert_eq!(runs, 0, "obsolete task {label} was executed");
        } else {
            assert_eq!(runs, 1, "{label} was not executed");
        }
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn random_dags_run_to_a_consistent_end(
        deps in dag_strategy(12),
        failing in proptest::collection::hash_set(0..12usize, 0..3),
    ) {
        run_random_dag(&deps, &failing).unwrap();
    }
}

#[test]
fn diamond_with_failing_branch() -> TestResult {
    // t0 -> t1 -> t3, t0 -> t2 -> t3, t1 fails.
    let deps = vec![vec![], vec![0], vec![0], vec![1, 2]];
    let failing: HashSet<usize> = [1].into_iter().collect();
    run_random_dag(&deps, &failing)
}
