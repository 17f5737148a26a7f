// tests/command_worker.rs
#![cfg(unix)]

mod common;
use crate::common::{Recorder, TIMEOUT, init_tracing, wait_until};

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use regex::Regex;

use taskline::dag::{Task, TaskEvent, TaskState};
use taskline::errors::CommandFailed;
use taskline::exec::command::parse_percent;
use taskline::exec::{CommandSpec, CommandWorker, Worker, WorkerThread};
use taskline::sync::{BlockingQueue, CancellationSignal};

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn command_task(label: &str, spec: CommandSpec) -> Arc<Task> {
    Task::builder(label, "shell").payload(spec).build()
}

fn run(task: &Arc<Task>) -> anyhow::Result<()> {
    task.update_state(TaskState::InProgress)?;
    let mut worker = CommandWorker::with_poll_interval(Duration::from_millis(5));
    worker.process(task, &CancellationSignal::new())
}

fn progress_messages(recorder: &Recorder<TaskEvent>) -> Vec<String> {
    recorder
        .events()
        .into_iter()
        .filter_map(|e| match e {
            TaskEvent::ProgressMessageChanged { new, .. } => new,
            _ => None,
        })
        .collect()
}

#[test]
fn successful_command_reports_finished() -> TestResult {
    init_tracing();
    let task = command_task("ok", CommandSpec::new("true"));
    run(&task)?;
    assert_eq!(task.progress(), 1.0);
    assert_eq!(task.progress_message().as_deref(), Some("finished"));
    Ok(())
}

#[test]
fn failing_command_returns_exit_code() {
    let task = command_task("bad", CommandSpec::new("exit 3"));
    let err = run(&task).unwrap_err();
    let failed = err.downcast_ref::<CommandFailed>().expect("CommandFailed");
    assert_eq!(failed.code, 3);
    assert_eq!(failed.task, "bad");
    assert!(err.to_string().contains("exit code 3"));
}

#[test]
fn task_without_command_is_an_error() {
    let task = Task::new("bare", "shell");
    let err = run(&task).unwrap_err();
    assert!(err.to_string().contains("no command attached"));
}

#[test]
fn every_stdout_line_becomes_the_progress_message() -> TestResult {
    let spec = CommandSpec::new("printf 'fetching\\nprogress 40%%\\nprogress 75%%\\nlinking\\n'")
        .with_progress(Regex::new(r"progress (\d+)%")?);
    let task = command_task("steps", spec);
    let events = Recorder::<TaskEvent>::new();
    task.subscribe(events.handler());

    let values = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = Arc::clone(&values);
    task.subscribe(move |event| {
        if let TaskEvent::ProgressChanged { new, .. } = event {
            sink.lock().push(*new);
        }
    });

    run(&task)?;

    assert_eq!(
        progress_messages(&events),
        vec!["starting", "fetching", "progress 40%", "progress 75%", "linking", "finished"]
    );
    let values = values.lock().clone();
    assert!(values.contains(&0.4));
    assert!(values.contains(&0.75));
    assert_eq!(values.last(), Some(&1.0));
    Ok(())
}

#[test]
fn parse_percent_reads_the_first_capture_group() -> TestResult {
    let re = Regex::new(r"\[(\s*\d+(?:\.\d+)?)%\]")?;
    assert_eq!(parse_percent(&re, "[ 12.5%] building"), Some(12.5));
    assert_eq!(parse_percent(&re, "[100%] done"), Some(100.0));
    assert_eq!(parse_percent(&re, "no progress here"), None);

    let no_group = Regex::new(r"\d+%")?;
    assert_eq!(parse_percent(&no_group, "50%"), None);
    Ok(())
}

#[test]
fn cancellation_kills_the_running_process() -> TestResult {
    init_tracing();
    let queue = Arc::new(BlockingQueue::new());
    let worker = WorkerThread::new(
        "worker-shell-0000",
        Arc::clone(&queue),
        Box::new(CommandWorker::with_poll_interval(Duration::from_millis(5))),
    );

    let task = command_task("sleeper", CommandSpec::new("exec sleep 30"));
    worker.start()?;
    queue.enqueue(Arc::clone(&task));
    assert!(wait_until(TIMEOUT, || task.state() == TaskState::InProgress));
    // Give the shell time to exec.
    thread::sleep(Duration::from_millis(50));

    let canceled_at = Instant::now();
    worker.cancel();
    assert!(worker.wait_for_death(Some(TIMEOUT)));
    assert!(canceled_at.elapsed() < Duration::from_secs(10));
    assert_eq!(task.state(), TaskState::Canceled);
    worker.dispose();
    Ok(())
}

#[test]
fn pre_canceled_signal_moves_the_task_to_cleaning_up() -> TestResult {
    let task = command_task("short", CommandSpec::new("exec sleep 30"));
    task.update_state(TaskState::InProgress)?;
    let cancel = CancellationSignal::new();
    cancel.cancel();

    let started = Instant::now();
    let mut worker = CommandWorker::with_poll_interval(Duration::from_millis(5));
    worker.process(&task, &cancel)?;
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(task.state(), TaskState::CleaningUp);
    Ok(())
}

#[test]
fn failing_command_fails_the_task_on_a_worker_thread() -> TestResult {
    let queue = Arc::new(BlockingQueue::new());
    let worker = WorkerThread::new(
        "worker-shell-0001",
        Arc::clone(&queue),
        Box::new(CommandWorker::new()),
    );

    let task = command_task("broken", CommandSpec::new("echo oops >&2; exit 7"));
    worker.start()?;
    queue.enqueue(Arc::clone(&task));
    assert!(wait_until(TIMEOUT, || task.state().is_terminal()));

    assert_eq!(task.state(), TaskState::Failed);
    let error = task.error().ok_or("missing error")?;
    let failed = error
        .downcast_ref::<CommandFailed>()
        .ok_or("error is not CommandFailed")?;
    assert_eq!(failed.code, 7);
    worker.dispose();
    Ok(())
}
