//! A scriptable work unit for exercising worker threads, working lines and
//! the task manager without spawning processes.
//!
//! By default every task runs a few short steps, reporting progress, then
//! moves itself to `CleaningUp` and succeeds. Individual task labels can be
//! scripted to fail, panic, block until canceled, or block on a gate.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use parking_lot::Mutex;
use tracing::debug;

use taskline::dag::{Task, TaskState};
use taskline::exec::{Worker, WorkerFactory};
use taskline::sync::{CancellationSignal, Signal};

/// What the test worker does with a task.
#[derive(Clone)]
pub enum Behaviour {
    /// Run the configured steps, then succeed.
    Succeed,
    /// Return an error with this message.
    Fail(String),
    /// Panic with this message.
    Panic(String),
    /// Poll until the cancellation signal fires, then return.
    UntilCanceled,
    /// Block until the gate is set (or the run is canceled), then succeed.
    Gate(Arc<Signal>),
}

/// One executed work unit.
#[derive(Debug, Clone)]
pub struct Execution {
    pub label: String,
    pub thread: String,
    pub begin: Instant,
    pub end: Instant,
}

struct Shared {
    steps: u32,
    step_delay: Duration,
    scripts: Mutex<HashMap<String, Behaviour>>,
    executions: Mutex<Vec<Execution>>,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl Shared {
    fn behaviour(&self, label: &str) -> Behaviour {
        self.scripts
            .lock()
            .get(label)
            .cloned()
            .unwrap_or(Behaviour::Succeed)
    }
}

/// Hands out [`TestWorker`]s sharing one script and one execution log.
/// Clones share state.
#[derive(Clone)]
pub struct TestWorkerFactory {
    shared: Arc<Shared>,
}

impl Default for TestWorkerFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl TestWorkerFactory {
    /// Ten steps of one millisecond each.
    pub fn new() -> Self {
        Self::with_steps(10, Duration::from_millis(1))
    }

    pub fn with_steps(steps: u32, step_delay: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                steps,
                step_delay,
                scripts: Mutex::new(HashMap::new()),
                executions: Mutex::new(Vec::new()),
                running: AtomicUsize::new(0),
                max_running: AtomicUsize::new(0),
            }),
        }
    }

    /// Script the behaviour for tasks labelled `label`.
    pub fn script(&self, label: &str, behaviour: Behaviour) -> &Self {
        self.shared
            .scripts
            .lock()
            .insert(label.to_string(), behaviour);
        self
    }

    pub fn fail(&self, label: &str, message: &str) -> &Self {
        self.script(label, Behaviour::Fail(message.to_string()))
    }

    pub fn panic(&self, label: &str, message: &str) -> &Self {
        self.script(label, Behaviour::Panic(message.to_string()))
    }

    pub fn until_canceled(&self, label: &str) -> &Self {
        self.script(label, Behaviour::UntilCanceled)
    }

    /// Block `label` until the returned gate is set.
    pub fn gate(&self, label: &str) -> Arc<Signal> {
        let gate = Arc::new(Signal::manual(false));
        self.script(label, Behaviour::Gate(Arc::clone(&gate)));
        gate
    }

    /// Shared handle usable as a line's factory.
    pub fn as_factory(&self) -> Arc<dyn WorkerFactory> {
        Arc::new(self.clone())
    }

    /// Finished work units, in completion order.
    pub fn executions(&self) -> Vec<Execution> {
        self.shared.executions.lock().clone()
    }

    pub fn executed_labels(&self) -> Vec<String> {
        self.executions().into_iter().map(|e| e.label).collect()
    }

    pub fn execution_count(&self, label: &str) -> usize {
        self.shared
            .executions
            .lock()
            .iter()
            .filter(|e| e.label == label)
            .count()
    }

    /// Work units currently inside `process`.
    pub fn running(&self) -> usize {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Highest number of work units ever inside `process` at once.
    pub fn max_running(&self) -> usize {
        self.shared.max_running.load(Ordering::SeqCst)
    }
}

impl WorkerFactory for TestWorkerFactory {
    fn create(&self) -> Box<dyn Worker> {
        Box::new(TestWorker {
            shared: Arc::clone(&self.shared),
        })
    }
}

pub struct TestWorker {
    shared: Arc<Shared>,
}

/// Records the execution even when the work unit panics.
struct RunningGuard<'a> {
    shared: &'a Shared,
    label: String,
    begin: Instant,
}

impl<'a> RunningGuard<'a> {
    fn enter(shared: &'a Shared, label: &str) -> Self {
        let now = shared.running.fetch_add(1, Ordering::SeqCst) + 1;
        shared.max_running.fetch_max(now, Ordering::SeqCst);
        Self {
            shared,
            label: label.to_string(),
            begin: Instant::now(),
        }
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.shared.executions.lock().push(Execution {
            label: std::mem::take(&mut self.label),
            thread: thread::current().name().unwrap_or("unnamed").to_string(),
            begin: self.begin,
            end: Instant::now(),
        });
        self.shared.running.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Worker for TestWorker {
    fn process(&mut self, task: &Arc<Task>, cancel: &CancellationSignal) -> anyhow::Result<()> {
        let shared = Arc::clone(&self.shared);
        let _guard = RunningGuard::enter(&shared, task.label());
        task.update_progress("starting", 0.0);

        match shared.behaviour(task.label()) {
            Behaviour::Succeed => {
                for i in 0..shared.steps {
                    if cancel.is_canceled() {
                        debug!(task = %task.label(), "test worker canceled");
                        break;
                    }
                    task.update_progress(i.to_string(), i as f32 / shared.steps as f32);
                    thread::sleep(shared.step_delay);
                }
            }
            Behaviour::Fail(message) => return Err(anyhow!(message)),
            Behaviour::Panic(message) => panic!("{message}"),
            Behaviour::UntilCanceled => {
                while !cancel.is_canceled() {
                    thread::sleep(Duration::from_millis(1));
                }
            }
            Behaviour::Gate(gate) => {
                while !gate.wait(Some(Duration::from_millis(1))) && !cancel.is_canceled() {}
            }
        }

        task.update_progress("finished", 1.0);
        task.update_state(TaskState::CleaningUp)?;
        Ok(())
    }
}
