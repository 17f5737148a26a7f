// src/exec/command.rs

//! Work unit running a shell command per task.
//!
//! The command comes from the task's [`CommandSpec`] payload. stdout is read
//! line by line: every line becomes the task's progress message and, when a
//! progress regex is configured, its first capture group is parsed as a
//! percentage. stderr is drained and logged at debug level.
//!
//! Cancellation is polled while the child runs; a canceled task moves to
//! `CleaningUp` and its process is killed.

use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use regex::Regex;
use tracing::{debug, info, warn};

use crate::dag::{Task, TaskState};
use crate::errors::CommandFailed;
use crate::sync::CancellationSignal;

use super::worker::{Worker, WorkerFactory};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Payload of a command task.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub cmd: String,
    /// Regex applied to each stdout line; capture group 1 is a percentage.
    pub progress: Option<Regex>,
}

impl CommandSpec {
    pub fn new(cmd: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: Regex) -> Self {
        self.progress = Some(progress);
        self
    }
}

#[derive(Debug, Clone)]
pub struct CommandWorker {
    poll_interval: Duration,
}

impl CommandWorker {
    pub fn new() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }
}

impl Default for CommandWorker {
    fn default() -> Self {
        Self::new()
    }
}

impl Worker for CommandWorker {
    fn process(&mut self, task: &Arc<Task>, cancel: &CancellationSignal) -> Result<()> {
        let spec = task
            .payload::<CommandSpec>()
            .ok_or_else(|| anyhow!("task '{}' has no command attached", task.label()))?;

        info!(task = %task.label(), cmd = %spec.cmd, "starting task process");
        task.update_progress("starting", 0.0);

        let mut child = shell_command(&spec.cmd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("spawning process for task '{}'", task.label()))?;

        let stdout_reader = child
            .stdout
            .take()
            .map(|stdout| spawn_stdout_reader(Arc::clone(task), spec.progress.clone(), stdout));
        let stderr_reader = child
            .stderr
            .take()
            .map(|stderr| spawn_stderr_reader(task.label().to_string(), stderr));

        let status = wait_or_kill(&mut child, task, cancel, self.poll_interval);

        for reader in [stdout_reader, stderr_reader].into_iter().flatten() {
            if reader.join().is_err() {
                warn!(task = %task.label(), "output reader thread panicked");
            }
        }

        let status =
            status.with_context(|| format!("waiting for process of task '{}'", task.label()))?;

        if cancel.is_canceled() {
            info!(task = %task.label(), "task process stopped after cancellation");
            return Ok(());
        }

        let code = status.code().unwrap_or(-1);
        info!(task = %task.label(), exit_code = code, success = status.success(), "task process exited");

        if !status.success() {
            return Err(CommandFailed {
                task: task.label().to_string(),
                code,
            }
            .into());
        }

        task.update_progress("finished", 1.0);
        Ok(())
    }
}

impl WorkerFactory for CommandWorker {
    fn create(&self) -> Box<dyn Worker> {
        Box::new(self.clone())
    }
}

/// Build a shell command appropriate for the platform.
fn shell_command(cmd: &str) -> Command {
    if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(cmd);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(cmd);
        c
    }
}

/// Poll the child until it exits; kill it once `cancel` fires.
fn wait_or_kill(
    child: &mut Child,
    task: &Arc<Task>,
    cancel: &CancellationSignal,
    poll_interval: Duration,
) -> std::io::Result<ExitStatus> {
    let mut killed = false;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }

        if cancel.is_canceled() && !killed {
            info!(task = %task.label(), "cancellation requested; killing process");
            if task.state() == TaskState::InProgress {
                if let Err(err) = task.update_state(TaskState::CleaningUp) {
                    warn!(task = %task.label(), error = %err, "could not move canceled task to CleaningUp");
                }
            }
            if let Err(err) = child.kill() {
                warn!(task = %task.label(), error = %err, "failed to kill child process on cancellation");
            }
            killed = true;
        }

        thread::sleep(poll_interval);
    }
}

fn spawn_stdout_reader<R>(task: Arc<Task>, progress: Option<Regex>, stdout: R) -> JoinHandle<()>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut value = 0.0_f32;
        for line in BufReader::new(stdout).lines() {
            let Ok(line) = line else {
                break;
            };
            debug!(task = %task.label(), "stdout: {}", line);
            if let Some(percent) = progress.as_ref().and_then(|re| parse_percent(re, &line)) {
                value = percent / 100.0;
            }
            task.update_progress(line, value);
        }
    })
}

fn spawn_stderr_reader<R>(label: String, stderr: R) -> JoinHandle<()>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        for line in BufReader::new(stderr).lines() {
            let Ok(line) = line else {
                break;
            };
            debug!(task = %label, "stderr: {}", line);
        }
    })
}

/// Percentage captured by `re` in `line`, if any.
pub fn parse_percent(re: &Regex, line: &str) -> Option<f32> {
    let captures = re.captures(line)?;
    captures.get(1)?.as_str().trim().parse::<f32>().ok()
}
