// tests/config_error_handling.rs

mod common;
use crate::common::builders::{ConfigFileBuilder, TaskConfigBuilder};

use std::io::Write;

use tempfile::NamedTempFile;

use taskline::config::{ConfigFile, build_manager, build_tasks, load_and_validate};
use taskline::dag::TaskState;
use taskline::errors::TasklineError;
use taskline::exec::CommandSpec;
use taskline::types::ThreadPriority;

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{contents}").unwrap();
    file
}

fn expect_config_error(contents: &str) -> String {
    let file = write_config(contents);
    match load_and_validate(file.path()) {
        Err(TasklineError::ConfigError(msg)) => msg,
        Err(e) => panic!("Expected ConfigError, got: {:?}", e),
        Ok(_) => panic!("Expected error, got Ok"),
    }
}

#[test]
fn test_dag_cycle_returns_structured_error() {
    let file = write_config(
        r#"
[line.main]
workers = 1

[task.A]
cmd = "echo A"
line = "main"
after = ["B"]

[task.B]
cmd = "echo B"
line = "main"
after = ["A"]
"#,
    );

    match load_and_validate(file.path()) {
        Err(TasklineError::DagCycle(msg)) => {
            assert!(msg.contains("cycle detected"));
            assert!(msg.contains("A") || msg.contains("B"));
        }
        Err(e) => panic!("Expected DagCycle error, got: {:?}", e),
        Ok(_) => panic!("Expected error, got Ok"),
    }
}

#[test]
fn test_unknown_dependency_returns_config_error() {
    let msg = expect_config_error(
        r#"
[line.main]

[task.A]
cmd = "echo A"
line = "main"
after = ["NonExistent"]
"#,
    );
    assert!(msg.contains("unknown dependency"));
    assert!(msg.contains("NonExistent"));
}

#[test]
fn test_self_dependency_returns_config_error() {
    let msg = expect_config_error(
        r#"
[line.main]

[task.A]
cmd = "echo A"
line = "main"
after = ["A"]
"#,
    );
    assert!(msg.contains("cannot depend on itself"));
}

#[test]
fn test_unknown_line_returns_config_error() {
    let msg = expect_config_error(
        r#"
[line.main]

[task.A]
cmd = "echo A"
line = "gpu"
"#,
    );
    assert!(msg.contains("unknown line"));
    assert!(msg.contains("gpu"));
}

#[test]
fn test_config_without_tasks_is_rejected() {
    let msg = expect_config_error(
        r#"
[line.main]
workers = 2
"#,
    );
    assert!(msg.contains("[task.<name>]"));
}

#[test]
fn test_config_without_lines_is_rejected() {
    let msg = expect_config_error(
        r#"
[task.A]
cmd = "echo A"
line = "main"
"#,
    );
    assert!(msg.contains("[line.<tag>]"));
}

#[test]
fn test_worker_count_out_of_range_is_rejected() {
    for workers in [0usize, 1025] {
        let raw = ConfigFileBuilder::new()
            .with_line("main", workers)
            .with_task("A", TaskConfigBuilder::new("echo A", "main").build())
            .build_raw();
        match ConfigFile::try_from(raw) {
            Err(TasklineError::ConfigError(msg)) => {
                assert!(msg.contains("[line.main].workers"), "{msg}");
                assert!(msg.contains(&workers.to_string()));
            }
            other => panic!("Expected ConfigError for {workers} workers, got: {:?}", other),
        }
    }
}

#[test]
fn test_invalid_progress_regex_is_rejected() {
    let raw = ConfigFileBuilder::new()
        .with_line("main", 1)
        .with_task(
            "A",
            TaskConfigBuilder::new("echo A", "main")
                .progress_on_stdout("([0-9]+")
                .build(),
        )
        .build_raw();

    match ConfigFile::try_from(raw) {
        Err(TasklineError::ConfigError(msg)) => {
            assert!(msg.contains("[task.A].progress_on_stdout"));
            assert!(msg.contains("invalid regex"));
        }
        other => panic!("Expected ConfigError, got: {:?}", other),
    }

    let raw = ConfigFileBuilder::new()
        .with_line("main", 1)
        .with_task("A", TaskConfigBuilder::new("echo A", "main").build())
        .progress_on_stdout("[")
        .build_raw();
    assert!(matches!(
        ConfigFile::try_from(raw),
        Err(TasklineError::ConfigError(msg)) if msg.contains("[config].progress_on_stdout")
    ));
}

#[test]
fn test_malformed_toml_returns_toml_error() {
    let file = write_config("[task.A\ncmd = ");
    match load_and_validate(file.path()) {
        Err(TasklineError::TomlError(_)) => {}
        Err(e) => panic!("Expected TomlError, got: {:?}", e),
        Ok(_) => panic!("Expected error, got Ok"),
    }
}

#[test]
fn test_missing_file_returns_io_error() {
    let dir = tempfile::tempdir().unwrap();
    match load_and_validate(dir.path().join("Missing.toml")) {
        Err(TasklineError::IoError(_)) => {}
        Err(e) => panic!("Expected IoError, got: {:?}", e),
        Ok(_) => panic!("Expected error, got Ok"),
    }
}

#[test]
fn test_valid_config_loads_with_defaults_and_priorities() {
    let file = write_config(
        r#"
[config]
cancel_on_failure = true
progress_on_stdout = "([0-9]+)%"

[line.fetch]

[line.build]
workers = 4
priority = "above_normal"

[task.fetch]
cmd = "git fetch"
line = "fetch"

[task.compile]
cmd = "make"
line = "build"
after = ["fetch"]
progress_on_stdout = "\\[([0-9]+)/100\\]"
"#,
    );

    let cfg = load_and_validate(file.path()).unwrap();
    assert!(cfg.config.cancel_on_failure);

    let fetch_line = &cfg.line["fetch"];
    assert_eq!(fetch_line.workers, 1);
    assert_eq!(fetch_line.priority, ThreadPriority::Normal);
    let build_line = &cfg.line["build"];
    assert_eq!(build_line.workers, 4);
    assert_eq!(build_line.priority, ThreadPriority::AboveNormal);

    assert_eq!(cfg.progress_pattern("fetch"), Some("([0-9]+)%"));
    assert_eq!(cfg.progress_pattern("compile"), Some("\\[([0-9]+)/100\\]"));
}

#[test]
fn test_unknown_priority_is_a_toml_error() {
    let file = write_config(
        r#"
[line.main]
priority = "realtime"

[task.A]
cmd = "echo A"
line = "main"
"#,
    );
    assert!(matches!(
        load_and_validate(file.path()),
        Err(TasklineError::TomlError(_))
    ));
}

#[test]
fn test_priority_parses_from_cli_spelling() {
    assert_eq!("Above-Normal".parse::<ThreadPriority>(), Ok(ThreadPriority::AboveNormal));
    assert_eq!("lowest".parse::<ThreadPriority>(), Ok(ThreadPriority::Lowest));
    assert!("turbo".parse::<ThreadPriority>().is_err());
    assert_eq!(ThreadPriority::BelowNormal.to_string(), "below_normal");
}

#[test]
fn test_build_tasks_orders_dependencies_first_and_attaches_commands() {
    let cfg = ConfigFileBuilder::new()
        .with_line("main", 2)
        .with_task(
            "a_link",
            TaskConfigBuilder::new("ld", "main")
                .after("b_compile")
                .after("c_assets")
                .build(),
        )
        .with_task(
            "b_compile",
            TaskConfigBuilder::new("cc", "main").after("c_assets").build(),
        )
        .with_task(
            "c_assets",
            TaskConfigBuilder::new("cp", "main")
                .progress_on_stdout("([0-9]+)%")
                .build(),
        )
        .build();

    let tasks = build_tasks(&cfg).unwrap();
    let labels: Vec<&str> = tasks.iter().map(|t| t.label()).collect();
    assert_eq!(labels, vec!["c_assets", "b_compile", "a_link"]);

    let link = &tasks[2];
    let deps: Vec<&str> = link.dependencies().iter().map(|d| d.label()).collect();
    assert_eq!(deps, vec!["b_compile", "c_assets"]);
    assert!(tasks.iter().all(|t| t.state() == TaskState::Waiting));

    let assets = tasks[0].payload::<CommandSpec>().unwrap();
    assert_eq!(assets.cmd, "cp");
    assert!(assets.progress.is_some());
    let compile = tasks[1].payload::<CommandSpec>().unwrap();
    assert_eq!(compile.cmd, "cc");
    assert!(compile.progress.is_none());
}

#[test]
fn test_build_manager_registers_lines_and_tasks() {
    let cfg = ConfigFileBuilder::new()
        .with_line("fetch", 1)
        .with_line_priority("build", 3, ThreadPriority::Highest)
        .with_task("get", TaskConfigBuilder::new("true", "fetch").build())
        .with_task("make", TaskConfigBuilder::new("true", "build").after("get").build())
        .cancel_on_failure(true)
        .build();

    let manager = build_manager(&cfg).unwrap();
    assert_eq!(manager.task_count(), 2);
    assert_eq!(manager.working_line_tags(), vec!["build", "fetch"]);
    assert_eq!(manager.with_working_line("build", |l| l.worker_count()), Some(3));
    assert_eq!(
        manager.with_working_line("build", |l| l.priority()),
        Some(ThreadPriority::Highest)
    );
    assert!(!manager.is_running());
}
