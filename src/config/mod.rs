// src/config/mod.rs

//! Configuration loading and validation for taskline.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate references, worker counts, regexes and DAG correctness
//!   (`validate.rs`).
//! - Build tasks and a task manager from a validated config (`build.rs`).

pub mod build;
pub mod loader;
pub mod model;
pub mod validate;

pub use build::{build_manager, build_tasks};
pub use loader::{default_config_path, load_and_validate, load_from_path};
pub use model::{ConfigFile, ConfigSection, LineConfig, RawConfigFile, TaskConfig};
