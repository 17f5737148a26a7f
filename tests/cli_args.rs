use std::path::PathBuf;

use clap::Parser;

use taskline::cli::CliArgs;
use taskline::config::default_config_path;

#[test]
fn config_defaults_to_the_loader_path() {
    let args = CliArgs::try_parse_from(["taskline"]).unwrap();
    assert_eq!(args.config, default_config_path());
    assert_eq!(args.config, PathBuf::from("Taskline.toml"));
    assert!(!args.dry_run);
    assert!(args.log_level.is_none());
}

#[test]
fn config_flag_overrides_the_default() {
    let args = CliArgs::try_parse_from(["taskline", "--config", "ci/Build.toml", "--dry-run"]).unwrap();
    assert_eq!(args.config, PathBuf::from("ci/Build.toml"));
    assert!(args.dry_run);
}
