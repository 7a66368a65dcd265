//! ---
//! pp_section: "01-core-functionality"
//! pp_subsection: "module"
//! pp_type: "source"
//! pp_scope: "code"
//! pp_description: "Shared primitives and utilities for the core runtime."
//! pp_version: "v0.0.0-prealpha"
//! pp_owner: "tbd"
//! ---
use std::env;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use procpair_common::config::AppConfig;
use procpair_common::LogFormat;

// Loader tests read PROCPAIR_CONFIG, so they must not overlap with the test that sets it.
static ENV_LOCK: Mutex<()> = Mutex::new(());

fn env_lock() -> std::sync::MutexGuard<'static, ()> {
    ENV_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[test]
fn falls_back_to_defaults_without_candidates() {
    let _guard = env_lock();
    let dir = tempfile::tempdir().expect("temp dir");
    let missing = dir.path().join("absent.toml");
    let loaded = AppConfig::load_with_source(&[missing]).expect("defaults");
    assert!(loaded.source.is_none());
    assert_eq!(loaded.config.pair.failure_timeout, Duration::from_millis(150));
}

#[test]
fn first_existing_candidate_wins() {
    let _guard = env_lock();
    let dir = tempfile::tempdir().expect("temp dir");
    let first = dir.path().join("first.toml");
    let second = dir.path().join("second.toml");
    std::fs::write(
        &second,
        r#"
        [pair]
        heartbeat_interval_ms = 25
        failure_timeout_ms = 400

        [logging]
        format = "pretty"
        file_enabled = false
        "#,
    )
    .expect("write config");

    let candidates: Vec<PathBuf> = vec![first, second.clone()];
    let loaded = AppConfig::load_with_source(&candidates).expect("load");
    assert_eq!(loaded.source.as_deref(), Some(second.as_path()));
    assert_eq!(loaded.config.pair.heartbeat_interval, Duration::from_millis(25));
    assert_eq!(loaded.config.logging.format, LogFormat::Pretty);
    assert!(!loaded.config.logging.file_enabled);
}

#[test]
fn invalid_candidate_is_fatal() {
    let _guard = env_lock();
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("broken.toml");
    std::fs::write(&path, "[pair]\nreplication_buffer = 0\n").expect("write config");
    let err = AppConfig::load_with_source(&[path]).unwrap_err();
    assert!(err.to_string().contains("replication_buffer"));
}

#[test]
fn explicit_missing_path_is_an_error() {
    let dir = tempfile::tempdir().expect("temp dir");
    let err = AppConfig::from_path(&dir.path().join("nope.toml")).unwrap_err();
    assert!(err.to_string().contains("unable to read config file"));
}

#[test]
fn environment_override_beats_candidates() {
    let _guard = env_lock();
    let dir = tempfile::tempdir().expect("temp dir");
    let candidate = dir.path().join("candidate.toml");
    let from_env = dir.path().join("from_env.toml");
    std::fs::write(&candidate, "[pair]\nheartbeat_interval_ms = 20\n").expect("write candidate");
    std::fs::write(
        &from_env,
        "[pair]\nheartbeat_interval_ms = 30\nfailure_timeout_ms = 450\n",
    )
    .expect("write env config");

    env::set_var(AppConfig::ENV_CONFIG_PATH, &from_env);
    let loaded = AppConfig::load_with_source(&[candidate.clone()]);

    env::set_var(AppConfig::ENV_CONFIG_PATH, dir.path().join("missing.toml"));
    let missing = AppConfig::load_with_source(&[candidate]);
    env::remove_var(AppConfig::ENV_CONFIG_PATH);

    let loaded = loaded.expect("env config loads");
    assert_eq!(loaded.source.as_deref(), Some(from_env.as_path()));
    assert_eq!(loaded.config.pair.heartbeat_interval, Duration::from_millis(30));
    let err = missing.expect_err("missing env config is fatal");
    assert!(err.to_string().contains("unable to read config file"));
}
