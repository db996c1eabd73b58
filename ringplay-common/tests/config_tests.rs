//! Configuration resolution tests
//!
//! Uses serial_test because several tests manipulate RINGPLAY_CONFIG.

use ringplay_common::config::{ConfigResolver, TomlConfig, CONFIG_ENV_VAR};
use ringplay_common::Error;
use serial_test::serial;
use std::env;
use std::fs;

#[test]
#[serial]
fn test_explicit_file_wins() {
    env::remove_var(CONFIG_ENV_VAR);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("player.toml");
    fs::write(
        &path,
        r#"
        [logging]
        level = "debug"

        [playback]
        ring_capacity_frames = 8192
        use_effects = true

        [output]
        device = "Headphones"
        buffer_frames = 256
        "#,
    )
    .unwrap();

    let config = ConfigResolver::new("ringplay-test")
        .with_explicit(Some(path))
        .resolve()
        .unwrap();

    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.playback.ring_capacity_frames, 8192);
    assert!(config.playback.use_effects);
    assert_eq!(config.device_name(), Some("Headphones"));
    assert_eq!(config.output.buffer_frames, Some(256));
}

#[test]
#[serial]
fn test_missing_explicit_file_is_error() {
    env::remove_var(CONFIG_ENV_VAR);
    let dir = tempfile::tempdir().unwrap();

    let result = ConfigResolver::new("ringplay-test")
        .with_explicit(Some(dir.path().join("absent.toml")))
        .resolve();

    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
#[serial]
fn test_env_var_file_used_when_no_explicit() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("env.toml");
    fs::write(&path, "[playback]\nrefill_period_ms = 20\n").unwrap();
    env::set_var(CONFIG_ENV_VAR, &path);

    let config = ConfigResolver::new("ringplay-test").resolve().unwrap();
    assert_eq!(config.playback.refill_period_ms, 20);

    env::remove_var(CONFIG_ENV_VAR);
}

#[test]
#[serial]
fn test_no_file_falls_back_to_defaults() {
    env::remove_var(CONFIG_ENV_VAR);

    // An application name nobody has a config directory for
    let config = ConfigResolver::new("ringplay-test-nonexistent-app")
        .resolve()
        .unwrap();

    assert_eq!(config, TomlConfig::default());
}

#[test]
#[serial]
fn test_malformed_file_is_reported_with_path() {
    env::remove_var(CONFIG_ENV_VAR);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.toml");
    fs::write(&path, "[playback]\nring_capacity_frames = \"lots\"\n").unwrap();

    let err = ConfigResolver::new("ringplay-test")
        .with_explicit(Some(path.clone()))
        .resolve()
        .unwrap_err();

    match err {
        Error::Config(message) => assert!(message.contains("broken.toml")),
        other => panic!("expected config error, got {:?}", other),
    }
}
