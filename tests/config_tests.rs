// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for configuration module

use camera_mux::Config;
use camera_mux::backends::camera::{CameraBackendType, FocusMode, FrameSize};
use camera_mux::config::ConfigError;
use camera_mux::constants;
use std::time::Duration;

#[test]
fn test_config_default() {
    let config = Config::default();

    // Check sensible defaults
    assert_eq!(config.backend, CameraBackendType::Virtual);
    assert_eq!(
        config.preview_size,
        FrameSize::new(constants::DEFAULT_PREVIEW_WIDTH, constants::DEFAULT_PREVIEW_HEIGHT)
    );
    assert_eq!(config.focus, FocusMode::Continuous);
    assert!(!config.guard.state_check, "Guards should be off by default");
    assert!(!config.guard.reference_count);
    assert!(config.validate().is_ok());
}

#[test]
fn test_settings_follow_constants() {
    let config = Config::default();

    let render = config.render_settings();
    assert_eq!(render.frame_wait_timeout, constants::render::FRAME_WAIT_TIMEOUT);
    assert_eq!(render.pause_poll_interval, constants::render::PAUSE_POLL_INTERVAL);
    assert_eq!(render.join_timeout, constants::render::JOIN_TIMEOUT);

    let serializer = config.serializer_settings();
    assert_eq!(serializer.capacity, constants::serializer::QUEUE_CAPACITY);
    assert_eq!(serializer.quit_timeout, constants::serializer::QUIT_TIMEOUT);
}

#[test]
fn test_missing_file_gives_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::load(Some(&dir.path().join("absent.json"))).unwrap();
    assert_eq!(config, Config::default());
}

#[test]
fn test_partial_file_keeps_other_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(
        &path,
        r#"{
            "backend": "V4l2",
            "guard": { "reference_count": true },
            "render": { "join_timeout_ms": 250 },
            "filter": { "queue_capacity": 8 }
        }"#,
    )
    .unwrap();

    let config = Config::load(Some(&path)).unwrap();
    assert_eq!(config.backend, CameraBackendType::V4l2);
    assert!(config.guard.reference_count);
    assert!(!config.guard.state_check);
    assert_eq!(config.render_settings().join_timeout, Duration::from_millis(250));
    assert_eq!(config.render_settings().frame_wait_timeout, constants::render::FRAME_WAIT_TIMEOUT);
    assert_eq!(config.serializer_settings().capacity, 8);
    assert_eq!(config.focus, FocusMode::Continuous);
}

#[test]
fn test_save_then_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("config.json");
    let mut config = Config::default();
    config.focus = FocusMode::Infinity;
    config.preview_size = FrameSize::new(640, 480);
    config.guard.state_check = true;

    config.save(&path).unwrap();
    assert_eq!(Config::load(Some(&path)).unwrap(), config);
}

#[test]
fn test_malformed_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, "{ not json").unwrap();

    assert!(matches!(Config::load(Some(&path)), Err(ConfigError::Parse { .. })));
}

#[test]
fn test_invalid_values_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, r#"{ "filter": { "queue_capacity": 0 } }"#).unwrap();

    let err = Config::load(Some(&path)).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)));
    assert!(err.to_string().contains("queue capacity"));
}

#[test]
fn test_zero_wait_intervals_rejected() {
    let mut config = Config::default();
    config.filter.wait_poll_ms = 0;
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("filter wait intervals"));

    let mut config = Config::default();
    config.render.join_timeout_ms = 0;
    assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

    assert_eq!(Config::default().validate(), Ok(()));
}

#[test]
fn test_default_path_location() {
    if let Some(path) = Config::default_path() {
        assert!(path.ends_with("camera-mux/config.json"));
    }
}
