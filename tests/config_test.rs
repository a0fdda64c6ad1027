//! Configuration loading and validation, and the settings built from it.

use dualview_daq::config::AppConfig;
use dualview_daq::hardware::View;
use dualview_daq::settings::MeasurementSettings;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

fn shipped_config() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config/dualview.toml")
}

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_shipped_config_is_valid() {
    let config = AppConfig::load_from(shipped_config()).unwrap();
    config.validate().unwrap();

    assert_eq!(config.application.name, "plant_app");
    let expected = if cfg!(feature = "storage_hdf5") { "hdf5" } else { "memory" };
    assert_eq!(config.storage.backend, expected);
    assert_eq!(config.acquisition.camera_in_use, View::Y);
    assert_eq!(config.acquisition.led_init_time, 0.5);
    assert_eq!(config.hardware.camera_x.base_value, 2000);
    assert!(config.hardware.led_x.enabled);
}

#[test]
fn test_sample_with_separator_rejected() {
    let file = write_config(
        r#"
[storage]
sample = "tray/3"
"#,
    );
    let config = AppConfig::load_from(file.path()).unwrap();
    let err = config.validate().unwrap_err();
    assert!(err.contains("storage.sample"), "{err}");
}

#[test]
fn test_empty_measurement_name_rejected() {
    let mut config = AppConfig::default();
    config.storage.measurement_name = String::new();
    let err = config.validate().unwrap_err();
    assert!(err.contains("storage.measurement_name"), "{err}");
}

#[test]
fn test_zero_sampling_rejected() {
    let mut config = AppConfig::default();
    config.acquisition.ysampling = 0.0;
    let err = config.validate().unwrap_err();
    assert!(err.contains("ysampling"), "{err}");
}

#[test]
fn test_disabled_camera_geometry_ignored() {
    let mut config = AppConfig::default();
    config.hardware.camera_x.width = 0;
    assert!(config.validate().is_err());

    config.hardware.camera_x.enabled = false;
    assert!(config.validate().is_ok());
}

#[test]
fn test_unknown_view_fails_to_load() {
    let file = write_config(
        r#"
[acquisition]
camera_in_use = "Z"
"#,
    );
    assert!(AppConfig::load_from(file.path()).is_err());
}

#[test]
fn test_settings_from_config() {
    let file = write_config(
        r#"
[application]
name = "root_app"

[storage]
save_dir = "/tmp/timelapse"
sample = "leaf3"

[acquisition]
camera_in_use = "X"
time_lapse_num = 12
time_lapse_waiting_time = 300.0
LED_init_time = 1.5
frame_num = 4
xsampling = 0.1
ysampling = 0.2
zsampling = 2.5
save_h5 = true

[display]
auto_levels = false
level_min = 100
level_max = 900
"#,
    );
    let config = AppConfig::load_from(file.path()).unwrap();
    config.validate().unwrap();

    let settings = MeasurementSettings::from_config(&config);
    assert_eq!(settings.camera_in_use.get(), View::X);
    assert!(!settings.auto_levels.get());
    assert_eq!(settings.level_min.get(), 100);
    assert_eq!(settings.led_init_time.name(), "LED_init_time");

    let snapshot = settings.snapshot();
    assert_eq!(snapshot.application, "root_app");
    assert_eq!(snapshot.cycles, 12);
    assert_eq!(snapshot.frames_per_cycle, 4);
    assert_eq!(snapshot.cycle_interval, Duration::from_secs(300));
    assert_eq!(snapshot.led_warmup, Duration::from_millis(1500));
    assert_eq!(snapshot.preview_view, View::X);
    assert!(snapshot.save);
    assert_eq!(snapshot.pixel_size.as_array(), [2.5, 0.2, 0.1]);
    assert_eq!(snapshot.sample, "leaf3");
    assert_eq!(snapshot.save_dir, PathBuf::from("/tmp/timelapse"));
}
