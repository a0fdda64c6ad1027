//! Configuration System using Figment
//!
//! Strongly-typed configuration for the rig and the time-lapse measurement.
//! Configuration is loaded from:
//! 1. a TOML file (default `config/dualview.toml`, optional)
//! 2. Environment variables prefixed with `DUALVIEW_DAQ_`, nested keys split
//!    on `__` (e.g. `DUALVIEW_DAQ_ACQUISITION__TIME_LAPSE_NUM=10`)
//!
//! Every section has defaults matching the measurement's initial settings,
//! so an empty file is a valid configuration.
//!
//! # Example
//! ```no_run
//! use dualview_daq::config::AppConfig;
//!
//! let config = AppConfig::load()?;
//! config.validate().map_err(dualview_daq::error::DaqError::Configuration)?;
//! println!("Saving to {}", config.storage.save_dir.display());
//! # Ok::<(), dualview_daq::error::DaqError>(())
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::AppResult;
use crate::hardware::View;
use crate::validation::{
    is_file_name_component, is_in_range, is_not_empty, is_positive, is_valid_path,
};

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/dualview.toml";

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "DUALVIEW_DAQ_";

/// Upper bound for every wait setting (cadence, LED warm-up, refresh), seconds.
pub const MAX_WAIT_S: f64 = 7.0 * 24.0 * 3600.0;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Where and how frames are saved
    #[serde(default)]
    pub storage: StorageConfig,
    /// Time-lapse measurement settings
    #[serde(default)]
    pub acquisition: AcquisitionSettings,
    /// Preview display settings
    #[serde(default)]
    pub display: DisplayConfig,
    /// Simulated hardware definitions
    #[serde(default)]
    pub hardware: HardwareConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name, stored in every saved file
    #[serde(default = "default_app_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Container backend (hdf5 or memory)
    #[serde(default = "default_backend")]
    pub backend: String,
    /// Output directory for data files, created when missing
    #[serde(default = "default_save_dir")]
    pub save_dir: PathBuf,
    /// Optional sample name appended to file names
    #[serde(default)]
    pub sample: String,
    /// Measurement name used in file names and the measurement group
    #[serde(default = "default_measurement_name")]
    pub measurement_name: String,
}

/// Time-lapse measurement settings.
///
/// Field names follow the measurement's setting names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionSettings {
    /// View shown in the live preview
    #[serde(default = "default_camera_in_use")]
    pub camera_in_use: View,
    /// Number of time-lapse cycles
    #[serde(default = "default_time_lapse_num")]
    pub time_lapse_num: usize,
    /// Cadence between cycle starts, seconds
    #[serde(default = "default_time_lapse_waiting_time")]
    pub time_lapse_waiting_time: f64,
    /// LED warm-up before capture, seconds
    #[serde(default = "default_led_init_time", alias = "LED_init_time")]
    pub led_init_time: f64,
    /// Pixel size along x, micrometres
    #[serde(default = "default_lateral_sampling")]
    pub xsampling: f64,
    /// Pixel size along y, micrometres
    #[serde(default = "default_lateral_sampling")]
    pub ysampling: f64,
    /// Step along z, micrometres
    #[serde(default = "default_zsampling")]
    pub zsampling: f64,
    /// Persist frames (also triggers capture from preview)
    #[serde(default)]
    pub save_h5: bool,
    /// Display refresh period, seconds
    #[serde(default = "default_refresh_period")]
    pub refresh_period: f64,
    /// Frames per camera per cycle
    #[serde(default = "default_frame_num")]
    pub frame_num: usize,
}

/// Preview display configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayConfig {
    /// Fit the view to the image on every update
    #[serde(default = "default_true")]
    pub auto_range: bool,
    /// Derive display levels from each frame
    #[serde(default = "default_true")]
    pub auto_levels: bool,
    /// Manual lower display level
    #[serde(default = "default_level_min")]
    pub level_min: u16,
    /// Manual upper display level
    #[serde(default = "default_level_max")]
    pub level_max: u16,
}

/// Simulated hardware for each view
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HardwareConfig {
    /// Camera of view Y
    #[serde(default = "default_camera_y")]
    pub camera_y: CameraConfig,
    /// Camera of view X
    #[serde(default = "default_camera_x")]
    pub camera_x: CameraConfig,
    /// Illumination of view Y
    #[serde(default)]
    pub led_y: LedConfig,
    /// Illumination of view X
    #[serde(default)]
    pub led_x: LedConfig,
}

/// Simulated camera definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    /// Whether the camera is plugged in
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Frame width in pixels
    #[serde(default = "default_width")]
    pub width: usize,
    /// Frame height in pixels
    #[serde(default = "default_height")]
    pub height: usize,
    /// Readout time per frame, milliseconds
    #[serde(default = "default_readout_ms")]
    pub readout_ms: u64,
    /// Pixel offset of the simulated image
    #[serde(default = "default_base_value")]
    pub base_value: u16,
    /// Noise amplitude in counts
    #[serde(default)]
    pub noise: u16,
}

/// Simulated illumination definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedConfig {
    /// Whether the LED driver is plugged in
    #[serde(default = "default_true")]
    pub enabled: bool,
}

// Default value functions
fn default_app_name() -> String {
    "plant_app".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_backend() -> String {
    if cfg!(feature = "storage_hdf5") {
        "hdf5".to_string()
    } else {
        "memory".to_string()
    }
}

fn default_save_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_measurement_name() -> String {
    "PlantTimeLapseDualMeasure".to_string()
}

fn default_camera_in_use() -> View {
    View::Y
}

fn default_time_lapse_num() -> usize {
    1
}

fn default_time_lapse_waiting_time() -> f64 {
    1.0
}

fn default_led_init_time() -> f64 {
    0.5
}

fn default_lateral_sampling() -> f64 {
    0.058
}

fn default_zsampling() -> f64 {
    1.0
}

fn default_refresh_period() -> f64 {
    0.05
}

fn default_frame_num() -> usize {
    1
}

fn default_true() -> bool {
    true
}

fn default_level_min() -> u16 {
    60
}

fn default_level_max() -> u16 {
    4000
}

fn default_width() -> usize {
    640
}

fn default_height() -> usize {
    480
}

fn default_readout_ms() -> u64 {
    10
}

fn default_base_value() -> u16 {
    100
}

fn default_camera_y() -> CameraConfig {
    CameraConfig::default()
}

fn default_camera_x() -> CameraConfig {
    CameraConfig {
        base_value: 2000,
        ..CameraConfig::default()
    }
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            save_dir: default_save_dir(),
            sample: String::new(),
            measurement_name: default_measurement_name(),
        }
    }
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            camera_in_use: default_camera_in_use(),
            time_lapse_num: default_time_lapse_num(),
            time_lapse_waiting_time: default_time_lapse_waiting_time(),
            led_init_time: default_led_init_time(),
            xsampling: default_lateral_sampling(),
            ysampling: default_lateral_sampling(),
            zsampling: default_zsampling(),
            save_h5: false,
            refresh_period: default_refresh_period(),
            frame_num: default_frame_num(),
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            auto_range: true,
            auto_levels: true,
            level_min: default_level_min(),
            level_max: default_level_max(),
        }
    }
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            camera_y: default_camera_y(),
            camera_x: default_camera_x(),
            led_y: LedConfig::default(),
            led_x: LedConfig::default(),
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            width: default_width(),
            height: default_height(),
            readout_ms: default_readout_ms(),
            base_value: default_base_value(),
            noise: 0,
        }
    }
}

impl Default for LedConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl AppConfig {
    /// Load configuration from the default file and environment variables.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path.
    ///
    /// A missing file is not an error; defaults and environment apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            ));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.application.log_format.as_str()) {
            return Err(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            ));
        }

        let valid_backends = ["hdf5", "memory"];
        if !valid_backends.contains(&self.storage.backend.as_str()) {
            return Err(format!(
                "Invalid storage backend '{}'. Must be one of: {}",
                self.storage.backend,
                valid_backends.join(", ")
            ));
        }
        if self.storage.backend == "hdf5" && !cfg!(feature = "storage_hdf5") {
            return Err(
                "storage backend 'hdf5' requires building with the storage_hdf5 feature".to_string(),
            );
        }

        is_valid_path(&self.storage.save_dir.to_string_lossy())
            .map_err(|e| format!("storage.save_dir: {}", e))?;
        is_not_empty(&self.storage.measurement_name)
            .and_then(|_| is_file_name_component(&self.storage.measurement_name))
            .map_err(|e| format!("storage.measurement_name: {}", e))?;
        is_file_name_component(&self.storage.sample)
            .map_err(|e| format!("storage.sample: {}", e))?;

        let acq = &self.acquisition;
        if acq.time_lapse_num == 0 {
            return Err("acquisition.time_lapse_num must be at least 1".to_string());
        }
        if acq.frame_num == 0 {
            return Err("acquisition.frame_num must be at least 1".to_string());
        }
        for (name, value) in [
            ("time_lapse_waiting_time", acq.time_lapse_waiting_time),
            ("led_init_time", acq.led_init_time),
            ("refresh_period", acq.refresh_period),
        ] {
            is_in_range(value, 0.0..=MAX_WAIT_S)
                .map_err(|e| format!("acquisition.{}: {} ({})", name, e, value))?;
        }
        for (name, value) in [
            ("xsampling", acq.xsampling),
            ("ysampling", acq.ysampling),
            ("zsampling", acq.zsampling),
        ] {
            is_positive(value).map_err(|e| format!("acquisition.{}: {} ({})", name, e, value))?;
        }

        if self.display.level_min >= self.display.level_max {
            return Err(format!(
                "display.level_min ({}) must be below display.level_max ({})",
                self.display.level_min, self.display.level_max
            ));
        }

        for (name, camera) in [
            ("camera_y", &self.hardware.camera_y),
            ("camera_x", &self.hardware.camera_x),
        ] {
            if camera.enabled && (camera.width == 0 || camera.height == 0) {
                return Err(format!("hardware.{}: width and height must be non-zero", name));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.acquisition.camera_in_use, View::Y);
        assert_eq!(config.acquisition.time_lapse_num, 1);
        assert_eq!(config.acquisition.led_init_time, 0.5);
        assert_eq!(config.storage.measurement_name, "PlantTimeLapseDualMeasure");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[storage]
backend = "memory"
sample = "arabidopsis"

[acquisition]
camera_in_use = "X"
time_lapse_num = 24
LED_init_time = 0.25
frame_num = 5
"#
        )
        .unwrap();

        let config = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(config.storage.backend, "memory");
        assert_eq!(config.storage.sample, "arabidopsis");
        assert_eq!(config.acquisition.camera_in_use, View::X);
        assert_eq!(config.acquisition.time_lapse_num, 24);
        assert_eq!(config.acquisition.led_init_time, 0.25);
        assert_eq!(config.acquisition.frame_num, 5);
        // Untouched values keep their defaults
        assert_eq!(config.acquisition.time_lapse_waiting_time, 1.0);
        assert_eq!(config.display.level_max, 4000);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = AppConfig::load_from("does/not/exist.toml").unwrap();
        assert_eq!(config.application.name, "plant_app");
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = AppConfig::default();
        config.application.log_level = "verbose".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_backend_matches_build() {
        let config = AppConfig::default();
        if cfg!(feature = "storage_hdf5") {
            assert_eq!(config.storage.backend, "hdf5");
        } else {
            assert_eq!(config.storage.backend, "memory");
        }
        assert!(config.validate().is_ok());
    }

    #[cfg(not(feature = "storage_hdf5"))]
    #[test]
    fn test_hdf5_backend_needs_feature() {
        let mut config = AppConfig::default();
        config.storage.backend = "hdf5".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.contains("storage_hdf5"), "{err}");
    }

    #[test]
    fn test_invalid_backend() {
        let mut config = AppConfig::default();
        config.storage.backend = "zarr".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_cycles_rejected() {
        let mut config = AppConfig::default();
        config.acquisition.time_lapse_num = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_negative_wait_rejected() {
        let mut config = AppConfig::default();
        config.acquisition.time_lapse_waiting_time = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_wait_above_one_week_rejected() {
        let mut config = AppConfig::default();
        config.acquisition.time_lapse_waiting_time = 1.0e19;
        let err = config.validate().unwrap_err();
        assert!(err.contains("time_lapse_waiting_time"), "{err}");

        config.acquisition.time_lapse_waiting_time = MAX_WAIT_S;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_levels_must_be_ordered() {
        let mut config = AppConfig::default();
        config.display.level_min = 5000;
        assert!(config.validate().is_err());
    }
}
