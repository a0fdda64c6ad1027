//! Live measurement settings.
//!
//! [`MeasurementSettings`] groups every operator-adjustable value of the
//! time-lapse measurement as an observable [`Setting`]. The operator side
//! (CLI, display refresher) writes them at any time; the sequencer reads
//! `camera_in_use` and `save_h5` live and takes an immutable
//! [`AcquisitionConfig`] snapshot of everything else when a capture starts.

pub mod observable;

pub use observable::{Setting, SettingMetadata};

use std::path::PathBuf;
use std::time::Duration;

use crate::acquisition::{AcquisitionConfig, PixelSize};
use crate::config::{AppConfig, MAX_WAIT_S};
use crate::hardware::View;

/// Observable settings of the dual-view time-lapse measurement.
#[derive(Debug)]
pub struct MeasurementSettings {
    /// Application name recorded in saved files
    pub application: String,
    /// View shown in the preview
    pub camera_in_use: Setting<View>,
    /// Number of cycles
    pub time_lapse_num: Setting<usize>,
    /// Cadence between cycle starts
    pub time_lapse_waiting_time: Setting<f64>,
    /// LED warm-up before capture
    pub led_init_time: Setting<f64>,
    /// Pixel size along x
    pub xsampling: Setting<f64>,
    /// Pixel size along y
    pub ysampling: Setting<f64>,
    /// Step along z
    pub zsampling: Setting<f64>,
    /// Persist frames; switching it on during preview starts the capture
    pub save_h5: Setting<bool>,
    /// Display refresh period
    pub refresh_period: Setting<f64>,
    /// Frames per camera per cycle
    pub frame_num: Setting<usize>,
    /// Fit the display to the image on every refresh
    pub auto_range: Setting<bool>,
    /// Derive display levels from the frame
    pub auto_levels: Setting<bool>,
    /// Lower display level
    pub level_min: Setting<u16>,
    /// Upper display level
    pub level_max: Setting<u16>,
    /// Output directory
    pub save_dir: Setting<PathBuf>,
    /// Sample name appended to file names
    pub sample: Setting<String>,
    /// Measurement name
    pub measurement_name: Setting<String>,
}

impl Default for MeasurementSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl MeasurementSettings {
    /// Build the settings from loaded configuration.
    pub fn from_config(config: &AppConfig) -> Self {
        let acq = &config.acquisition;
        let display = &config.display;
        let storage = &config.storage;

        Self {
            application: config.application.name.clone(),
            camera_in_use: Setting::new("camera_in_use", acq.camera_in_use),
            time_lapse_num: Setting::new("time_lapse_num", acq.time_lapse_num).with_min(1),
            time_lapse_waiting_time: Setting::new(
                "time_lapse_waiting_time",
                acq.time_lapse_waiting_time,
            )
            .with_units("s")
            .with_range(0.0, MAX_WAIT_S),
            led_init_time: Setting::new("LED_init_time", acq.led_init_time)
                .with_units("s")
                .with_range(0.0, MAX_WAIT_S),
            xsampling: Setting::new("xsampling", acq.xsampling).with_units("um"),
            ysampling: Setting::new("ysampling", acq.ysampling).with_units("um"),
            zsampling: Setting::new("zsampling", acq.zsampling).with_units("um"),
            save_h5: Setting::new("save_h5", acq.save_h5),
            refresh_period: Setting::new("refresh_period", acq.refresh_period)
                .with_units("s")
                .with_range(0.0, MAX_WAIT_S),
            frame_num: Setting::new("frame_num", acq.frame_num).with_min(1),
            auto_range: Setting::new("auto_range", display.auto_range),
            auto_levels: Setting::new("auto_levels", display.auto_levels),
            level_min: Setting::new("level_min", display.level_min),
            level_max: Setting::new("level_max", display.level_max),
            save_dir: Setting::new("save_dir", storage.save_dir.clone()),
            sample: Setting::new("sample", storage.sample.clone()),
            measurement_name: Setting::new("measurement_name", storage.measurement_name.clone()),
        }
    }

    /// Immutable copy of the values a capture runs with.
    pub fn snapshot(&self) -> AcquisitionConfig {
        AcquisitionConfig {
            cycles: self.time_lapse_num.get(),
            cycle_interval: seconds(self.time_lapse_waiting_time.get()),
            led_warmup: seconds(self.led_init_time.get()),
            preview_view: self.camera_in_use.get(),
            frames_per_cycle: self.frame_num.get(),
            save: self.save_h5.get(),
            pixel_size: PixelSize {
                z: self.zsampling.get(),
                y: self.ysampling.get(),
                x: self.xsampling.get(),
            },
            application: self.application.clone(),
            measurement_name: self.measurement_name.get(),
            sample: self.sample.get(),
            save_dir: self.save_dir.get(),
        }
    }

    /// Display refresh period.
    pub fn refresh_interval(&self) -> Duration {
        seconds(self.refresh_period.get())
    }
}

fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = MeasurementSettings::default();
        assert_eq!(settings.camera_in_use.get(), View::Y);
        assert_eq!(settings.time_lapse_num.get(), 1);
        assert_eq!(settings.led_init_time.get(), 0.5);
        assert_eq!(settings.level_min.get(), 60);
        assert_eq!(settings.level_max.get(), 4000);
        assert!(!settings.save_h5.get());
        assert_eq!(settings.refresh_interval(), Duration::from_millis(50));
    }

    #[test]
    fn test_validators() {
        let settings = MeasurementSettings::default();
        assert!(settings.time_lapse_num.set(0).is_err());
        assert!(settings.frame_num.set(0).is_err());
        assert!(settings.refresh_period.set(-0.1).is_err());
        assert!(settings.time_lapse_waiting_time.set(2.0).is_ok());
        assert!(settings.time_lapse_waiting_time.set(1.0e19).is_err());
        assert!(settings.led_init_time.set(MAX_WAIT_S + 1.0).is_err());
    }

    #[test]
    fn test_snapshot_is_detached() {
        let settings = MeasurementSettings::default();
        settings.time_lapse_num.set(3).unwrap();
        settings.frame_num.set(5).unwrap();
        settings.time_lapse_waiting_time.set(1.5).unwrap();

        let snapshot = settings.snapshot();
        settings.time_lapse_num.set(10).unwrap();

        assert_eq!(snapshot.cycles, 3);
        assert_eq!(snapshot.frames_per_cycle, 5);
        assert_eq!(snapshot.cycle_interval, Duration::from_millis(1500));
        assert_eq!(snapshot.pixel_size.as_array(), [1.0, 0.058, 0.058]);
    }
}
