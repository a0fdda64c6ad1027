//! Frame persistence.
//!
//! The sequencer writes through two small traits: a [`ContainerFactory`]
//! opens one [`Container`] (file) per run, and the container holds one
//! `[frames, height, width]` `u16` dataset per view and cycle:
//!
//! ```text
//! <yymmdd_HHMMSS>_<measurement>[_<sample>].h5
//! ├── @application, @measurement, @sample, @created_at, @settings
//! └── measurement/<measurement>/
//!     ├── t0000/c0/image   @view @time_idx @acquisition_time @frame_interval_s @element_size_um
//!     ├── t0000/c1/image
//!     └── t0001/...
//! ```
//!
//! Backends:
//! - [`memory`]: in-process store, used by tests and dry runs
//! - [`hdf5`]: HDF5 files (requires the `storage_hdf5` feature)

pub mod hdf5;
pub mod memory;

use anyhow::Result;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::acquisition::AcquisitionConfig;
use crate::error::{AppResult, DaqError};
use crate::hardware::{Frame, View};

/// Handle of a dataset inside one container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DatasetId(pub usize);

/// Attributes attached to every image dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetMetadata {
    /// View that produced the frames
    pub view: View,
    /// Cycle index (`time_idx`)
    pub cycle_index: usize,
    /// Seconds since the start of the capture when the dataset was created
    pub acquisition_time_s: f64,
    /// Configured cadence between cycles, seconds
    pub frame_interval_s: f64,
    /// Voxel size `[z, y, x]` in micrometres
    pub element_size_um: [f64; 3],
}

/// Root attributes of a container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerInfo {
    /// Application name
    pub application: String,
    /// Measurement name
    pub measurement: String,
    /// Sample name, may be empty
    pub sample: String,
    /// Creation time, RFC 3339
    pub created_at: String,
    /// Acquisition settings the run started with, as JSON
    pub settings: String,
}

impl ContainerInfo {
    /// Root attributes for a capture started with `config`.
    pub fn for_run(config: &AcquisitionConfig, created_at: DateTime<Local>) -> Result<Self> {
        Ok(Self {
            application: config.application.clone(),
            measurement: config.measurement_name.clone(),
            sample: config.sample.clone(),
            created_at: created_at.to_rfc3339(),
            settings: serde_json::to_string(config)?,
        })
    }
}

/// One open output file.
///
/// Only the acquisition worker writes to a container, and it closes it at the
/// end of every run, whatever the outcome.
pub trait Container: Send {
    /// Location of the container.
    fn path(&self) -> &Path;

    /// Create a `[frames, height, width]` dataset at `path`, creating
    /// intermediate groups, and tag it with `metadata`.
    fn create_dataset(
        &mut self,
        path: &str,
        shape: [usize; 3],
        metadata: &DatasetMetadata,
    ) -> Result<DatasetId>;

    /// Write `frame` at position `index` along the first axis.
    fn write_frame(&mut self, id: DatasetId, index: usize, frame: &Frame) -> Result<()>;

    /// Push buffered data to the backing store.
    fn flush(&mut self) -> Result<()>;

    /// Flush and release the container. Further writes fail.
    fn close(&mut self) -> Result<()>;
}

/// Opens containers for the sequencer.
pub trait ContainerFactory: Send + Sync {
    /// Backend name, as used in configuration.
    fn backend(&self) -> &str;

    /// Whether containers land on disk at the path they are opened with.
    fn persistent(&self) -> bool {
        true
    }

    /// Create a new container at `path` with the given root attributes.
    fn open(&self, path: &Path, info: &ContainerInfo) -> Result<Box<dyn Container>>;
}

/// Group holding every dataset of a measurement.
pub fn measurement_group(measurement_name: &str) -> String {
    format!("measurement/{}", measurement_name)
}

/// Full dataset path for one view and cycle.
pub fn dataset_path(measurement_name: &str, cycle_index: usize, view: View) -> String {
    format!(
        "{}/t{:04}/c{}/image",
        measurement_group(measurement_name),
        cycle_index,
        view.index()
    )
}

/// `<yymmdd_HHMMSS>_<measurement>[_<sample>].h5`
pub fn file_name(timestamp: DateTime<Local>, measurement_name: &str, sample: &str) -> String {
    let stamp = timestamp.format("%y%m%d_%H%M%S");
    if sample.is_empty() {
        format!("{}_{}.h5", stamp, measurement_name)
    } else {
        format!("{}_{}_{}.h5", stamp, measurement_name, sample)
    }
}

/// Path of a new file under the save directory. Nothing is created.
pub fn file_path(config: &AcquisitionConfig, timestamp: DateTime<Local>) -> PathBuf {
    config
        .save_dir
        .join(file_name(timestamp, &config.measurement_name, &config.sample))
}

/// Create the save directory if needed and return the path of a new file.
pub fn prepare_file_path(config: &AcquisitionConfig, timestamp: DateTime<Local>) -> AppResult<PathBuf> {
    std::fs::create_dir_all(&config.save_dir)?;
    Ok(file_path(config, timestamp))
}

/// Factory for the configured backend.
pub fn factory_for(backend: &str) -> AppResult<Arc<dyn ContainerFactory>> {
    match backend {
        "memory" => Ok(Arc::new(memory::MemoryContainerFactory::new())),
        "hdf5" => hdf5::Hdf5ContainerFactory::new().map(|f| Arc::new(f) as Arc<dyn ContainerFactory>),
        other => Err(DaqError::Configuration(format!(
            "Unknown storage backend '{}'",
            other
        ))),
    }
}

/// Reject frames that do not fit a dataset of `shape`.
pub(crate) fn check_frame(shape: [usize; 3], index: usize, frame: &Frame) -> Result<()> {
    if index >= shape[0] {
        anyhow::bail!("frame index {} out of range for {} frames", index, shape[0]);
    }
    if frame.shape() != (shape[1], shape[2]) {
        anyhow::bail!(
            "frame is {}x{}, dataset expects {}x{}",
            frame.height,
            frame.width,
            shape[1],
            shape[2]
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_dataset_path() {
        assert_eq!(
            dataset_path("PlantTimeLapseDualMeasure", 3, View::X),
            "measurement/PlantTimeLapseDualMeasure/t0003/c1/image"
        );
        assert_eq!(dataset_path("m", 12, View::Y), "measurement/m/t0012/c0/image");
    }

    #[test]
    fn test_file_name() {
        let ts = Local.with_ymd_and_hms(2024, 3, 7, 14, 5, 9).unwrap();
        assert_eq!(file_name(ts, "scan", ""), "240307_140509_scan.h5");
        assert_eq!(file_name(ts, "scan", "leaf2"), "240307_140509_scan_leaf2.h5");
    }

    #[test]
    fn test_prepare_file_path_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = crate::settings::MeasurementSettings::default().snapshot();
        config.save_dir = dir.path().join("nested").join("out");

        let path = prepare_file_path(&config, Local::now()).unwrap();
        assert!(config.save_dir.is_dir());
        assert_eq!(path.parent().unwrap(), config.save_dir);
        assert!(path.to_string_lossy().ends_with("_PlantTimeLapseDualMeasure.h5"));
    }

    #[test]
    fn test_file_path_leaves_filesystem_alone() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = crate::settings::MeasurementSettings::default().snapshot();
        config.save_dir = dir.path().join("absent");
        config.sample = "leaf2".to_string();

        let path = file_path(&config, Local::now());
        assert!(!config.save_dir.exists());
        assert_eq!(path.parent().unwrap(), config.save_dir);
        assert!(path.to_string_lossy().ends_with("_PlantTimeLapseDualMeasure_leaf2.h5"));
    }

    #[test]
    fn test_check_frame() {
        let frame = Frame::filled(4, 2, 0);
        assert!(check_frame([3, 2, 4], 2, &frame).is_ok());
        assert!(check_frame([3, 2, 4], 3, &frame).is_err());
        assert!(check_frame([3, 4, 2], 0, &frame).is_err());
    }

    #[test]
    fn test_unknown_backend() {
        assert!(factory_for("zarr").is_err());
        assert_eq!(factory_for("memory").unwrap().backend(), "memory");
    }
}
