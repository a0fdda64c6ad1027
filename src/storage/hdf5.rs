//! HDF5 container backend.
//!
//! Requires the `storage_hdf5` feature (and a native HDF5 installation).
//! Without it [`Hdf5ContainerFactory::new`] fails with
//! [`crate::error::DaqError::FeatureNotEnabled`], so a configuration asking for HDF5
//! output is rejected before any hardware moves.
//!
//! Strings are stored as variable-length UTF-8 attributes; frames are
//! written one `[height, width]` slice at a time.

use anyhow::Result;
use std::path::Path;

use super::{Container, ContainerFactory, ContainerInfo};
use crate::error::AppResult;

/// Factory producing HDF5 files.
#[derive(Debug, Clone, Default)]
pub struct Hdf5ContainerFactory {
    _private: (),
}

impl Hdf5ContainerFactory {
    /// Create the factory.
    #[cfg(feature = "storage_hdf5")]
    pub fn new() -> AppResult<Self> {
        Ok(Self { _private: () })
    }

    /// HDF5 support was not compiled in.
    #[cfg(not(feature = "storage_hdf5"))]
    pub fn new() -> AppResult<Self> {
        Err(crate::error::DaqError::FeatureNotEnabled("storage_hdf5".to_string()))
    }
}

impl ContainerFactory for Hdf5ContainerFactory {
    fn backend(&self) -> &str {
        "hdf5"
    }

    #[cfg(feature = "storage_hdf5")]
    fn open(&self, path: &Path, info: &ContainerInfo) -> Result<Box<dyn Container>> {
        Ok(Box::new(backend::Hdf5Container::create(path, info)?))
    }

    #[cfg(not(feature = "storage_hdf5"))]
    fn open(&self, _path: &Path, _info: &ContainerInfo) -> Result<Box<dyn Container>> {
        Err(crate::error::DaqError::FeatureNotEnabled("storage_hdf5".to_string()).into())
    }
}

#[cfg(feature = "storage_hdf5")]
pub use backend::{read_dataset, read_info};

#[cfg(feature = "storage_hdf5")]
mod backend {
    use anyhow::{anyhow, Context, Result};
    use ::hdf5::types::VarLenUnicode;
    use ::hdf5::{Dataset, File, Group, Location};
    use ndarray::{s, ArrayView2, Ix3};
    use std::path::{Path, PathBuf};
    use tracing::{debug, info};

    use crate::hardware::{Frame, View};
    use crate::storage::{
        check_frame, measurement_group, Container, ContainerInfo, DatasetId, DatasetMetadata,
    };

    pub(super) struct Hdf5Container {
        path: PathBuf,
        file: Option<File>,
        datasets: Vec<(Dataset, [usize; 3])>,
    }

    impl Hdf5Container {
        pub(super) fn create(path: &Path, info: &ContainerInfo) -> Result<Self> {
            let file = File::create(path)
                .with_context(|| format!("creating {}", path.display()))?;

            write_str_attr(&file, "application", &info.application)?;
            write_str_attr(&file, "measurement", &info.measurement)?;
            write_str_attr(&file, "sample", &info.sample)?;
            write_str_attr(&file, "created_at", &info.created_at)?;
            write_str_attr(&file, "settings", &info.settings)?;

            let root = file.group("/")?;
            ensure_group(&root, &measurement_group(&info.measurement))?;

            info!(path = %path.display(), "Created HDF5 file");
            Ok(Self {
                path: path.to_path_buf(),
                file: Some(file),
                datasets: Vec::new(),
            })
        }

        fn file(&self) -> Result<&File> {
            self.file
                .as_ref()
                .ok_or_else(|| anyhow!("{} is closed", self.path.display()))
        }
    }

    impl Container for Hdf5Container {
        fn path(&self) -> &Path {
            &self.path
        }

        fn create_dataset(
            &mut self,
            path: &str,
            shape: [usize; 3],
            metadata: &DatasetMetadata,
        ) -> Result<DatasetId> {
            let (parent, name) = path
                .rsplit_once('/')
                .ok_or_else(|| anyhow!("dataset path '{}' has no group", path))?;
            let root = self.file()?.group("/")?;
            let group = ensure_group(&root, parent)?;

            let dataset = group
                .new_dataset::<u16>()
                .shape((shape[0], shape[1], shape[2]))
                .create(name)
                .with_context(|| format!("creating dataset {}", path))?;

            write_str_attr(&dataset, "view", metadata.view.as_str())?;
            dataset
                .new_attr::<u64>()
                .create("time_idx")?
                .write_scalar(&(metadata.cycle_index as u64))?;
            dataset
                .new_attr::<f64>()
                .create("acquisition_time")?
                .write_scalar(&metadata.acquisition_time_s)?;
            dataset
                .new_attr::<f64>()
                .create("frame_interval_s")?
                .write_scalar(&metadata.frame_interval_s)?;
            dataset
                .new_attr::<f64>()
                .shape(3)
                .create("element_size_um")?
                .write(&metadata.element_size_um[..])?;

            debug!(dataset = path, ?shape, "Created dataset");
            self.datasets.push((dataset, shape));
            Ok(DatasetId(self.datasets.len() - 1))
        }

        fn write_frame(&mut self, id: DatasetId, index: usize, frame: &Frame) -> Result<()> {
            self.file()?;
            let (dataset, shape) = self
                .datasets
                .get(id.0)
                .ok_or_else(|| anyhow!("unknown dataset id {}", id.0))?;
            check_frame(*shape, index, frame)?;

            let view = ArrayView2::from_shape((frame.height, frame.width), &frame.pixels)?;
            dataset.write_slice(view, s![index, .., ..])?;
            Ok(())
        }

        fn flush(&mut self) -> Result<()> {
            self.file()?.flush()?;
            Ok(())
        }

        fn close(&mut self) -> Result<()> {
            if let Some(file) = self.file.take() {
                file.flush()?;
                self.datasets.clear();
                drop(file);
                info!(path = %self.path.display(), "Closed HDF5 file");
            }
            Ok(())
        }
    }

    fn write_str_attr(location: &Location, name: &str, value: &str) -> Result<()> {
        let value = value
            .parse::<VarLenUnicode>()
            .map_err(|e| anyhow!("attribute {}: {:?}", name, e))?;
        location
            .new_attr::<VarLenUnicode>()
            .create(name)?
            .write_scalar(&value)?;
        Ok(())
    }

    fn read_str_attr(location: &Location, name: &str) -> Result<String> {
        let value: VarLenUnicode = location.attr(name)?.read_scalar()?;
        Ok(value.as_str().to_string())
    }

    /// Get or create every group along `path`.
    fn ensure_group(root: &Group, path: &str) -> Result<Group> {
        let mut group = root.clone();
        for part in path.split('/').filter(|p| !p.is_empty()) {
            group = if group.link_exists(part) {
                group.group(part)?
            } else {
                group.create_group(part)?
            };
        }
        Ok(group)
    }

    /// Read the root attributes of a file.
    pub fn read_info(path: &Path) -> Result<ContainerInfo> {
        let file = File::open(path)?;
        Ok(ContainerInfo {
            application: read_str_attr(&file, "application")?,
            measurement: read_str_attr(&file, "measurement")?,
            sample: read_str_attr(&file, "sample")?,
            created_at: read_str_attr(&file, "created_at")?,
            settings: read_str_attr(&file, "settings")?,
        })
    }

    /// Read every frame and the attributes of one image dataset.
    pub fn read_dataset(path: &Path, dataset_path: &str) -> Result<(Vec<Frame>, DatasetMetadata)> {
        let file = File::open(path)?;
        let dataset = file.dataset(dataset_path)?;
        let data = dataset.read::<u16, Ix3>()?;
        let (frames, height, width) = data.dim();

        let images = (0..frames)
            .map(|f| {
                let pixels = data.slice(s![f, .., ..]).iter().copied().collect();
                Frame::new(width, height, pixels)
            })
            .collect::<Result<Vec<_>>>()?;

        let view: View = read_str_attr(&dataset, "view")?
            .parse()
            .map_err(|e: String| anyhow!(e))?;
        let time_idx: u64 = dataset.attr("time_idx")?.read_scalar()?;
        let element_size = dataset.attr("element_size_um")?.read_raw::<f64>()?;
        let element_size_um: [f64; 3] = element_size
            .try_into()
            .map_err(|v: Vec<f64>| anyhow!("element_size_um has {} values", v.len()))?;

        let metadata = DatasetMetadata {
            view,
            cycle_index: time_idx as usize,
            acquisition_time_s: dataset.attr("acquisition_time")?.read_scalar()?,
            frame_interval_s: dataset.attr("frame_interval_s")?.read_scalar()?,
            element_size_um,
        };
        Ok((images, metadata))
    }
}

#[cfg(all(test, not(feature = "storage_hdf5")))]
mod tests {
    use super::*;
    use crate::error::DaqError;

    #[test]
    fn test_hdf5_requires_feature() {
        let err = Hdf5ContainerFactory::new().unwrap_err();
        assert!(matches!(err, DaqError::FeatureNotEnabled(_)));
    }
}
