//! In-memory container backend.
//!
//! Keeps every container a factory opened in a shared [`MemoryStore`], with
//! the same group/dataset/attribute structure an HDF5 file would have. Tests
//! inspect the store after a run; the CLI uses it for dry runs.

use anyhow::{anyhow, bail, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

use super::{check_frame, Container, ContainerFactory, ContainerInfo, DatasetId, DatasetMetadata};
use crate::hardware::Frame;

/// One dataset held in memory.
#[derive(Debug, Clone)]
pub struct MemoryDataset {
    /// `[frames, height, width]`
    pub shape: [usize; 3],
    /// Attributes
    pub metadata: DatasetMetadata,
    /// Frame slots along the first axis
    pub frames: Vec<Option<Frame>>,
}

impl MemoryDataset {
    /// Number of slots that were written.
    pub fn written(&self) -> usize {
        self.frames.iter().filter(|f| f.is_some()).count()
    }
}

/// One container held in memory.
#[derive(Debug, Clone)]
pub struct MemoryFile {
    /// Root attributes
    pub info: ContainerInfo,
    /// Datasets by full path
    pub datasets: BTreeMap<String, MemoryDataset>,
    /// Number of flush calls
    pub flushes: usize,
    /// Whether the container was closed
    pub closed: bool,
}

impl MemoryFile {
    /// Dataset at `path`.
    pub fn dataset(&self, path: &str) -> Option<&MemoryDataset> {
        self.datasets.get(path)
    }
}

/// Shared view of every container opened through one factory.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    files: Arc<Mutex<BTreeMap<PathBuf, MemoryFile>>>,
}

impl MemoryStore {
    fn lock(&self) -> MutexGuard<'_, BTreeMap<PathBuf, MemoryFile>> {
        self.files.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Paths of every container opened so far.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.lock().keys().cloned().collect()
    }

    /// Copy of the container at `path`.
    pub fn file(&self, path: &Path) -> Option<MemoryFile> {
        self.lock().get(path).cloned()
    }

    /// Copy of the only container, when exactly one was opened.
    pub fn single_file(&self) -> Option<MemoryFile> {
        let files = self.lock();
        if files.len() == 1 {
            files.values().next().cloned()
        } else {
            None
        }
    }

    /// Number of opened containers.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// No container was opened.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Factory producing in-memory containers.
#[derive(Debug, Clone, Default)]
pub struct MemoryContainerFactory {
    store: MemoryStore,
}

impl MemoryContainerFactory {
    /// Create a factory with an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store shared by every container of this factory.
    pub fn store(&self) -> MemoryStore {
        self.store.clone()
    }
}

impl ContainerFactory for MemoryContainerFactory {
    fn backend(&self) -> &str {
        "memory"
    }

    fn persistent(&self) -> bool {
        false
    }

    fn open(&self, path: &Path, info: &ContainerInfo) -> Result<Box<dyn Container>> {
        self.store.lock().insert(
            path.to_path_buf(),
            MemoryFile {
                info: info.clone(),
                datasets: BTreeMap::new(),
                flushes: 0,
                closed: false,
            },
        );
        debug!(path = %path.display(), "Opened in-memory container");
        Ok(Box::new(MemoryContainer {
            path: path.to_path_buf(),
            store: self.store.clone(),
            ids: Vec::new(),
            closed: false,
        }))
    }
}

struct MemoryContainer {
    path: PathBuf,
    store: MemoryStore,
    ids: Vec<String>,
    closed: bool,
}

impl MemoryContainer {
    fn with_file<R>(&self, f: impl FnOnce(&mut MemoryFile) -> Result<R>) -> Result<R> {
        if self.closed {
            bail!("container {} is closed", self.path.display());
        }
        let mut files = self.store.lock();
        let file = files
            .get_mut(&self.path)
            .ok_or_else(|| anyhow!("container {} vanished", self.path.display()))?;
        f(file)
    }
}

impl Container for MemoryContainer {
    fn path(&self) -> &Path {
        &self.path
    }

    fn create_dataset(
        &mut self,
        path: &str,
        shape: [usize; 3],
        metadata: &DatasetMetadata,
    ) -> Result<DatasetId> {
        self.with_file(|file| {
            if file.datasets.contains_key(path) {
                bail!("dataset {} already exists", path);
            }
            file.datasets.insert(
                path.to_string(),
                MemoryDataset {
                    shape,
                    metadata: metadata.clone(),
                    frames: vec![None; shape[0]],
                },
            );
            Ok(())
        })?;
        self.ids.push(path.to_string());
        Ok(DatasetId(self.ids.len() - 1))
    }

    fn write_frame(&mut self, id: DatasetId, index: usize, frame: &Frame) -> Result<()> {
        let path = self
            .ids
            .get(id.0)
            .cloned()
            .ok_or_else(|| anyhow!("unknown dataset id {}", id.0))?;
        self.with_file(|file| {
            let dataset = file
                .datasets
                .get_mut(&path)
                .ok_or_else(|| anyhow!("dataset {} missing", path))?;
            check_frame(dataset.shape, index, frame)?;
            dataset.frames[index] = Some(frame.clone());
            Ok(())
        })
    }

    fn flush(&mut self) -> Result<()> {
        self.with_file(|file| {
            file.flushes += 1;
            Ok(())
        })
    }

    fn close(&mut self) -> Result<()> {
        self.with_file(|file| {
            file.closed = true;
            Ok(())
        })?;
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::View;

    fn info() -> ContainerInfo {
        ContainerInfo {
            application: "plant_app".to_string(),
            measurement: "m".to_string(),
            sample: String::new(),
            created_at: "2024-01-01T00:00:00+00:00".to_string(),
            settings: "{}".to_string(),
        }
    }

    fn metadata() -> DatasetMetadata {
        DatasetMetadata {
            view: View::Y,
            cycle_index: 0,
            acquisition_time_s: 0.5,
            frame_interval_s: 1.0,
            element_size_um: [1.0, 0.058, 0.058],
        }
    }

    #[test]
    fn test_write_and_inspect() {
        let factory = MemoryContainerFactory::new();
        let store = factory.store();
        let mut container = factory.open(Path::new("run.h5"), &info()).unwrap();

        let id = container
            .create_dataset("measurement/m/t0000/c0/image", [2, 2, 3], &metadata())
            .unwrap();
        container.write_frame(id, 1, &Frame::filled(3, 2, 9)).unwrap();
        container.flush().unwrap();
        container.close().unwrap();

        let file = store.single_file().unwrap();
        assert!(file.closed);
        assert_eq!(file.flushes, 1);
        let dataset = file.dataset("measurement/m/t0000/c0/image").unwrap();
        assert_eq!(dataset.written(), 1);
        assert!(dataset.frames[0].is_none());
        assert_eq!(dataset.metadata, metadata());
    }

    #[test]
    fn test_rejects_bad_writes() {
        let factory = MemoryContainerFactory::new();
        let mut container = factory.open(Path::new("run.h5"), &info()).unwrap();
        let id = container.create_dataset("a/image", [1, 2, 2], &metadata()).unwrap();

        assert!(container.write_frame(id, 1, &Frame::filled(2, 2, 0)).is_err());
        assert!(container.write_frame(id, 0, &Frame::filled(3, 2, 0)).is_err());
        assert!(container.write_frame(DatasetId(7), 0, &Frame::filled(2, 2, 0)).is_err());
        assert!(container.create_dataset("a/image", [1, 2, 2], &metadata()).is_err());

        container.close().unwrap();
        assert!(container.write_frame(id, 0, &Frame::filled(2, 2, 0)).is_err());
    }
}
