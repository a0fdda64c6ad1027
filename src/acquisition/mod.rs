//! Time-lapse acquisition.
//!
//! The [`sequencer`] drives both views through live preview and the timed
//! multi-frame capture; [`worker`] runs it on its own task. The types here
//! are the data a run works with: the settings snapshot it starts from, the
//! per-cycle frame buffer and the summary it ends with.

pub mod cancel;
pub mod preview;
pub mod sequencer;
pub mod state;
pub mod worker;

pub use cancel::CancellationFlag;
pub use preview::{PreviewFrame, PreviewSlot};
pub use sequencer::Sequencer;
pub use state::{RunProgress, SequencerState};
pub use worker::MeasurementHandle;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

use crate::hardware::{Frame, View};

/// Voxel size in micrometres, ordered `[z, y, x]` when stored.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PixelSize {
    /// Step along z
    pub z: f64,
    /// Pixel size along y
    pub y: f64,
    /// Pixel size along x
    pub x: f64,
}

impl PixelSize {
    /// `[z, y, x]`, the order of the `element_size_um` attribute.
    pub fn as_array(&self) -> [f64; 3] {
        [self.z, self.y, self.x]
    }
}

/// Immutable settings a capture runs with, taken once when it starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Number of cycles (N)
    pub cycles: usize,
    /// Cadence between cycle starts (W)
    pub cycle_interval: Duration,
    /// LED warm-up before acquisition (D)
    pub led_warmup: Duration,
    /// Preview view when the capture started
    pub preview_view: View,
    /// Frames per camera per cycle (F)
    pub frames_per_cycle: usize,
    /// Persist frames to a container
    pub save: bool,
    /// Voxel size
    pub pixel_size: PixelSize,
    /// Application name recorded in the container
    pub application: String,
    /// Measurement name
    pub measurement_name: String,
    /// Sample name, may be empty
    pub sample: String,
    /// Output directory
    pub save_dir: PathBuf,
}

/// Frames of one cycle, one slot per active camera in view order.
///
/// Allocated at the start of every cycle and dropped at its end.
#[derive(Debug)]
pub struct CycleBuffer {
    slots: Vec<(View, Vec<Option<Frame>>)>,
}

impl CycleBuffer {
    /// Empty buffer for `views`, `frames` entries each.
    pub fn new(views: &[View], frames: usize) -> Self {
        Self {
            slots: views
                .iter()
                .map(|view| (*view, vec![None; frames]))
                .collect(),
        }
    }

    /// Store a frame. Out of range positions are ignored.
    pub fn store(&mut self, slot: usize, index: usize, frame: Frame) {
        if let Some(entry) = self
            .slots
            .get_mut(slot)
            .and_then(|(_, frames)| frames.get_mut(index))
        {
            *entry = Some(frame);
        }
    }

    /// Frame at `index` of `slot`, if captured.
    pub fn get(&self, slot: usize, index: usize) -> Option<&Frame> {
        self.slots
            .get(slot)
            .and_then(|(_, frames)| frames.get(index))
            .and_then(Option::as_ref)
    }

    /// Frames of a view.
    pub fn frames(&self, view: View) -> Option<&[Option<Frame>]> {
        self.slots
            .iter()
            .find(|(v, _)| *v == view)
            .map(|(_, frames)| frames.as_slice())
    }

    /// Number of captured frames across all slots.
    pub fn captured(&self) -> usize {
        self.slots
            .iter()
            .map(|(_, frames)| frames.iter().filter(|f| f.is_some()).count())
            .sum()
    }

    /// Every slot is full.
    pub fn is_complete(&self) -> bool {
        self.slots
            .iter()
            .all(|(_, frames)| frames.iter().all(Option::is_some))
    }
}

/// How a run ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunOutcome {
    /// Every cycle ran
    Complete,
    /// Interrupted by the operator
    Cancelled,
}

/// Result of a finished run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Run identifier, also written to the log
    pub run_id: Uuid,
    /// How the run ended
    pub outcome: RunOutcome,
    /// Cycles whose frames were all captured
    pub cycles_completed: usize,
    /// Frames captured across all views
    pub frames_captured: usize,
    /// Container written, if persistence was on
    pub file: Option<PathBuf>,
    /// Time from the start of capture to the end of the run
    pub elapsed: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_buffer_fill() {
        let mut buffer = CycleBuffer::new(&[View::Y, View::X], 2);
        assert!(!buffer.is_complete());

        buffer.store(0, 0, Frame::filled(2, 2, 1));
        buffer.store(1, 0, Frame::filled(2, 2, 2));
        buffer.store(0, 1, Frame::filled(2, 2, 3));
        assert_eq!(buffer.captured(), 3);
        assert!(!buffer.is_complete());

        buffer.store(1, 1, Frame::filled(2, 2, 4));
        assert!(buffer.is_complete());
        assert_eq!(buffer.get(1, 1).unwrap().pixels[0], 4);
        assert_eq!(buffer.frames(View::X).unwrap().len(), 2);

        // Out of range is ignored
        buffer.store(5, 0, Frame::filled(2, 2, 9));
        assert_eq!(buffer.captured(), 4);
    }
}
