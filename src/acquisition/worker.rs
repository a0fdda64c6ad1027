//! Measurement worker task.
//!
//! [`MeasurementHandle`] runs a [`Sequencer`] on its own tokio task so the
//! operator side never waits on hardware. The handle is the "interrupt" and
//! "start saving" buttons plus a way to collect the result.

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use super::{AcquisitionConfig, PreviewSlot, RunProgress, RunSummary, Sequencer};
use crate::error::{AppResult, DaqError};

/// Handle to a measurement running in the background.
pub struct MeasurementHandle {
    sequencer: Arc<Sequencer>,
    task: JoinHandle<AppResult<RunSummary>>,
}

impl MeasurementHandle {
    /// Start preview followed by capture once `save_h5` is switched on.
    ///
    /// Clears a previous interrupt request before starting.
    pub fn spawn(sequencer: Arc<Sequencer>) -> Self {
        sequencer.cancellation().reset();
        let worker = sequencer.clone();
        let task = tokio::spawn(async move { worker.run().await });
        info!("Measurement worker spawned");
        Self { sequencer, task }
    }

    /// Start a capture right away with `config`.
    pub fn spawn_capture(sequencer: Arc<Sequencer>, config: AcquisitionConfig) -> Self {
        sequencer.cancellation().reset();
        let worker = sequencer.clone();
        let task = tokio::spawn(async move { worker.capture(config).await });
        info!("Capture worker spawned");
        Self { sequencer, task }
    }

    /// Ask the run to stop at its next checkpoint.
    pub fn interrupt(&self) {
        info!("Interrupt requested");
        self.sequencer.cancellation().cancel();
    }

    /// Switch `save_h5` on, which ends the preview and starts a saving capture.
    pub fn start_saving(&self) -> AppResult<()> {
        self.sequencer
            .settings()
            .save_h5
            .set(true)
            .map_err(|e| DaqError::Configuration(e.to_string()))
    }

    /// End the preview and capture without saving.
    pub fn request_capture(&self) {
        self.sequencer.request_capture();
    }

    /// Latest preview frame.
    pub fn preview(&self) -> PreviewSlot {
        self.sequencer.preview_slot()
    }

    /// Follow the run state.
    pub fn progress(&self) -> watch::Receiver<RunProgress> {
        self.sequencer.subscribe_progress()
    }

    /// Whether the worker task has ended.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the run to end.
    pub async fn join(self) -> AppResult<RunSummary> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(DaqError::Worker(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::{RunOutcome, SequencerState};
    use crate::hardware::capabilities::{Camera, Illuminator};
    use crate::hardware::mock::{MockCamera, MockLed};
    use crate::hardware::{View, ViewPair};
    use crate::settings::MeasurementSettings;
    use crate::storage::memory::MemoryContainerFactory;

    async fn sequencer() -> Arc<Sequencer> {
        let camera = Arc::new(MockCamera::new("camera_y", 2, 2));
        let led = Arc::new(MockLed::new("led_y"));
        camera.connect().await.unwrap();
        led.connect().await.unwrap();
        Arc::new(
            Sequencer::new(
                vec![ViewPair::new(View::Y, camera, led)],
                Arc::new(MeasurementSettings::default()),
                Arc::new(MemoryContainerFactory::new()),
            )
            .unwrap(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_during_preview() {
        let handle = MeasurementHandle::spawn(sequencer().await);
        let mut progress = handle.progress();
        progress
            .wait_for(|p| p.state == SequencerState::Previewing)
            .await
            .unwrap();

        handle.interrupt();
        let summary = handle.join().await.unwrap();
        assert_eq!(summary.outcome, RunOutcome::Cancelled);
        assert_eq!(summary.cycles_completed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_capture_without_saving() {
        let handle = MeasurementHandle::spawn(sequencer().await);
        handle.request_capture();

        let summary = handle.join().await.unwrap();
        assert_eq!(summary.outcome, RunOutcome::Complete);
        assert_eq!(summary.cycles_completed, 1);
        assert!(summary.file.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawn_clears_old_interrupt() {
        let sequencer = sequencer().await;
        sequencer.cancellation().cancel();

        let config = sequencer.settings().snapshot();
        let handle = MeasurementHandle::spawn_capture(sequencer, config);
        let summary = handle.join().await.unwrap();
        assert_eq!(summary.outcome, RunOutcome::Complete);
    }
}
