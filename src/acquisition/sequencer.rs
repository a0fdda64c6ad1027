//! Acquisition sequencer.
//!
//! Drives every active view through live preview and the timed multi-frame
//! capture, and always leaves the hardware stopped and dark.
//!
//! # Capture cycle
//!
//! ```text
//! for t in 0..N:
//!     interrupted? -> stop          disconnected? -> fail
//!     LEDs on, wait D
//!     acq_start all cameras
//!     for f in 0..F:
//!         one frame per camera, view Y first
//!         publish the selected view to the preview slot
//!         (save) create file/datasets on f == 0, write slot f, flush
//!         interrupted? -> stop after this frame
//!     acq_stop all cameras, LEDs off
//!     wait until start + (t + 1) * W
//! ```
//!
//! The cadence is anchored to the start of the capture, so a cycle that
//! overruns W shortens the following wait instead of shifting every later
//! cycle.

use chrono::Local;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::{
    AcquisitionConfig, CancellationFlag, CycleBuffer, PreviewSlot, RunOutcome, RunProgress,
    RunSummary, SequencerState,
};
use crate::error::{AppResult, DaqError};
use crate::hardware::{AcquisitionMode, Frame, View, ViewPair};
use crate::settings::MeasurementSettings;
use crate::storage::{
    dataset_path, file_path, prepare_file_path, Container, ContainerFactory, ContainerInfo, DatasetId,
    DatasetMetadata,
};

/// Poll period of the wait between cycles.
pub const CADENCE_POLL: Duration = Duration::from_millis(10);

/// Per-run bookkeeping.
struct Run {
    container: Option<Box<dyn Container>>,
    file: Option<PathBuf>,
    frame_shape: Option<(usize, usize)>,
    started: Option<Instant>,
    cycles_completed: usize,
    frames_captured: usize,
    preview_fallback: Option<View>,
}

impl Run {
    fn new() -> Self {
        Self {
            container: None,
            file: None,
            frame_shape: None,
            started: None,
            cycles_completed: 0,
            frames_captured: 0,
            preview_fallback: None,
        }
    }

    /// The first frame of the run fixes `(height, width)`.
    fn check_shape(&mut self, view: View, frame: &Frame) -> AppResult<()> {
        match self.frame_shape {
            None => {
                self.frame_shape = Some(frame.shape());
                Ok(())
            }
            Some((height, width)) if (height, width) != frame.shape() => {
                Err(DaqError::FrameShapeMismatch {
                    view,
                    expected_height: height,
                    expected_width: width,
                    actual_height: frame.height,
                    actual_width: frame.width,
                })
            }
            Some(_) => Ok(()),
        }
    }
}

/// Runs previews and captures on a fixed set of connected views.
pub struct Sequencer {
    pairs: Vec<ViewPair>,
    settings: Arc<MeasurementSettings>,
    storage: Arc<dyn ContainerFactory>,
    preview: PreviewSlot,
    cancel: CancellationFlag,
    capture_requested: Arc<AtomicBool>,
    progress: watch::Sender<RunProgress>,
}

impl Sequencer {
    /// Create a sequencer for the active pairs returned by
    /// [`crate::hardware::Rig::connect`].
    ///
    /// Pairs are sorted by view index; at least one is required.
    pub fn new(
        mut pairs: Vec<ViewPair>,
        settings: Arc<MeasurementSettings>,
        storage: Arc<dyn ContainerFactory>,
    ) -> AppResult<Self> {
        if pairs.is_empty() {
            return Err(DaqError::NoActiveViews);
        }
        pairs.sort_by_key(|pair| pair.view);
        pairs.dedup_by_key(|pair| pair.view);

        let (progress, _) = watch::channel(RunProgress::default());
        Ok(Self {
            pairs,
            settings,
            storage,
            preview: PreviewSlot::new(),
            cancel: CancellationFlag::new(),
            capture_requested: Arc::new(AtomicBool::new(false)),
            progress,
        })
    }

    /// Poll an externally owned interrupt flag instead of a private one.
    pub fn with_cancellation(mut self, cancel: CancellationFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Active views in fetch order.
    pub fn views(&self) -> Vec<View> {
        self.pairs.iter().map(|pair| pair.view).collect()
    }

    /// Live settings the sequencer reads.
    pub fn settings(&self) -> &Arc<MeasurementSettings> {
        &self.settings
    }

    /// Slot receiving the frames of the selected view.
    pub fn preview_slot(&self) -> PreviewSlot {
        self.preview.clone()
    }

    /// Interrupt flag polled by the sequencer. It is never cleared here.
    pub fn cancellation(&self) -> CancellationFlag {
        self.cancel.clone()
    }

    /// Follow the run state.
    pub fn subscribe_progress(&self) -> watch::Receiver<RunProgress> {
        self.progress.subscribe()
    }

    /// Current run state.
    pub fn progress(&self) -> RunProgress {
        *self.progress.borrow()
    }

    /// Leave preview and start the capture even if `save_h5` is off.
    ///
    /// The capture then runs without persistence.
    pub fn request_capture(&self) {
        self.capture_requested.store(true, Ordering::SeqCst);
    }

    /// Preview until `save_h5` is switched on (or a capture is requested),
    /// then capture with a snapshot of the settings at that moment.
    pub async fn run(&self) -> AppResult<RunSummary> {
        self.execute(Uuid::new_v4(), None).await
    }

    /// Capture immediately with `config`, skipping the preview.
    pub async fn capture(&self, config: AcquisitionConfig) -> AppResult<RunSummary> {
        self.execute(Uuid::new_v4(), Some(config)).await
    }

    #[instrument(name = "measurement", skip(self, run_id, config), fields(run_id = %run_id))]
    async fn execute(
        &self,
        run_id: Uuid,
        config: Option<AcquisitionConfig>,
    ) -> AppResult<RunSummary> {
        let state = self.progress().state;
        if !state.can_begin() {
            return Err(DaqError::Worker(format!(
                "cannot start a run while {}",
                state
            )));
        }
        info!(views = ?self.views(), "Measurement started");

        let mut run = Run::new();
        let result = match config {
            Some(config) => self.capture_cycles(&config, &mut run).await,
            None => self.preview_then_capture(&mut run).await,
        };
        self.finish(run_id, run, result).await
    }

    async fn preview_then_capture(&self, run: &mut Run) -> AppResult<RunOutcome> {
        if !self.preview_loop(run).await? {
            return Ok(RunOutcome::Cancelled);
        }
        let config = self.settings.snapshot();
        self.capture_cycles(&config, run).await
    }

    /// Returns true when a capture should follow, false when interrupted.
    async fn preview_loop(&self, run: &mut Run) -> AppResult<bool> {
        self.set_progress(SequencerState::Previewing, None, 0, 0);

        for pair in &self.pairs {
            pair.camera
                .set_acquisition_mode(AcquisitionMode::Continuous)
                .await
                .map_err(DaqError::instrument)?;
            pair.camera.acq_start().await.map_err(DaqError::instrument)?;
        }
        info!("Preview started");

        loop {
            let slot = self.preview_index(&mut run.preview_fallback);
            let pair = &self.pairs[slot];
            let frame = pair.camera.get_frame().await.map_err(DaqError::instrument)?;
            self.preview.publish(pair.view, frame);

            if self.cancel.is_cancelled() {
                info!("Preview interrupted");
                return Ok(false);
            }
            if self.settings.save_h5.get() || self.capture_requested.swap(false, Ordering::SeqCst) {
                info!(save = self.settings.save_h5.get(), "Capture requested");
                return Ok(true);
            }
        }
    }

    async fn capture_cycles(
        &self,
        config: &AcquisitionConfig,
        run: &mut Run,
    ) -> AppResult<RunOutcome> {
        if config.cycles == 0 || config.frames_per_cycle == 0 {
            return Err(DaqError::Configuration(
                "cycles and frames per cycle must be at least 1".to_string(),
            ));
        }
        // The last deadline must be reachable before any hardware moves.
        cycle_deadline(Instant::now(), config.cycle_interval, config.cycles - 1)?;
        self.set_progress(SequencerState::Capturing, None, config.cycles, 0);

        for pair in &self.pairs {
            let camera = &pair.camera;
            camera.acq_stop().await.map_err(DaqError::instrument)?;
            camera
                .set_acquisition_mode(AcquisitionMode::MultiFrame)
                .await
                .map_err(DaqError::instrument)?;
            camera
                .set_frame_count(config.frames_per_cycle)
                .await
                .map_err(DaqError::instrument)?;
        }

        let run_start = Instant::now();
        run.started = Some(run_start);
        info!(
            cycles = config.cycles,
            frames_per_cycle = config.frames_per_cycle,
            interval_s = config.cycle_interval.as_secs_f64(),
            warmup_s = config.led_warmup.as_secs_f64(),
            save = config.save,
            "Capture started"
        );

        let views = self.views();
        for cycle in 0..config.cycles {
            if self.cancel.is_cancelled() {
                info!(cycle, "Capture interrupted before cycle");
                return Ok(RunOutcome::Cancelled);
            }
            if let Some(pair) = self.pairs.iter().find(|pair| !pair.is_connected()) {
                return Err(DaqError::HardwareDisconnected(pair.view));
            }

            self.set_progress(SequencerState::Capturing, Some(cycle), config.cycles, 0);
            debug!(cycle, "Cycle started");

            for pair in &self.pairs {
                pair.illuminator
                    .turn_on()
                    .await
                    .map_err(DaqError::instrument)?;
            }
            sleep(config.led_warmup).await;
            for pair in &self.pairs {
                pair.camera.acq_start().await.map_err(DaqError::instrument)?;
            }

            let mut buffer = CycleBuffer::new(&views, config.frames_per_cycle);
            let mut datasets = Vec::new();
            let mut interrupted = false;

            for index in 0..config.frames_per_cycle {
                let preview = self.preview_index(&mut run.preview_fallback);
                for (slot, pair) in self.pairs.iter().enumerate() {
                    let frame = pair.camera.get_frame().await.map_err(DaqError::instrument)?;
                    run.check_shape(pair.view, &frame)?;
                    if slot == preview {
                        self.preview.publish(pair.view, frame.clone());
                    }
                    buffer.store(slot, index, frame);
                }
                run.frames_captured += self.pairs.len();

                if config.save {
                    if index == 0 {
                        if run.container.is_none() {
                            self.open_container(config, run)?;
                        }
                        datasets = self.create_datasets(config, run, cycle, run_start)?;
                    }
                    write_frames(run, &datasets, &buffer, index)?;
                }

                debug!(cycle, frame = index, "Frame captured");
                self.set_progress(SequencerState::Capturing, Some(cycle), config.cycles, index);

                if self.cancel.is_cancelled() {
                    interrupted = true;
                    break;
                }
            }

            for pair in &self.pairs {
                pair.camera.acq_stop().await.map_err(DaqError::instrument)?;
            }
            for pair in &self.pairs {
                pair.illuminator
                    .turn_off()
                    .await
                    .map_err(DaqError::instrument)?;
            }

            if interrupted {
                info!(cycle, captured = buffer.captured(), "Capture interrupted during cycle");
                return Ok(RunOutcome::Cancelled);
            }
            run.cycles_completed += 1;
            info!(
                cycle,
                elapsed_s = run_start.elapsed().as_secs_f64(),
                "Cycle complete"
            );
            drop(buffer);

            let deadline = cycle_deadline(run_start, config.cycle_interval, cycle)?;
            if !self.wait_until(deadline).await {
                info!(cycle, "Capture interrupted while waiting for next cycle");
                return Ok(if run.cycles_completed == config.cycles {
                    RunOutcome::Complete
                } else {
                    RunOutcome::Cancelled
                });
            }
        }

        Ok(RunOutcome::Complete)
    }

    /// Sleep in short steps until `deadline`. False when interrupted.
    async fn wait_until(&self, deadline: Instant) -> bool {
        loop {
            if self.cancel.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            sleep((deadline - now).min(CADENCE_POLL)).await;
        }
    }

    /// Index of the pair whose frames go to the preview slot.
    ///
    /// Falls back to the first active view when the selected one is not
    /// connected, warning once per selection.
    fn preview_index(&self, fallback: &mut Option<View>) -> usize {
        let selected = self.settings.camera_in_use.get();
        if let Some(index) = self.pairs.iter().position(|pair| pair.view == selected) {
            *fallback = None;
            return index;
        }
        if *fallback != Some(selected) {
            warn!(
                selected = %selected,
                shown = %self.pairs[0].view,
                "Selected preview view is not connected, showing first active view"
            );
            *fallback = Some(selected);
        }
        0
    }

    fn open_container(&self, config: &AcquisitionConfig, run: &mut Run) -> AppResult<()> {
        let created = Local::now();
        let path = if self.storage.persistent() {
            prepare_file_path(config, created)?
        } else {
            file_path(config, created)
        };
        let info = ContainerInfo::for_run(config, created).map_err(DaqError::storage)?;
        let container = self
            .storage
            .open(&path, &info)
            .map_err(DaqError::storage)?;
        info!(path = %path.display(), backend = self.storage.backend(), "Container opened");
        run.file = Some(path);
        run.container = Some(container);
        Ok(())
    }

    fn create_datasets(
        &self,
        config: &AcquisitionConfig,
        run: &mut Run,
        cycle: usize,
        run_start: Instant,
    ) -> AppResult<Vec<DatasetId>> {
        let (height, width) = run
            .frame_shape
            .ok_or_else(|| DaqError::Storage("no frame captured yet".to_string()))?;
        let container = run
            .container
            .as_mut()
            .ok_or_else(|| DaqError::Storage("container is not open".to_string()))?;
        let acquisition_time_s = run_start.elapsed().as_secs_f64();

        self.pairs
            .iter()
            .map(|pair| {
                let metadata = DatasetMetadata {
                    view: pair.view,
                    cycle_index: cycle,
                    acquisition_time_s,
                    frame_interval_s: config.cycle_interval.as_secs_f64(),
                    element_size_um: config.pixel_size.as_array(),
                };
                container
                    .create_dataset(
                        &dataset_path(&config.measurement_name, cycle, pair.view),
                        [config.frames_per_cycle, height, width],
                        &metadata,
                    )
                    .map_err(DaqError::storage)
            })
            .collect()
    }

    /// Stop every camera, switch every light off and close the container.
    async fn cleanup(&self, run: &mut Run) -> Vec<DaqError> {
        let mut errors = Vec::new();
        for pair in &self.pairs {
            if let Err(e) = pair.camera.acq_stop().await {
                errors.push(DaqError::instrument(
                    e.context(format!("stopping {}", pair.camera.name())),
                ));
            }
        }
        for pair in &self.pairs {
            if let Err(e) = pair.illuminator.turn_off().await {
                errors.push(DaqError::instrument(
                    e.context(format!("switching off {}", pair.illuminator.name())),
                ));
            }
        }
        if let Some(mut container) = run.container.take() {
            if let Err(e) = container.close() {
                errors.push(DaqError::storage(e));
            }
        }
        errors
    }

    async fn finish(
        &self,
        run_id: Uuid,
        mut run: Run,
        result: AppResult<RunOutcome>,
    ) -> AppResult<RunSummary> {
        let cleanup_errors = self.cleanup(&mut run).await;
        self.capture_requested.store(false, Ordering::SeqCst);
        let elapsed = run.started.map(|s| s.elapsed()).unwrap_or_default();
        let progress = self.progress();

        match result {
            Ok(outcome) if cleanup_errors.is_empty() => {
                let state = match outcome {
                    RunOutcome::Complete => SequencerState::Complete,
                    RunOutcome::Cancelled => SequencerState::Cancelled,
                };
                self.set_progress(
                    state,
                    progress.cycle_index,
                    progress.cycles_total,
                    progress.frame_index,
                );
                info!(
                    ?outcome,
                    cycles = run.cycles_completed,
                    frames = run.frames_captured,
                    elapsed_s = elapsed.as_secs_f64(),
                    "Measurement finished"
                );
                Ok(RunSummary {
                    run_id,
                    outcome,
                    cycles_completed: run.cycles_completed,
                    frames_captured: run.frames_captured,
                    file: run.file,
                    elapsed,
                })
            }
            Ok(_) => {
                self.set_progress(
                    SequencerState::Error,
                    progress.cycle_index,
                    progress.cycles_total,
                    progress.frame_index,
                );
                error!(errors = cleanup_errors.len(), "Hardware cleanup failed");
                Err(DaqError::ShutdownFailed(cleanup_errors))
            }
            Err(err) => {
                for cleanup_error in &cleanup_errors {
                    warn!(error = %cleanup_error, "Cleanup failed after aborted run");
                }
                self.set_progress(
                    SequencerState::Error,
                    progress.cycle_index,
                    progress.cycles_total,
                    progress.frame_index,
                );
                error!(error = %err, "Measurement aborted");
                Err(err)
            }
        }
    }

    fn set_progress(
        &self,
        state: SequencerState,
        cycle_index: Option<usize>,
        cycles_total: usize,
        frame_index: usize,
    ) {
        self.progress.send_replace(RunProgress {
            state,
            cycle_index,
            cycles_total,
            frame_index,
        });
    }
}

/// Start of cycle `cycle + 1`, anchored at `run_start`.
fn cycle_deadline(run_start: Instant, interval: Duration, cycle: usize) -> AppResult<Instant> {
    u32::try_from(cycle + 1)
        .ok()
        .and_then(|cycles| interval.checked_mul(cycles))
        .and_then(|offset| run_start.checked_add(offset))
        .ok_or_else(|| {
            DaqError::Configuration(format!(
                "cycle interval of {} s cannot be scheduled for {} cycles",
                interval.as_secs_f64(),
                cycle + 1
            ))
        })
}

fn write_frames(
    run: &mut Run,
    datasets: &[DatasetId],
    buffer: &CycleBuffer,
    index: usize,
) -> AppResult<()> {
    let container = run
        .container
        .as_mut()
        .ok_or_else(|| DaqError::Storage("container is not open".to_string()))?;
    for (slot, id) in datasets.iter().enumerate() {
        if let Some(frame) = buffer.get(slot, index) {
            container
                .write_frame(*id, index, frame)
                .map_err(DaqError::storage)?;
        }
    }
    container.flush().map_err(DaqError::storage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::{HardwareEventKind, HardwareLog, MockCamera, MockLed};
    use crate::storage::memory::MemoryContainerFactory;
    use tracing_test::traced_test;

    fn pair(view: View, width: usize, height: usize) -> ViewPair {
        ViewPair::new(
            view,
            Arc::new(MockCamera::new(format!("camera_{view}"), width, height)),
            Arc::new(MockLed::new(format!("led_{view}"))),
        )
    }

    async fn connected(pairs: Vec<ViewPair>) -> Vec<ViewPair> {
        for pair in &pairs {
            pair.camera.connect().await.unwrap();
            pair.illuminator.connect().await.unwrap();
        }
        pairs
    }

    #[test]
    fn test_requires_active_views() {
        let result = Sequencer::new(
            Vec::new(),
            Arc::new(MeasurementSettings::default()),
            Arc::new(MemoryContainerFactory::new()),
        );
        assert!(matches!(result, Err(DaqError::NoActiveViews)));
    }

    #[tokio::test]
    async fn test_pairs_sorted_by_view() {
        let sequencer = Sequencer::new(
            vec![pair(View::X, 2, 2), pair(View::Y, 2, 2)],
            Arc::new(MeasurementSettings::default()),
            Arc::new(MemoryContainerFactory::new()),
        )
        .unwrap();
        assert_eq!(sequencer.views(), vec![View::Y, View::X]);
    }

    #[test]
    fn test_shape_fixed_by_first_frame() {
        let mut run = Run::new();
        run.check_shape(View::Y, &Frame::filled(4, 3, 0)).unwrap();
        run.check_shape(View::X, &Frame::filled(4, 3, 0)).unwrap();
        let err = run.check_shape(View::X, &Frame::filled(3, 4, 0)).unwrap_err();
        assert!(matches!(
            err,
            DaqError::FrameShapeMismatch {
                view: View::X,
                expected_height: 3,
                expected_width: 4,
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_mismatched_cameras_fail_run() {
        let pairs = connected(vec![pair(View::Y, 4, 4), pair(View::X, 8, 4)]).await;
        let sequencer = Sequencer::new(
            pairs,
            Arc::new(MeasurementSettings::default()),
            Arc::new(MemoryContainerFactory::new()),
        )
        .unwrap();

        let config = sequencer.settings().snapshot();
        let err = sequencer.capture(config).await.unwrap_err();
        assert!(matches!(err, DaqError::FrameShapeMismatch { view: View::X, .. }));
        assert_eq!(sequencer.progress().state, SequencerState::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_run_after_completion() {
        let pairs = connected(vec![pair(View::Y, 2, 2)]).await;
        let sequencer = Sequencer::new(
            pairs,
            Arc::new(MeasurementSettings::default()),
            Arc::new(MemoryContainerFactory::new()),
        )
        .unwrap();

        let config = sequencer.settings().snapshot();
        let first = sequencer.capture(config.clone()).await.unwrap();
        let second = sequencer.capture(config).await.unwrap();
        assert_eq!(first.outcome, RunOutcome::Complete);
        assert_eq!(second.outcome, RunOutcome::Complete);
        assert_ne!(first.run_id, second.run_id);
    }

    #[test]
    fn test_cycle_deadline_overflow_is_an_error() {
        let start = Instant::now();
        assert_eq!(
            cycle_deadline(start, Duration::from_secs(2), 2).unwrap(),
            start + Duration::from_secs(6)
        );
        assert!(matches!(
            cycle_deadline(start, Duration::MAX, 0),
            Err(DaqError::Configuration(_))
        ));
        assert!(matches!(
            cycle_deadline(start, Duration::from_secs(u64::MAX / 2), 2),
            Err(DaqError::Configuration(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unschedulable_interval_fails_before_capture() {
        let log = HardwareLog::new();
        let pairs = connected(vec![ViewPair::new(
            View::Y,
            Arc::new(MockCamera::new("camera_Y", 2, 2).with_log(log.clone())),
            Arc::new(MockLed::new("led_Y").with_log(log.clone())),
        )])
        .await;
        let factory = Arc::new(MemoryContainerFactory::new());
        let store = factory.store();
        let settings = Arc::new(MeasurementSettings::default());
        settings.time_lapse_num.set(3).unwrap();
        settings.save_h5.set(true).unwrap();
        let sequencer = Sequencer::new(pairs, settings.clone(), factory).unwrap();

        let mut config = settings.snapshot();
        config.cycle_interval = Duration::from_secs(u64::MAX / 2);
        let err = sequencer.capture(config).await.unwrap_err();

        assert!(matches!(err, DaqError::Configuration(_)));
        assert_eq!(sequencer.progress().state, SequencerState::Error);
        assert!(log.frame_sources().is_empty());
        assert!(log.events_of(&HardwareEventKind::LedOn).is_empty());
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn test_absent_preview_view_falls_back_with_warning() {
        let pairs = connected(vec![pair(View::Y, 2, 2)]).await;
        let settings = Arc::new(MeasurementSettings::default());
        settings.camera_in_use.set(View::X).unwrap();
        settings.frame_num.set(3).unwrap();
        let sequencer = Sequencer::new(
            pairs,
            settings.clone(),
            Arc::new(MemoryContainerFactory::new()),
        )
        .unwrap();

        let summary = sequencer.capture(settings.snapshot()).await.unwrap();
        assert_eq!(summary.outcome, RunOutcome::Complete);
        assert_eq!(sequencer.preview_slot().latest().unwrap().view, View::Y);
        assert!(logs_contain("Selected preview view is not connected"));
    }
}
