//! Headless display refresher.
//!
//! Mirrors what the operator window shows while a measurement runs: the
//! latest preview frame, its display levels and the capture progress. It
//! only reads the preview slot and the progress channel, so it can never
//! hold up the acquisition worker.

use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{sleep, Duration};
use tracing::debug;

use crate::acquisition::{PreviewSlot, RunProgress, SequencerState};
use crate::hardware::View;
use crate::settings::MeasurementSettings;

/// Lower bound on the refresh period, so `refresh_period = 0` does not spin.
pub const MIN_REFRESH: Duration = Duration::from_millis(1);

/// What the display shows after one refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayUpdate {
    /// Run state at refresh time
    pub state: SequencerState,
    /// Capture progress in percent
    pub progress_percent: u8,
    /// View of the displayed frame
    pub view: Option<View>,
    /// Preview sequence number of the displayed frame
    pub frame_sequence: Option<u64>,
    /// `(height, width)` of the displayed frame
    pub shape: Option<(usize, usize)>,
    /// Display levels `(min, max)`; `None` with auto levels and no frame yet
    pub levels: Option<(u16, u16)>,
    /// Fit the view to the image
    pub auto_range: bool,
}

/// Periodically turns the preview slot into [`DisplayUpdate`]s.
pub struct DisplayRefresher {
    settings: Arc<MeasurementSettings>,
    preview: PreviewSlot,
    progress: watch::Receiver<RunProgress>,
}

impl DisplayRefresher {
    /// Create a refresher reading `preview` and `progress`.
    pub fn new(
        settings: Arc<MeasurementSettings>,
        preview: PreviewSlot,
        progress: watch::Receiver<RunProgress>,
    ) -> Self {
        Self {
            settings,
            preview,
            progress,
        }
    }

    /// Compute one update.
    ///
    /// With auto levels the frame's min/max is written back into the
    /// `level_min`/`level_max` settings; otherwise those settings are used.
    pub fn refresh(&self) -> DisplayUpdate {
        let progress = *self.progress.borrow();
        let latest = self.preview.latest();

        let levels = if self.settings.auto_levels.get() {
            latest
                .as_ref()
                .and_then(|preview| preview.frame.min_max())
                .map(|(low, high)| {
                    if let Err(e) = self.settings.level_min.set(low) {
                        debug!(error = %e, "Auto level minimum not applied");
                    }
                    if let Err(e) = self.settings.level_max.set(high) {
                        debug!(error = %e, "Auto level maximum not applied");
                    }
                    (low, high)
                })
        } else {
            Some((self.settings.level_min.get(), self.settings.level_max.get()))
        };

        DisplayUpdate {
            state: progress.state,
            progress_percent: progress.percent(),
            view: latest.as_ref().map(|p| p.view),
            frame_sequence: latest.as_ref().map(|p| p.sequence),
            shape: latest.as_ref().map(|p| p.frame.shape()),
            levels,
            auto_range: self.settings.auto_range.get(),
        }
    }

    /// Refresh every `refresh_period` until the run ends.
    ///
    /// `on_update` is called with every update, including a final one after
    /// the run reached a terminal state. Returns the number of updates.
    pub async fn run<F>(self, mut on_update: F) -> usize
    where
        F: FnMut(&DisplayUpdate),
    {
        let mut updates = 0;
        loop {
            sleep(self.settings.refresh_interval().max(MIN_REFRESH)).await;

            let update = self.refresh();
            debug!(
                state = %update.state,
                progress = update.progress_percent,
                view = ?update.view,
                levels = ?update.levels,
                "Display refreshed"
            );
            on_update(&update);
            updates += 1;

            if update.state.is_terminal() {
                return updates;
            }
        }
    }
}
