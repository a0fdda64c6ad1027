//! Sequencer state and run progress.
//!
//! The acquisition worker publishes a [`RunProgress`] on every state change
//! and cycle boundary, so the display refresher and the CLI can follow a run
//! without touching the worker.

use serde::{Deserialize, Serialize};

/// Acquisition sequencer state.
///
/// # State Machine
///
/// ```text
/// Idle ──start──> Previewing ──save_h5──> Capturing ──all cycles──> Complete
///                     │                       │
///                 interrupt               interrupt ──> Cancelled
///                     │                       │
///                     ▼                   failure ────> Error
///                 Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SequencerState {
    /// No run in progress
    Idle,
    /// Live preview, nothing is persisted
    Previewing,
    /// Time-lapse capture in progress
    Capturing,
    /// Every cycle ran
    Complete,
    /// Interrupted by the operator
    Cancelled,
    /// A hardware or storage failure ended the run
    Error,
}

impl std::fmt::Display for SequencerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SequencerState::Idle => write!(f, "Idle"),
            SequencerState::Previewing => write!(f, "Previewing"),
            SequencerState::Capturing => write!(f, "Capturing"),
            SequencerState::Complete => write!(f, "Complete"),
            SequencerState::Cancelled => write!(f, "Cancelled"),
            SequencerState::Error => write!(f, "Error"),
        }
    }
}

impl SequencerState {
    /// Check if the state allows starting a new run.
    pub fn can_begin(&self) -> bool {
        matches!(
            self,
            SequencerState::Idle
                | SequencerState::Complete
                | SequencerState::Cancelled
                | SequencerState::Error
        )
    }

    /// Whether a run is in progress.
    pub fn is_active(&self) -> bool {
        matches!(self, SequencerState::Previewing | SequencerState::Capturing)
    }

    /// Whether the state ends a run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SequencerState::Complete | SequencerState::Cancelled | SequencerState::Error
        )
    }
}

/// Snapshot of where a run is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunProgress {
    /// Current state
    pub state: SequencerState,
    /// Cycle being captured, if capturing has started
    pub cycle_index: Option<usize>,
    /// Total cycles of the capture (0 before capture)
    pub cycles_total: usize,
    /// Frame index within the current cycle
    pub frame_index: usize,
}

impl Default for RunProgress {
    fn default() -> Self {
        Self {
            state: SequencerState::Idle,
            cycle_index: None,
            cycles_total: 0,
            frame_index: 0,
        }
    }
}

impl RunProgress {
    /// Progress of the capture in percent, `(cycle + 1) * 100 / cycles`.
    ///
    /// Zero while previewing.
    pub fn percent(&self) -> u8 {
        match self.cycle_index {
            Some(cycle) if self.cycles_total > 0 => {
                ((cycle + 1) * 100 / self.cycles_total).min(100) as u8
            }
            _ => 0,
        }
    }
}
