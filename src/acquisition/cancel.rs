//! Cooperative cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Interrupt request shared between the operator side and the worker.
///
/// Setting the flag never stops anything by itself; the sequencer polls it
/// after every preview fetch, after every captured frame, before every cycle
/// and while waiting for the next cycle.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag {
    inner: Arc<AtomicBool>,
}

impl CancellationFlag {
    /// Create a cleared flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request an interrupt.
    pub fn cancel(&self) {
        self.inner.store(true, Ordering::SeqCst);
    }

    /// Whether an interrupt was requested.
    pub fn is_cancelled(&self) -> bool {
        self.inner.load(Ordering::SeqCst)
    }

    /// Clear the flag before a new run.
    pub fn reset(&self) {
        self.inner.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_state() {
        let flag = CancellationFlag::new();
        let remote = flag.clone();
        assert!(!flag.is_cancelled());

        remote.cancel();
        assert!(flag.is_cancelled());

        flag.reset();
        assert!(!remote.is_cancelled());
    }
}
