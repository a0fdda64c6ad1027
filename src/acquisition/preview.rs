//! Preview handoff between the worker and the display.
//!
//! [`PreviewSlot`] holds at most one frame: every publish overwrites the
//! previous one and readers always get the most recent frame. There is no
//! queue and no backpressure, so a slow display simply skips frames.

use std::sync::Arc;
use tokio::sync::watch;

use crate::hardware::{Frame, View};

/// Frame published for display, tagged with its source.
#[derive(Debug, Clone, PartialEq)]
pub struct PreviewFrame {
    /// View that produced the frame
    pub view: View,
    /// Number of frames published before this one
    pub sequence: u64,
    /// Image data
    pub frame: Arc<Frame>,
}

/// Single-slot, overwrite-on-write frame cell.
#[derive(Debug, Clone)]
pub struct PreviewSlot {
    sender: Arc<watch::Sender<Option<PreviewFrame>>>,
}

impl Default for PreviewSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl PreviewSlot {
    /// Create an empty slot.
    pub fn new() -> Self {
        let (sender, _) = watch::channel(None);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Replace the slot content. Never blocks and never fails.
    pub fn publish(&self, view: View, frame: Frame) {
        self.sender.send_modify(|slot| {
            let sequence = slot.as_ref().map_or(0, |p| p.sequence + 1);
            *slot = Some(PreviewFrame {
                view,
                sequence,
                frame: Arc::new(frame),
            });
        });
    }

    /// Most recent frame, if any was published.
    pub fn latest(&self) -> Option<PreviewFrame> {
        self.sender.borrow().clone()
    }

    /// Watch the slot for new frames.
    pub fn subscribe(&self) -> watch::Receiver<Option<PreviewFrame>> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_keeps_only_latest() {
        let slot = PreviewSlot::new();
        assert!(slot.latest().is_none());

        slot.publish(View::Y, Frame::filled(2, 2, 1));
        slot.publish(View::X, Frame::filled(2, 2, 2));

        let latest = slot.latest().unwrap();
        assert_eq!(latest.view, View::X);
        assert_eq!(latest.sequence, 1);
        assert_eq!(latest.frame.pixels[0], 2);
    }

    #[tokio::test]
    async fn test_subscriber_sees_updates() {
        let slot = PreviewSlot::new();
        let mut rx = slot.subscribe();
        let writer = slot.clone();

        writer.publish(View::Y, Frame::filled(1, 1, 7));
        rx.changed().await.unwrap();
        let frame = rx.borrow().clone().unwrap();
        assert_eq!(frame.frame.pixels, vec![7]);
    }
}
