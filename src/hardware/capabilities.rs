//! Hardware Capabilities
//!
//! This module defines the capability traits the acquisition sequencer drives.
//! A view of the rig is one [`Camera`] paired with one [`Illuminator`]; vendor
//! drivers (or the simulated devices in [`crate::hardware::mock`]) implement
//! these traits and the sequencer only ever talks to the trait objects.
//!
//! # Design Philosophy
//!
//! Each capability trait:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync)
//! - Uses anyhow::Result for errors
//! - Uses `&self` with interior mutability, so handles can be shared as `Arc<dyn _>`
//!
//! # Example
//!
//! ```rust,ignore
//! async fn grab_one(camera: &dyn Camera, led: &dyn Illuminator) -> Result<Frame> {
//!     led.turn_on().await?;
//!     camera.acq_start().await?;
//!     let frame = camera.get_frame().await;
//!     camera.acq_stop().await?;
//!     led.turn_off().await?;
//!     frame
//! }
//! ```

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::hardware::Frame;

/// Camera acquisition mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AcquisitionMode {
    /// Free-running stream, used for live preview.
    Continuous,
    /// A fixed number of frames per `acq_start`, set by `set_frame_count`.
    MultiFrame,
}

/// Capability: Frame Production
///
/// # Contract
/// - `connect()` returns `Ok(false)` when the device is simply absent and
///   `Err` when talking to it failed
/// - `acq_start()` / `acq_stop()` are idempotent
/// - `get_frame()` waits until a frame is available; calling it while not
///   acquiring is an error
/// - In `MultiFrame` mode at most `frame_count()` frames are delivered per
///   `acq_start()`
#[async_trait]
pub trait Camera: Send + Sync {
    /// Human readable device name (e.g. "camera_y").
    fn name(&self) -> &str;

    /// Open the device.
    ///
    /// # Returns
    /// - Ok(true) if the device is present and ready
    /// - Ok(false) if the device is not present
    /// - Err on communication failure
    async fn connect(&self) -> Result<bool>;

    /// Whether the device currently reports a live connection.
    fn is_connected(&self) -> bool;

    /// Refresh cached device settings (geometry, frame count) from hardware.
    async fn read_from_hardware(&self) -> Result<()> {
        Ok(())
    }

    /// Switch between continuous streaming and multi-frame acquisition.
    async fn set_acquisition_mode(&self, mode: AcquisitionMode) -> Result<()>;

    /// Start acquisition.
    async fn acq_start(&self) -> Result<()>;

    /// Stop acquisition.
    async fn acq_stop(&self) -> Result<()>;

    /// Number of frames per acquisition in `MultiFrame` mode.
    async fn set_frame_count(&self, count: usize) -> Result<()>;

    /// Currently configured frame count.
    fn frame_count(&self) -> usize;

    /// Wait for and return the next frame.
    ///
    /// # Returns
    /// - Ok(frame) when a frame was read out
    /// - Err if not acquiring, the multi-frame budget is spent, or on hardware error
    async fn get_frame(&self) -> Result<Frame>;
}

/// Capability: Illumination
///
/// # Contract
/// - `turn_on()` / `turn_off()` are idempotent
/// - The light level may need time to settle after `turn_on()`; the caller
///   owns that delay
#[async_trait]
pub trait Illuminator: Send + Sync {
    /// Human readable device name (e.g. "led_y").
    fn name(&self) -> &str;

    /// Open the device. Same semantics as [`Camera::connect`].
    async fn connect(&self) -> Result<bool>;

    /// Whether the device currently reports a live connection.
    fn is_connected(&self) -> bool;

    /// Switch the light on.
    async fn turn_on(&self) -> Result<()>;

    /// Switch the light off.
    async fn turn_off(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FlagLed {
        on: AtomicBool,
    }

    #[async_trait]
    impl Illuminator for FlagLed {
        fn name(&self) -> &str {
            "flag_led"
        }

        async fn connect(&self) -> Result<bool> {
            Ok(true)
        }

        fn is_connected(&self) -> bool {
            true
        }

        async fn turn_on(&self) -> Result<()> {
            self.on.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn turn_off(&self) -> Result<()> {
            self.on.store(false, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_illuminator_trait_object() {
        let led = FlagLed {
            on: AtomicBool::new(false),
        };
        let handle: &dyn Illuminator = &led;

        handle.turn_on().await.unwrap();
        assert!(led.on.load(Ordering::SeqCst));

        // Idempotent
        handle.turn_off().await.unwrap();
        handle.turn_off().await.unwrap();
        assert!(!led.on.load(Ordering::SeqCst));
    }
}
