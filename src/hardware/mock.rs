//! Mock Hardware Implementations
//!
//! Provides simulated cameras and illumination sources for running the rig
//! without physical hardware. All mock devices use async-safe operations
//! (tokio::time::sleep, not std::thread::sleep), so they also work under a
//! paused tokio clock in tests.
//!
//! # Available Mocks
//!
//! - `MockCamera` - Simulated camera with continuous and multi-frame acquisition
//! - `MockLed` - Simulated on/off illumination source
//! - `simulated_rig` - Both views built from the `[hardware]` configuration
//!
//! Devices can share a [`HardwareLog`] that records every state change in
//! order, which is how tests check fetch order and cleanup.
//!
//! # Frame Pattern
//!
//! Pixel 0 of every frame is `base_value + sequence` (wrapping), where
//! `sequence` counts frames since the camera was created, starting at 1.
//! The remaining pixels carry a small ramp plus optional noise.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::time::{sleep, Duration, Instant};
use tracing::debug;

use crate::config::{CameraConfig, HardwareConfig, LedConfig};
use crate::hardware::capabilities::{AcquisitionMode, Camera, Illuminator};
use crate::hardware::rig::Rig;
use crate::hardware::{Frame, View};

// =============================================================================
// HardwareLog - Shared Event Recorder
// =============================================================================

/// What happened to a simulated device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HardwareEventKind {
    /// Camera acquisition mode changed
    ModeSet(AcquisitionMode),
    /// Camera frame count changed
    FrameCountSet(usize),
    /// Camera acquisition started
    AcqStart,
    /// Camera acquisition stopped
    AcqStop,
    /// Camera delivered frame with the given sequence number
    Frame(u64),
    /// Illumination switched on
    LedOn,
    /// Illumination switched off
    LedOff,
}

/// One entry of a [`HardwareLog`].
#[derive(Debug, Clone)]
pub struct HardwareEvent {
    /// Device name
    pub device: String,
    /// Event kind
    pub kind: HardwareEventKind,
    /// Time on the tokio clock
    pub at: Instant,
}

/// Ordered, shareable record of simulated hardware activity.
#[derive(Debug, Clone, Default)]
pub struct HardwareLog {
    events: Arc<Mutex<Vec<HardwareEvent>>>,
}

impl HardwareLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, device: &str, kind: HardwareEventKind) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(HardwareEvent {
                device: device.to_string(),
                kind,
                at: Instant::now(),
            });
    }

    /// Snapshot of every recorded event.
    pub fn events(&self) -> Vec<HardwareEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Events of a single kind, in order.
    pub fn events_of(&self, kind: &HardwareEventKind) -> Vec<HardwareEvent> {
        self.events()
            .into_iter()
            .filter(|e| &e.kind == kind)
            .collect()
    }

    /// Device names of every delivered frame, in order.
    pub fn frame_sources(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|e| matches!(e.kind, HardwareEventKind::Frame(_)))
            .map(|e| e.device)
            .collect()
    }

    /// Forget everything recorded so far.
    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

// =============================================================================
// MockCamera - Simulated Camera
// =============================================================================

/// Mock camera with continuous and multi-frame acquisition
///
/// Simulates a camera with:
/// - Configurable resolution
/// - Configurable readout time per frame (default 10ms)
/// - Multi-frame budget per `acq_start`
/// - Optional failure after a number of frames
///
/// # Example
///
/// ```rust,ignore
/// let camera = MockCamera::new("camera_y", 640, 480).with_base_value(1000);
/// camera.connect().await?;
/// camera.acq_start().await?;
/// let frame = camera.get_frame().await?;
/// ```
pub struct MockCamera {
    name: String,
    width: usize,
    height: usize,
    base_value: u16,
    noise_amplitude: u16,
    readout: Duration,
    present: bool,
    fail_after: Option<u64>,
    connected: AtomicBool,
    acquiring: AtomicBool,
    multi_frame: AtomicBool,
    frame_count: AtomicUsize,
    frames_this_acquisition: AtomicUsize,
    sequence: AtomicU64,
    log: HardwareLog,
}

impl MockCamera {
    /// Create new mock camera with specified resolution
    ///
    /// # Arguments
    /// * `name` - Device name
    /// * `width` - Frame width in pixels
    /// * `height` - Frame height in pixels
    pub fn new(name: impl Into<String>, width: usize, height: usize) -> Self {
        Self {
            name: name.into(),
            width,
            height,
            base_value: 100,
            noise_amplitude: 0,
            readout: Duration::from_millis(10),
            present: true,
            fail_after: None,
            connected: AtomicBool::new(false),
            acquiring: AtomicBool::new(false),
            multi_frame: AtomicBool::new(false),
            frame_count: AtomicUsize::new(1),
            frames_this_acquisition: AtomicUsize::new(0),
            sequence: AtomicU64::new(0),
            log: HardwareLog::new(),
        }
    }

    /// Value of pixel 0 before the sequence number is added.
    pub fn with_base_value(mut self, base_value: u16) -> Self {
        self.base_value = base_value;
        self
    }

    /// Add uniform noise of up to `amplitude` counts to every pixel but the first.
    pub fn with_noise(mut self, amplitude: u16) -> Self {
        self.noise_amplitude = amplitude;
        self
    }

    /// Time spent in `get_frame` before the frame is returned.
    pub fn with_readout(mut self, readout: Duration) -> Self {
        self.readout = readout;
        self
    }

    /// Record activity into a shared log.
    pub fn with_log(mut self, log: HardwareLog) -> Self {
        self.log = log;
        self
    }

    /// Simulate a device that is not plugged in: `connect()` returns false.
    pub fn absent(mut self) -> Self {
        self.present = false;
        self
    }

    /// Fail every `get_frame` after `frames` frames have been delivered.
    pub fn fail_after(mut self, frames: u64) -> Self {
        self.fail_after = Some(frames);
        self
    }

    /// Drop the connection, as if the cable was pulled.
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Whether acquisition is running.
    pub fn is_acquiring(&self) -> bool {
        self.acquiring.load(Ordering::SeqCst)
    }

    /// Total frames delivered since creation.
    pub fn frames_delivered(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    fn render(&self, sequence: u64) -> Frame {
        let mut rng = rand::thread_rng();
        let first = self.base_value.wrapping_add(sequence as u16);
        let pixels = (0..self.width * self.height)
            .map(|i| {
                if i == 0 {
                    return first;
                }
                let ramp = first.wrapping_add((i % 64) as u16);
                if self.noise_amplitude > 0 {
                    ramp.wrapping_add(rng.gen_range(0..=self.noise_amplitude))
                } else {
                    ramp
                }
            })
            .collect();

        Frame {
            width: self.width,
            height: self.height,
            pixels,
        }
    }
}

#[async_trait]
impl Camera for MockCamera {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> Result<bool> {
        self.connected.store(self.present, Ordering::SeqCst);
        debug!(device = %self.name, present = self.present, "MockCamera connect");
        Ok(self.present)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn read_from_hardware(&self) -> Result<()> {
        debug!(
            device = %self.name,
            width = self.width,
            height = self.height,
            frame_count = self.frame_count(),
            "MockCamera settings read"
        );
        Ok(())
    }

    async fn set_acquisition_mode(&self, mode: AcquisitionMode) -> Result<()> {
        if self.is_acquiring() {
            anyhow::bail!("{}: cannot change acquisition mode while acquiring", self.name);
        }
        self.multi_frame
            .store(mode == AcquisitionMode::MultiFrame, Ordering::SeqCst);
        self.log.record(&self.name, HardwareEventKind::ModeSet(mode));
        Ok(())
    }

    async fn acq_start(&self) -> Result<()> {
        if !self.is_connected() {
            anyhow::bail!("{}: not connected", self.name);
        }
        self.frames_this_acquisition.store(0, Ordering::SeqCst);
        self.acquiring.store(true, Ordering::SeqCst);
        self.log.record(&self.name, HardwareEventKind::AcqStart);
        Ok(())
    }

    async fn acq_stop(&self) -> Result<()> {
        self.acquiring.store(false, Ordering::SeqCst);
        self.log.record(&self.name, HardwareEventKind::AcqStop);
        Ok(())
    }

    async fn set_frame_count(&self, count: usize) -> Result<()> {
        if count == 0 {
            return Err(anyhow!("{}: frame count must be at least 1", self.name));
        }
        self.frame_count.store(count, Ordering::SeqCst);
        self.log
            .record(&self.name, HardwareEventKind::FrameCountSet(count));
        Ok(())
    }

    fn frame_count(&self) -> usize {
        self.frame_count.load(Ordering::SeqCst)
    }

    async fn get_frame(&self) -> Result<Frame> {
        if !self.is_connected() {
            anyhow::bail!("{}: not connected", self.name);
        }
        if !self.is_acquiring() {
            anyhow::bail!("{}: get_frame called while not acquiring", self.name);
        }
        if self.multi_frame.load(Ordering::SeqCst)
            && self.frames_this_acquisition.load(Ordering::SeqCst) >= self.frame_count()
        {
            anyhow::bail!(
                "{}: multi-frame budget of {} frames exhausted",
                self.name,
                self.frame_count()
            );
        }
        if let Some(limit) = self.fail_after {
            if self.frames_delivered() >= limit {
                anyhow::bail!("{}: simulated readout failure", self.name);
            }
        }

        sleep(self.readout).await;

        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        self.frames_this_acquisition.fetch_add(1, Ordering::SeqCst);
        self.log
            .record(&self.name, HardwareEventKind::Frame(sequence));
        Ok(self.render(sequence))
    }
}

// =============================================================================
// MockLed - Simulated Illumination
// =============================================================================

/// Mock LED driver with on/off state.
pub struct MockLed {
    name: String,
    present: bool,
    connected: AtomicBool,
    on: AtomicBool,
    log: HardwareLog,
}

impl MockLed {
    /// Create a new mock LED, initially off.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            present: true,
            connected: AtomicBool::new(false),
            on: AtomicBool::new(false),
            log: HardwareLog::new(),
        }
    }

    /// Record activity into a shared log.
    pub fn with_log(mut self, log: HardwareLog) -> Self {
        self.log = log;
        self
    }

    /// Simulate a device that is not plugged in.
    pub fn absent(mut self) -> Self {
        self.present = false;
        self
    }

    /// Drop the connection.
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Whether the light is on.
    pub fn is_on(&self) -> bool {
        self.on.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Illuminator for MockLed {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> Result<bool> {
        self.connected.store(self.present, Ordering::SeqCst);
        Ok(self.present)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn turn_on(&self) -> Result<()> {
        if !self.is_connected() {
            anyhow::bail!("{}: not connected", self.name);
        }
        self.on.store(true, Ordering::SeqCst);
        self.log.record(&self.name, HardwareEventKind::LedOn);
        Ok(())
    }

    async fn turn_off(&self) -> Result<()> {
        self.on.store(false, Ordering::SeqCst);
        self.log.record(&self.name, HardwareEventKind::LedOff);
        Ok(())
    }
}

// =============================================================================
// Simulated Rig
// =============================================================================

/// Build a rig of simulated devices from the `[hardware]` configuration.
///
/// Disabled devices are registered as absent, so they fail to connect the
/// way an unplugged device would.
pub fn simulated_rig(config: &HardwareConfig, log: &HardwareLog) -> Rig {
    let cameras = [(View::Y, &config.camera_y), (View::X, &config.camera_x)];
    let leds = [(View::Y, &config.led_y), (View::X, &config.led_x)];

    let rig = cameras
        .into_iter()
        .fold(Rig::new(), |rig, (view, camera)| {
            rig.with_camera(view, Arc::new(simulated_camera(view, camera, log)))
        });
    leds.into_iter().fold(rig, |rig, (view, led)| {
        rig.with_illuminator(view, Arc::new(simulated_led(view, led, log)))
    })
}

fn simulated_camera(view: View, config: &CameraConfig, log: &HardwareLog) -> MockCamera {
    let camera = MockCamera::new(format!("camera_{}", view), config.width, config.height)
        .with_base_value(config.base_value)
        .with_noise(config.noise)
        .with_readout(Duration::from_millis(config.readout_ms))
        .with_log(log.clone());
    if config.enabled {
        camera
    } else {
        camera.absent()
    }
}

fn simulated_led(view: View, config: &LedConfig, log: &HardwareLog) -> MockLed {
    let led = MockLed::new(format!("led_{}", view)).with_log(log.clone());
    if config.enabled {
        led
    } else {
        led.absent()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_mock_camera_requires_acquisition() {
        let camera = MockCamera::new("cam", 4, 4);
        camera.connect().await.unwrap();

        // Not acquiring yet
        assert!(camera.get_frame().await.is_err());

        camera.acq_start().await.unwrap();
        let frame = camera.get_frame().await.unwrap();
        assert_eq!(frame.shape(), (4, 4));
        assert_eq!(frame.pixels[0], 101);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mock_camera_multi_frame_budget() {
        let camera = MockCamera::new("cam", 2, 2);
        camera.connect().await.unwrap();
        camera
            .set_acquisition_mode(AcquisitionMode::MultiFrame)
            .await
            .unwrap();
        camera.set_frame_count(2).await.unwrap();
        camera.acq_start().await.unwrap();

        camera.get_frame().await.unwrap();
        camera.get_frame().await.unwrap();
        assert!(camera.get_frame().await.is_err());

        // Restarting acquisition resets the budget
        camera.acq_stop().await.unwrap();
        camera.acq_start().await.unwrap();
        assert!(camera.get_frame().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_mock_camera_continuous_has_no_budget() {
        let camera = MockCamera::new("cam", 2, 2);
        camera.connect().await.unwrap();
        camera.set_frame_count(1).await.unwrap();
        camera.acq_start().await.unwrap();
        for _ in 0..5 {
            camera.get_frame().await.unwrap();
        }
        assert_eq!(camera.frames_delivered(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mock_camera_readout_time() {
        let camera = MockCamera::new("cam", 2, 2).with_readout(Duration::from_millis(40));
        camera.connect().await.unwrap();
        camera.acq_start().await.unwrap();

        let start = Instant::now();
        camera.get_frame().await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_millis(40));
    }

    #[tokio::test(start_paused = true)]
    async fn test_mock_camera_fail_after() {
        let camera = MockCamera::new("cam", 2, 2).fail_after(1);
        camera.connect().await.unwrap();
        camera.acq_start().await.unwrap();
        assert!(camera.get_frame().await.is_ok());
        let err = camera.get_frame().await.unwrap_err();
        assert!(err.to_string().contains("simulated readout failure"));
    }

    #[tokio::test]
    async fn test_absent_devices_do_not_connect() {
        let camera = MockCamera::new("cam", 2, 2).absent();
        let led = MockLed::new("led").absent();
        assert!(!camera.connect().await.unwrap());
        assert!(!led.connect().await.unwrap());
        assert!(!camera.is_connected());
        assert!(led.turn_on().await.is_err());
    }

    #[tokio::test]
    async fn test_simulated_rig_from_config() {
        let mut config = HardwareConfig::default();
        config.led_x.enabled = false;

        let pairs = simulated_rig(&config, &HardwareLog::new())
            .connect()
            .await
            .unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].view, View::Y);
        assert_eq!(pairs[0].camera.name(), "camera_Y");
    }

    #[tokio::test]
    async fn test_shared_log_records_order() {
        let log = HardwareLog::new();
        let camera = MockCamera::new("cam", 2, 2).with_log(log.clone());
        let led = MockLed::new("led").with_log(log.clone());
        camera.connect().await.unwrap();
        led.connect().await.unwrap();

        led.turn_on().await.unwrap();
        camera.acq_start().await.unwrap();
        camera.get_frame().await.unwrap();
        camera.acq_stop().await.unwrap();
        led.turn_off().await.unwrap();

        let kinds: Vec<_> = log.events().into_iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                HardwareEventKind::LedOn,
                HardwareEventKind::AcqStart,
                HardwareEventKind::Frame(1),
                HardwareEventKind::AcqStop,
                HardwareEventKind::LedOff,
            ]
        );
        assert!(!led.is_on());
    }
}
