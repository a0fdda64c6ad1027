//! Rig assembly and connection.
//!
//! A [`Rig`] owns the camera and illumination handles registered for each
//! view. [`Rig::connect`] talks to every device once and returns the views
//! that can take part in a run: a view is active only when both its camera
//! and its illuminator are connected, so the number of active cameras always
//! equals the number of active illuminators.

use futures::future::try_join;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use super::capabilities::{Camera, Illuminator};
use super::View;
use crate::error::{AppResult, DaqError};

/// One camera and its paired illuminator at a fixed view position.
#[derive(Clone)]
pub struct ViewPair {
    /// View position
    pub view: View,
    /// Camera handle
    pub camera: Arc<dyn Camera>,
    /// Illumination handle
    pub illuminator: Arc<dyn Illuminator>,
}

impl ViewPair {
    /// Create a pair.
    pub fn new(view: View, camera: Arc<dyn Camera>, illuminator: Arc<dyn Illuminator>) -> Self {
        Self {
            view,
            camera,
            illuminator,
        }
    }

    /// Both halves still report connected.
    pub fn is_connected(&self) -> bool {
        self.camera.is_connected() && self.illuminator.is_connected()
    }
}

impl std::fmt::Debug for ViewPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewPair")
            .field("view", &self.view)
            .field("camera", &self.camera.name())
            .field("illuminator", &self.illuminator.name())
            .finish()
    }
}

/// Registered hardware of the rig, keyed by view.
#[derive(Default)]
pub struct Rig {
    cameras: BTreeMap<View, Arc<dyn Camera>>,
    illuminators: BTreeMap<View, Arc<dyn Illuminator>>,
}

impl Rig {
    /// Create a rig with no hardware.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the camera for a view, replacing any previous one.
    pub fn with_camera(mut self, view: View, camera: Arc<dyn Camera>) -> Self {
        self.cameras.insert(view, camera);
        self
    }

    /// Register the illuminator for a view, replacing any previous one.
    pub fn with_illuminator(mut self, view: View, illuminator: Arc<dyn Illuminator>) -> Self {
        self.illuminators.insert(view, illuminator);
        self
    }

    /// Connect every registered device and return the active pairs in view order.
    ///
    /// Devices that are absent are skipped; a view with only one half
    /// connected is left out with a warning. Communication errors propagate.
    pub async fn connect(&self) -> AppResult<Vec<ViewPair>> {
        let mut active = Vec::new();

        for view in View::ALL {
            let camera = match self.cameras.get(&view) {
                Some(camera) => camera,
                None => continue,
            };
            let illuminator = match self.illuminators.get(&view) {
                Some(illuminator) => illuminator,
                None => {
                    warn!(%view, "No illuminator registered, view disabled");
                    continue;
                }
            };

            let (camera_up, led_up) = try_join(camera.connect(), illuminator.connect())
                .await
                .map_err(DaqError::instrument)?;

            match (camera_up, led_up) {
                (true, true) => {
                    camera
                        .read_from_hardware()
                        .await
                        .map_err(DaqError::instrument)?;
                    info!(
                        %view,
                        camera = camera.name(),
                        illuminator = illuminator.name(),
                        "View connected"
                    );
                    active.push(ViewPair::new(view, camera.clone(), illuminator.clone()));
                }
                (camera_up, led_up) => {
                    warn!(
                        %view,
                        camera_connected = camera_up,
                        illuminator_connected = led_up,
                        "View incomplete, excluded from runs"
                    );
                }
            }
        }

        if active.is_empty() {
            warn!("No view connected");
        }
        Ok(active)
    }
}
