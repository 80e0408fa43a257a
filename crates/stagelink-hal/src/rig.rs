//! [`HardwareRig`] – the station's driver set.
//!
//! The rig owns the stage controller, the camera and the encoder, each behind
//! a handle that can be cloned into concurrent tasks.  Both devices are
//! optional: a rig without a stage runs the command path in its "no hardware"
//! mode, a rig without a camera simply publishes no frames.
//!
//! Initialisation failures are logged and reported through [`RigStatus`]; they
//! never abort the caller, so the session can proceed degraded and retry later.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{info, warn};

use crate::camera::{FrameSource, Resolution};
use crate::encoder::FrameEncoder;
use crate::stage::MotionController;

/// Shareable handle to the stage controller.
pub type SharedStage = Arc<Mutex<Box<dyn MotionController>>>;

/// Shareable handle to the camera.
pub type SharedCamera = Arc<Mutex<Box<dyn FrameSource>>>;

/// Lock a driver mutex, recovering the guard if a previous holder panicked.
///
/// A panicking driver call must not wedge every later caller; the driver's
/// own `is_ready` state is the source of truth after a panic.
pub fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Readiness of each device after an initialise or reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RigStatus {
    /// `None` when no stage is attached.
    pub stage_ready: Option<bool>,
    /// `None` when no camera is attached.
    pub camera_ready: Option<bool>,
}

impl RigStatus {
    /// `true` when an attached device failed to come up.
    pub fn is_degraded(&self) -> bool {
        self.stage_ready == Some(false) || self.camera_ready == Some(false)
    }
}

/// Central driver set for one station.
///
/// Cloning is cheap; all clones share the same drivers.
#[derive(Clone)]
pub struct HardwareRig {
    stage: Option<SharedStage>,
    camera: Option<SharedCamera>,
    encoder: Arc<dyn FrameEncoder>,
    resolution: Resolution,
}

impl HardwareRig {
    /// Create a rig with only an encoder attached.
    pub fn new(encoder: Arc<dyn FrameEncoder>) -> Self {
        Self {
            stage: None,
            camera: None,
            encoder,
            resolution: Resolution::default(),
        }
    }

    /// Attach the stage controller (builder-style).
    pub fn with_stage(mut self, stage: Box<dyn MotionController>) -> Self {
        self.stage = Some(Arc::new(Mutex::new(stage)));
        self
    }

    /// Attach the camera (builder-style).
    pub fn with_camera(mut self, camera: Box<dyn FrameSource>) -> Self {
        self.camera = Some(Arc::new(Mutex::new(camera)));
        self
    }

    pub fn with_resolution(mut self, resolution: Resolution) -> Self {
        self.resolution = resolution;
        self
    }

    pub fn stage(&self) -> Option<&SharedStage> {
        self.stage.as_ref()
    }

    pub fn camera(&self) -> Option<&SharedCamera> {
        self.camera.as_ref()
    }

    pub fn encoder(&self) -> &Arc<dyn FrameEncoder> {
        &self.encoder
    }

    /// Bring up every attached device that is not already ready.  Blocking.
    pub fn initialize(&self) -> RigStatus {
        let stage_ready = self.stage.as_ref().map(|stage| {
            let mut stage = lock(stage);
            if stage.is_ready() {
                return true;
            }
            match stage.initialize() {
                Ok(()) => {
                    info!(stage = stage.id(), "stage initialized");
                    true
                }
                Err(e) => {
                    warn!(stage = stage.id(), error = %e, "stage initialization failed");
                    false
                }
            }
        });

        let camera_ready = self.camera.as_ref().map(|camera| {
            let mut camera = lock(camera);
            if camera.is_ready() {
                return true;
            }
            match camera.initialize(self.resolution) {
                Ok(()) => {
                    info!(camera = camera.id(), width = self.resolution.width, height = self.resolution.height, "camera initialized");
                    true
                }
                Err(e) => {
                    warn!(camera = camera.id(), error = %e, "camera initialization failed");
                    false
                }
            }
        });

        RigStatus {
            stage_ready,
            camera_ready,
        }
    }

    /// Stop and shut down every attached device.  Blocking.
    pub fn shutdown(&self) {
        if let Some(stage) = &self.stage {
            let mut stage = lock(stage);
            if stage.is_ready() {
                if let Err(e) = stage.stop() {
                    warn!(stage = stage.id(), error = %e, "stop before shutdown failed");
                }
            }
            stage.shutdown();
        }
        if let Some(camera) = &self.camera {
            lock(camera).shutdown();
        }
    }

    /// Full hardware reset: shut everything down, then initialise again.
    /// Blocking.
    pub fn reset(&self) -> RigStatus {
        info!("hardware reset: shutting down stage and camera");
        self.shutdown();
        self.initialize()
    }

    /// Current readiness without touching the devices.
    pub fn status(&self) -> RigStatus {
        RigStatus {
            stage_ready: self.stage.as_ref().map(|s| lock(s).is_ready()),
            camera_ready: self.camera.as_ref().map(|c| lock(c).is_ready()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimCamera, SimEncoder, SimStage};

    #[test]
    fn empty_rig_is_not_degraded() {
        let rig = HardwareRig::new(Arc::new(SimEncoder));
        let status = rig.initialize();
        assert_eq!(status.stage_ready, None);
        assert_eq!(status.camera_ready, None);
        assert!(!status.is_degraded());
    }

    #[test]
    fn initialize_brings_up_sim_devices() {
        let rig = HardwareRig::new(Arc::new(SimEncoder))
            .with_stage(Box::new(SimStage::new("x_stage")))
            .with_camera(Box::new(SimCamera::new("scope_cam")));
        let status = rig.initialize();
        assert_eq!(status.stage_ready, Some(true));
        assert_eq!(status.camera_ready, Some(true));
        assert_eq!(rig.status(), status);
    }

    #[test]
    fn failed_stage_init_is_reported_not_raised() {
        let stage = SimStage::new("x_stage");
        stage.handle().set_fail_initialize(true);
        let rig = HardwareRig::new(Arc::new(SimEncoder)).with_stage(Box::new(stage));
        let status = rig.initialize();
        assert_eq!(status.stage_ready, Some(false));
        assert!(status.is_degraded());
    }

    #[test]
    fn reset_reinitializes_devices() {
        let stage = SimStage::new("x_stage");
        let handle = stage.handle();
        let rig = HardwareRig::new(Arc::new(SimEncoder)).with_stage(Box::new(stage));
        rig.initialize();
        let before = handle.initialize_count();

        let status = rig.reset();
        assert_eq!(status.stage_ready, Some(true));
        assert_eq!(handle.initialize_count(), before + 1);
        assert!(handle.shutdown_count() >= 1);
    }

    #[test]
    fn shutdown_marks_devices_not_ready() {
        let rig = HardwareRig::new(Arc::new(SimEncoder))
            .with_stage(Box::new(SimStage::new("x_stage")))
            .with_camera(Box::new(SimCamera::new("scope_cam")));
        rig.initialize();
        rig.shutdown();
        let status = rig.status();
        assert_eq!(status.stage_ready, Some(false));
        assert_eq!(status.camera_ready, Some(false));
    }
}
