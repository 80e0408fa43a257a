//! In-process simulated drivers for tests and for running without attached
//! hardware.
//!
//! Each simulated device keeps its state behind a shared handle so that a
//! test can keep inspecting (and poking) the device after it has been boxed
//! into a [`HardwareRig`][crate::rig::HardwareRig].
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use stagelink_hal::rig::HardwareRig;
//! use stagelink_hal::sim::{SimEncoder, SimStage};
//!
//! let stage = SimStage::new("x_stage");
//! let handle = stage.handle();
//! let rig = HardwareRig::new(Arc::new(SimEncoder)).with_stage(Box::new(stage));
//! rig.initialize();
//!
//! let mut guard = stagelink_hal::lock(rig.stage().unwrap());
//! guard.step(1.5).unwrap();
//! drop(guard);
//! assert!((handle.position() - 1.5).abs() < 1e-12);
//! ```

use std::sync::{Arc, Mutex};
use std::time::Duration;

use stagelink_types::LinkError;

use crate::camera::{FrameSource, RawFrame, Resolution};
use crate::encoder::FrameEncoder;
use crate::rig::lock;
use crate::stage::{FaultFlag, MotionController, MotionLimits, ScanRange};

// ────────────────────────────────────────────────────────────────────────────
// Simulated stage
// ────────────────────────────────────────────────────────────────────────────

/// One directive received by a [`SimStage`], in call order.
#[derive(Debug, Clone, PartialEq)]
pub enum StageCall {
    Initialize,
    Shutdown,
    SetSpeed(f64),
    SetAcceleration(f64),
    SetDeceleration(f64),
    Step(f64),
    MoveToReference,
    StartScan(ScanRange, u32),
    Stop,
    ClearFaults,
    FlushIo,
}

#[derive(Debug, Default)]
struct SimStageState {
    ready: bool,
    position: f64,
    reference: f64,
    faults: Vec<FaultFlag>,
    /// Faults to latch after the next motion directive.
    pending_faults: Vec<FaultFlag>,
    fail_initialize: bool,
    failing_reads: u32,
    calls: Vec<StageCall>,
    initialize_count: u32,
    shutdown_count: u32,
}

/// Test/inspection handle onto a [`SimStage`]'s state.
#[derive(Debug, Clone, Default)]
pub struct SimStageHandle {
    state: Arc<Mutex<SimStageState>>,
}

impl SimStageHandle {
    pub fn position(&self) -> f64 {
        lock(&self.state).position
    }

    pub fn set_position(&self, mm: f64) {
        lock(&self.state).position = mm;
    }

    pub fn calls(&self) -> Vec<StageCall> {
        lock(&self.state).calls.clone()
    }

    /// Directives that move the stage (steps, homing, scans).
    pub fn motion_calls(&self) -> Vec<StageCall> {
        self.calls()
            .into_iter()
            .filter(|c| {
                matches!(
                    c,
                    StageCall::Step(_) | StageCall::MoveToReference | StageCall::StartScan(..)
                )
            })
            .collect()
    }

    /// Latch `fault` immediately.
    pub fn inject_fault(&self, fault: FaultFlag) {
        lock(&self.state).faults.push(fault);
    }

    /// Latch `fault` as a consequence of the next motion directive.
    pub fn fault_on_next_motion(&self, fault: FaultFlag) {
        lock(&self.state).pending_faults.push(fault);
    }

    pub fn set_fail_initialize(&self, fail: bool) {
        lock(&self.state).fail_initialize = fail;
    }

    /// Make the next `n` position reads fail.
    pub fn fail_position_reads(&self, n: u32) {
        lock(&self.state).failing_reads = n;
    }

    pub fn initialize_count(&self) -> u32 {
        lock(&self.state).initialize_count
    }

    pub fn shutdown_count(&self) -> u32 {
        lock(&self.state).shutdown_count
    }

    pub fn is_ready(&self) -> bool {
        lock(&self.state).ready
    }
}

/// A simulated stage that moves instantly and records every directive.
pub struct SimStage {
    id: String,
    limits: MotionLimits,
    handle: SimStageHandle,
}

impl SimStage {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            limits: MotionLimits::default(),
            handle: SimStageHandle::default(),
        }
    }

    /// Override the reference (home) position, in mm.
    pub fn with_reference(self, reference_mm: f64) -> Self {
        lock(&self.handle.state).reference = reference_mm;
        self
    }

    pub fn with_limits(mut self, limits: MotionLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn handle(&self) -> SimStageHandle {
        self.handle.clone()
    }

    fn directive(&mut self, call: StageCall) -> Result<(), LinkError> {
        let mut state = lock(&self.handle.state);
        if !state.ready {
            return Err(LinkError::NotReady(format!("{} is not initialized", self.id)));
        }
        let is_motion = matches!(
            call,
            StageCall::Step(_) | StageCall::MoveToReference | StageCall::StartScan(..)
        );
        match &call {
            StageCall::Step(d) => state.position += d,
            StageCall::MoveToReference => state.position = state.reference,
            StageCall::StartScan(range, _) => {
                state.position = (range.start_mm + range.end_mm) / 2.0;
            }
            StageCall::ClearFaults => state.faults.clear(),
            _ => {}
        }
        state.calls.push(call);
        if is_motion {
            let pending = std::mem::take(&mut state.pending_faults);
            state.faults.extend(pending);
        }
        Ok(())
    }
}

impl MotionController for SimStage {
    fn id(&self) -> &str {
        &self.id
    }

    fn initialize(&mut self) -> Result<(), LinkError> {
        let mut state = lock(&self.handle.state);
        state.calls.push(StageCall::Initialize);
        state.initialize_count += 1;
        if state.fail_initialize {
            return Err(LinkError::hardware(&self.id, "simulated initialization failure"));
        }
        state.ready = true;
        Ok(())
    }

    fn shutdown(&mut self) {
        let mut state = lock(&self.handle.state);
        state.calls.push(StageCall::Shutdown);
        state.shutdown_count += 1;
        state.ready = false;
    }

    fn is_ready(&self) -> bool {
        lock(&self.handle.state).ready
    }

    fn limits(&self) -> MotionLimits {
        self.limits
    }

    fn set_speed(&mut self, mm_per_s: f64) -> Result<(), LinkError> {
        self.directive(StageCall::SetSpeed(mm_per_s))
    }

    fn set_acceleration(&mut self, mm_per_s2: f64) -> Result<(), LinkError> {
        self.directive(StageCall::SetAcceleration(mm_per_s2))
    }

    fn set_deceleration(&mut self, mm_per_s2: f64) -> Result<(), LinkError> {
        self.directive(StageCall::SetDeceleration(mm_per_s2))
    }

    fn step(&mut self, signed_mm: f64) -> Result<(), LinkError> {
        self.directive(StageCall::Step(signed_mm))
    }

    fn move_to_reference(&mut self) -> Result<(), LinkError> {
        self.directive(StageCall::MoveToReference)
    }

    fn position(&mut self) -> Result<f64, LinkError> {
        let mut state = lock(&self.handle.state);
        if !state.ready {
            return Err(LinkError::NotReady(format!("{} is not initialized", self.id)));
        }
        if state.failing_reads > 0 {
            state.failing_reads -= 1;
            return Err(LinkError::hardware(&self.id, "simulated encoder read timeout"));
        }
        Ok(state.position)
    }

    fn start_scan(&mut self, range: ScanRange, cycles: u32) -> Result<(), LinkError> {
        self.directive(StageCall::StartScan(range, cycles))
    }

    fn stop(&mut self) -> Result<(), LinkError> {
        self.directive(StageCall::Stop)
    }

    fn fault_status(&mut self) -> Result<Vec<FaultFlag>, LinkError> {
        Ok(lock(&self.handle.state).faults.clone())
    }

    fn clear_faults(&mut self) -> Result<(), LinkError> {
        self.directive(StageCall::ClearFaults)
    }

    fn flush_io(&mut self) -> Result<(), LinkError> {
        self.directive(StageCall::FlushIo)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Simulated camera
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct SimCameraState {
    ready: bool,
    resolution: Option<Resolution>,
    captures: u64,
    capture_delay: Duration,
    fail_initialize: bool,
}

/// Test/inspection handle onto a [`SimCamera`]'s state.
#[derive(Debug, Clone, Default)]
pub struct SimCameraHandle {
    state: Arc<Mutex<SimCameraState>>,
}

impl SimCameraHandle {
    /// Total frames captured, including flushed ones.
    pub fn captures(&self) -> u64 {
        lock(&self.state).captures
    }

    /// Block every capture for `delay`, emulating a slow sensor.
    pub fn set_capture_delay(&self, delay: Duration) {
        lock(&self.state).capture_delay = delay;
    }

    pub fn set_fail_initialize(&self, fail: bool) {
        lock(&self.state).fail_initialize = fail;
    }
}

/// A simulated greyscale camera.  Each frame's pixels are filled with the low
/// byte of its capture counter so frames are distinguishable.
pub struct SimCamera {
    id: String,
    handle: SimCameraHandle,
}

impl SimCamera {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            handle: SimCameraHandle::default(),
        }
    }

    pub fn handle(&self) -> SimCameraHandle {
        self.handle.clone()
    }
}

impl FrameSource for SimCamera {
    fn id(&self) -> &str {
        &self.id
    }

    fn initialize(&mut self, resolution: Resolution) -> Result<(), LinkError> {
        let mut state = lock(&self.handle.state);
        if state.fail_initialize {
            return Err(LinkError::hardware(&self.id, "simulated camera open failure"));
        }
        state.resolution = Some(resolution);
        state.ready = true;
        Ok(())
    }

    fn capture(&mut self) -> Result<RawFrame, LinkError> {
        let (delay, resolution, counter) = {
            let mut state = lock(&self.handle.state);
            let Some(resolution) = state.resolution.filter(|_| state.ready) else {
                return Err(LinkError::NotReady(format!("{} is not initialized", self.id)));
            };
            state.captures += 1;
            (state.capture_delay, resolution, state.captures)
        };
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        // Keep simulated frames small regardless of the requested resolution.
        let width = resolution.width.min(64);
        let height = resolution.height.min(48);
        Ok(RawFrame {
            width,
            height,
            data: vec![(counter & 0xff) as u8; (width * height) as usize],
        })
    }

    fn shutdown(&mut self) {
        lock(&self.handle.state).ready = false;
    }

    fn is_ready(&self) -> bool {
        lock(&self.handle.state).ready
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Simulated encoder
// ────────────────────────────────────────────────────────────────────────────

/// Deterministic stand-in for a JPEG encoder.
///
/// Output is a two-byte header (`0xFF`, quality) followed by a prefix of the
/// pixel data proportional to `quality`, so lower quality yields fewer bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimEncoder;

impl FrameEncoder for SimEncoder {
    fn encode(&self, frame: &RawFrame, quality: u8) -> Result<Vec<u8>, LinkError> {
        if frame.data.is_empty() {
            return Err(LinkError::Codec("cannot encode an empty frame".to_string()));
        }
        let quality = quality.clamp(1, 100);
        let keep = (frame.data.len() * quality as usize).div_ceil(100);
        let mut out = Vec::with_capacity(keep + 2);
        out.push(0xff);
        out.push(quality);
        out.extend_from_slice(&frame.data[..keep]);
        Ok(out)
    }
}
