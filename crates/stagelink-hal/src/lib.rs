//! `stagelink-hal` – Hardware Abstraction Layer
//!
//! The station talks to three external collaborators, each behind a trait so
//! drivers can be swapped without touching the session logic:
//!
//! - [`stage`] – [`MotionController`][stage::MotionController]: the motor
//!   controller of the linear stage (steps, homing, scans, fault flags).
//! - [`camera`] – [`FrameSource`][camera::FrameSource]: returns one raw image
//!   per capture call.
//! - [`encoder`] – [`FrameEncoder`][encoder::FrameEncoder]: compresses a raw
//!   frame at a given quality.
//! - [`rig`] – [`HardwareRig`][rig::HardwareRig]: bundles the three behind
//!   shareable mutex handles and owns initialisation and full resets.
//! - [`sim`] – simulated drivers for tests and for running without attached
//!   hardware.
//!
//! Every driver call may block the calling OS thread; callers in async code
//! are expected to offload them to a blocking worker.

pub mod camera;
pub mod encoder;
pub mod rig;
pub mod sim;
pub mod stage;

pub use camera::{FrameSource, RawFrame, Resolution};
pub use encoder::FrameEncoder;
pub use rig::{HardwareRig, RigStatus, SharedCamera, SharedStage, lock};
pub use stage::{Bound, FaultFlag, MotionController, MotionLimits, ScanRange};
