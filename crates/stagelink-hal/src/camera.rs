//! Generic `FrameSource` trait and supporting types for image-capture hardware.

use stagelink_types::LinkError;

/// Requested capture resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Default for Resolution {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
        }
    }
}

/// A raw image frame returned by a camera driver.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    /// Raw pixel data (e.g. RGB24 or greyscale).
    pub data: Vec<u8>,
}

/// A camera or image-capture device.
pub trait FrameSource: Send {
    /// Stable identifier for this camera, e.g. `"scope_cam"`.
    fn id(&self) -> &str;

    /// Open the device at `resolution`.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::HardwareFault`] if the device cannot be opened.
    fn initialize(&mut self, resolution: Resolution) -> Result<(), LinkError>;

    /// Capture and return the next available frame.
    ///
    /// Sources may buffer internally, so the returned frame is not
    /// necessarily the newest one; callers that fall behind should capture
    /// and discard to flush.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::HardwareFault`] if the frame cannot be captured
    /// (e.g. the device is disconnected or the buffer is unavailable).
    fn capture(&mut self) -> Result<RawFrame, LinkError>;

    fn shutdown(&mut self);

    fn is_ready(&self) -> bool;
}
