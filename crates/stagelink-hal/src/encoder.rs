//! Image compression interface.

use stagelink_types::LinkError;

use crate::camera::RawFrame;

/// Compresses raw frames.  Shared across sessions, so implementations must
/// be thread-safe.
pub trait FrameEncoder: Send + Sync {
    /// Encode `frame` at `quality` (1–100, higher is better).
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Codec`] when the frame cannot be compressed.
    fn encode(&self, frame: &RawFrame, quality: u8) -> Result<Vec<u8>, LinkError>;
}
