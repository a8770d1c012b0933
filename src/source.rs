use crate::error::{AcquireError, StreamError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Which direction the preferred camera should face.
///
/// A hint only: providers that cannot tell (fixed webcams, V4L2 nodes)
/// ignore it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraFacing {
    /// Outward/rear-facing camera, preferred for scanning
    Rear,
    /// User-facing camera
    Front,
}

/// Constraints handed to a camera provider when acquiring a stream.
#[derive(Debug, Clone)]
pub struct AcquireRequest {
    pub facing: CameraFacing,
    pub ideal_width: u32,
    pub ideal_height: u32,
}

impl Default for AcquireRequest {
    fn default() -> Self {
        Self {
            facing: CameraFacing::Rear,
            ideal_width: 1280,
            ideal_height: 720,
        }
    }
}

/// A live camera stream owned by exactly one scan session.
///
/// Implementations must be fully set up when the provider hands them out:
/// playback has begun and `dimensions` reports the negotiated frame size.
/// Per-frame readiness is still polled through `has_usable_frame` — a stream
/// that is alive but has not delivered a frame yet reports `Ok(false)`,
/// never an error.
pub trait FrameSource: Send {
    /// Negotiated frame dimensions (width, height) in pixels.
    fn dimensions(&self) -> (u32, u32);

    /// Whether a frame is ready to be copied out right now.
    ///
    /// `Err` means the stream is unrecoverably gone, not that no frame is
    /// available.
    fn has_usable_frame(&mut self) -> Result<bool, StreamError>;

    /// Copy the current frame into `buffer` as tightly packed RGBA.
    ///
    /// `buffer` must hold exactly `width * height * 4` bytes. Only valid
    /// after `has_usable_frame` returned `Ok(true)` for this tick.
    fn copy_into(&mut self, buffer: &mut [u8], width: u32, height: u32)
        -> Result<(), StreamError>;

    /// Stop every underlying media track and free the device.
    ///
    /// Must be idempotent. The session calls this exactly once per terminal
    /// transition.
    fn release(&mut self);
}

/// Capability for opening camera streams.
#[async_trait]
pub trait CameraProvider: Send {
    type Source: FrameSource;

    /// Whether the platform offers any camera capability at all.
    ///
    /// Checked by the session before attempting acquisition so that a
    /// missing capability is reported as such, not as a failed acquire.
    fn is_available(&self) -> bool;

    /// Open a stream honoring the request as closely as the hardware allows.
    ///
    /// Resolves only once playback has begun. Refusals are normalized into
    /// the three `AcquireError` kinds; platform detail strings are for
    /// logging only.
    async fn acquire(&mut self, request: &AcquireRequest) -> Result<Self::Source, AcquireError>;
}
