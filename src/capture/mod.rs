mod live;
mod screen_share;
mod v4l_capture;

pub use live::{FramePublisher, LiveSource};
pub use screen_share::{CaptureDeviceScreenShare, ScreenShareProvider};
pub use v4l_capture::WebcamCapture;

use anyhow::Result;
use image::RgbaImage;

/// Trait for camera capture sources
///
/// Implementations block until the next frame is available.
pub trait FrameSource {
    /// Capture a single frame
    fn capture_frame(&mut self) -> Result<RgbaImage>;

    /// Get the resolution the device negotiated
    fn resolution(&self) -> (u32, u32);
}
