use super::FrameSource;
use anyhow::{Context, Result};
use image::RgbaImage;
use nokhwa::pixel_format::RgbAFormat;
use nokhwa::utils::{
    CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType, Resolution,
};
use nokhwa::Camera;

pub struct WebcamCapture {
    camera: Camera,
    width: u32,
    height: u32,
}

impl WebcamCapture {
    /// Open capture device `device_index` at the format closest to the
    /// requested size and rate.
    pub fn new(device_index: u32, width: u32, height: u32, fps: u32) -> Result<Self> {
        tracing::info!(
            "Initializing capture device {} at {}x{}@{}",
            device_index,
            width,
            height,
            fps
        );

        let index = CameraIndex::Index(device_index);
        let wanted = CameraFormat::new(Resolution::new(width, height), FrameFormat::MJPEG, fps);
        let requested = RequestedFormat::new::<RgbAFormat>(RequestedFormatType::Closest(wanted));

        let mut camera = Camera::new(index, requested)
            .with_context(|| format!("Failed to open capture device {device_index}"))?;

        camera
            .open_stream()
            .context("Failed to open camera stream")?;

        let negotiated = camera.resolution();
        tracing::info!(
            "Capture device {} negotiated {}x{}",
            device_index,
            negotiated.width(),
            negotiated.height()
        );

        Ok(Self {
            camera,
            width: negotiated.width(),
            height: negotiated.height(),
        })
    }
}

impl FrameSource for WebcamCapture {
    fn capture_frame(&mut self) -> Result<RgbaImage> {
        let frame = self
            .camera
            .frame()
            .context("Failed to capture frame")?;

        let decoded = frame
            .decode_image::<RgbAFormat>()
            .context("Failed to decode frame")?;

        Ok(decoded)
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl Drop for WebcamCapture {
    fn drop(&mut self) {
        if let Err(e) = self.camera.stop_stream() {
            tracing::warn!("Failed to stop camera stream: {}", e);
        }
    }
}
