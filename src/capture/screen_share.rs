use super::{FrameSource, LiveSource, WebcamCapture};
use crate::error::AcquireError;
use async_trait::async_trait;

/// Acquires a screen-share stream on request.
#[async_trait]
pub trait ScreenShareProvider: Send + Sync {
    async fn acquire(&self) -> Result<LiveSource, AcquireError>;
}

/// Screen share read from a capture device, e.g. a v4l2loopback node fed by
/// a desktop grabber.
#[derive(Debug, Clone)]
pub struct CaptureDeviceScreenShare {
    pub device_index: u32,
    pub max_width: u32,
    pub max_height: u32,
    pub max_fps: u32,
}

impl CaptureDeviceScreenShare {
    pub fn new(device_index: u32) -> Self {
        Self {
            device_index,
            max_width: 1280,
            max_height: 720,
            max_fps: 10,
        }
    }
}

#[async_trait]
impl ScreenShareProvider for CaptureDeviceScreenShare {
    async fn acquire(&self) -> Result<LiveSource, AcquireError> {
        let Self {
            device_index,
            max_width,
            max_height,
            max_fps,
        } = self.clone();

        let source = LiveSource::spawn_device("screen-share", move || {
            let capture = WebcamCapture::new(device_index, max_width, max_height, max_fps)?;
            Ok(Box::new(capture) as Box<dyn FrameSource>)
        })
        .await
        .map_err(|e| {
            if is_permission_error(&e) {
                AcquireError::PermissionDenied {
                    reason: format!("{e:#}"),
                }
            } else {
                AcquireError::Device(e)
            }
        })?;

        Ok(source)
    }
}

fn is_permission_error(error: &anyhow::Error) -> bool {
    error.chain().any(|cause| {
        cause
            .downcast_ref::<std::io::Error>()
            .is_some_and(|io| io.kind() == std::io::ErrorKind::PermissionDenied)
            || cause.to_string().contains("Permission denied")
    })
}
