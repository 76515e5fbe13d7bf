use crate::error::CompositeError;
use anyhow::Result;
use async_trait::async_trait;
use image::RgbaImage;

/// Person/not-person classification of one frame.
///
/// `data[y * width + x] == 0` means background, any other value means person.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentationMask {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl SegmentationMask {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self, CompositeError> {
        let expected = width as usize * height as usize;
        if data.len() != expected {
            return Err(CompositeError::BufferSize {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { width, height, data })
    }

    /// Threshold a soft alpha matte (0.0 = background, 1.0 = foreground).
    pub fn from_alpha(width: u32, height: u32, alpha: &[f32], threshold: f32) -> Result<Self, CompositeError> {
        let data = alpha.iter().map(|&a| u8::from(a >= threshold)).collect();
        Self::new(width, height, data)
    }

    pub fn pixel_count(&self) -> usize {
        self.data.len()
    }
}

/// Trait for segmentation models
/// Allows swapping between different backends (RVM, MODNet, MediaPipe, etc.)
#[async_trait]
pub trait Segmenter: Send {
    /// Classify every pixel of `frame`.
    ///
    /// The returned mask has exactly the frame's dimensions.
    async fn segment(&mut self, frame: &RgbaImage) -> Result<SegmentationMask>;

    /// Reset internal state (for models with temporal/recurrent components)
    ///
    /// Call this when:
    /// - Switching cameras
    /// - Starting a new video session
    fn reset_state(&mut self) {
        // Default implementation: no-op for stateless models
    }
}
