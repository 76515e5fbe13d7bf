use thiserror::Error;

/// Failure to obtain a screen-share source.
#[derive(Error, Debug)]
pub enum AcquireError {
    #[error("Screen share permission denied: {reason}")]
    PermissionDenied { reason: String },

    #[error("Screen share device failed: {0:#}")]
    Device(#[from] anyhow::Error),

    #[error("Screen share produced no frames before it ended")]
    EndedBeforeFirstFrame,
}

/// Rejected inputs to the compositing stages.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CompositeError {
    #[error("Mask is {mask_width}x{mask_height} but frame is {frame_width}x{frame_height}")]
    MaskSize {
        mask_width: u32,
        mask_height: u32,
        frame_width: u32,
        frame_height: u32,
    },

    #[error("Pixel buffer holds {actual} bytes, expected {expected}")]
    BufferSize { expected: usize, actual: usize },
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Unsupported reduced height {0}; expected one of 720, 540, 450, 360, 270, 180, 90, 9")]
    ReducedHeight(u32),

    #[error("Frame budget must be greater than zero")]
    ZeroFrameBudget,
}
