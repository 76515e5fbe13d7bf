//! Picture-in-picture webcam compositing.
//!
//! A live webcam frame is optionally cut out with a person-segmentation
//! model, placed at a fixed layout over a background (a still image, a
//! screen share, or the previous output) and emitted as a continuously
//! updated frame stream.

pub mod capture;
pub mod compositor;
pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod segmentation;

pub use config::{PipelineConfig, ReducedHeight};
pub use error::{AcquireError, CompositeError, ConfigError};
pub use pipeline::{BackgroundSelection, Pip, RenderHandle};
