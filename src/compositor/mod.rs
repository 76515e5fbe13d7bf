//! Per-frame raster stages: downscale, matte, background, placement.

mod background;
mod downscale;
mod matte;
mod placement;
mod raster;

pub use background::{render_background, Backdrop};
pub use downscale::{downscale_into, reduced_size};
pub use matte::{extract_matte, update_matte, NOT_PERSON};
pub use placement::{place, placement_rect, PlacementPreset, PlacementSpec, Rect};
pub use raster::Surface;
