use super::Surface;
use crate::config::ReducedHeight;
use image::RgbaImage;

/// Size of the reduced frame for a `width`×`height` source: exactly
/// `max_height` tall, width scaled by the source aspect ratio.
///
/// Returns `None` for a source that has not negotiated a size yet, or one so
/// narrow that the reduced width rounds to zero.
pub fn reduced_size(width: u32, height: u32, max_height: ReducedHeight) -> Option<(u32, u32)> {
    if width == 0 || height == 0 {
        return None;
    }
    let target_h = max_height.pixels();
    let target_w = (target_h as f64 * (width as f64 / height as f64)).round() as u32;
    if target_w == 0 {
        return None;
    }
    Some((target_w, target_h))
}

/// Redraw `reduced` from the live `frame` at the reduced size.
pub fn downscale_into(reduced: &mut Surface, frame: &RgbaImage, max_height: ReducedHeight) -> bool {
    let _span = tracing::debug_span!("downscale").entered();

    let Some((width, height)) = reduced_size(frame.width(), frame.height(), max_height) else {
        return false;
    };
    reduced.resize(width, height);
    reduced.draw(frame, 0.0, 0.0, width as f64, height as f64);
    true
}
