use super::Surface;
use image::RgbaImage;

/// Background resolved for one tick.
#[derive(Debug, Clone, Copy)]
pub enum Backdrop<'a> {
    /// No virtual background: the previous output is kept in place.
    None,
    /// A still picture.
    Image(&'a RgbaImage),
    /// The current screen-share frame, if one has arrived.
    Stream(Option<&'a RgbaImage>),
}

/// Render the background into `output` ahead of the foreground.
///
/// `raw_size` is the webcam's native size. It is the reference resolution for
/// still images and the extent of the self-copy when no background is set.
pub fn render_background(output: &mut Surface, backdrop: Backdrop<'_>, raw_size: (u32, u32)) {
    let _span = tracing::debug_span!("background").entered();
    let (raw_w, raw_h) = raw_size;

    match backdrop {
        Backdrop::Image(still) => {
            output.resize(raw_w, raw_h);
            output.draw(still, 0.0, 0.0, raw_w as f64, raw_h as f64);
        }
        Backdrop::Stream(frame) => {
            let (width, height) = frame.map(|f| f.dimensions()).unwrap_or((0, 0));
            output.resize(width, height);
            if let Some(frame) = frame {
                output.draw(frame, 0.0, 0.0, width as f64, height as f64);
            }
        }
        Backdrop::None => {
            if output.is_empty() {
                output.resize(raw_w, raw_h);
            }
            output.draw_self(0.0, 0.0, raw_w as f64, raw_h as f64);
        }
    }
}
