use crate::error::CompositeError;
use image::{imageops, Rgba, RgbaImage};
use std::borrow::Cow;

/// Filter used whenever a blit has to rescale its source.
/// Triangle keeps per-tick cost low; the reduced frame is only fed to the model.
const BLIT_FILTER: imageops::FilterType = imageops::FilterType::Triangle;

/// An owned RGBA raster with canvas-like semantics.
///
/// Resizing always clears the buffer to transparent black, even when the new
/// size equals the old one. Blits scale the source into the destination
/// rectangle, clip against the surface bounds and blend source-over.
#[derive(Debug, Clone, Default)]
pub struct Surface {
    pixels: RgbaImage,
}

impl Surface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    /// Resize and clear.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.pixels = RgbaImage::new(width, height);
    }

    /// Draw `source` scaled to `dst_w`×`dst_h` with its top-left corner at
    /// (`dst_x`, `dst_y`). Fractional geometry is rounded to whole pixels.
    pub fn draw(&mut self, source: &RgbaImage, dst_x: f64, dst_y: f64, dst_w: f64, dst_h: f64) {
        let width = dst_w.round();
        let height = dst_h.round();
        if width < 1.0 || height < 1.0 || source.width() == 0 || source.height() == 0 {
            return;
        }
        if self.is_empty() {
            return;
        }

        let (width, height) = (width as u32, height as u32);
        let scaled: Cow<'_, RgbaImage> = if source.dimensions() == (width, height) {
            Cow::Borrowed(source)
        } else {
            Cow::Owned(imageops::resize(source, width, height, BLIT_FILTER))
        };

        let origin_x = dst_x.round() as i64;
        let origin_y = dst_y.round() as i64;
        let (surface_w, surface_h) = (self.width() as i64, self.height() as i64);

        for (x, y, pixel) in scaled.enumerate_pixels() {
            let tx = origin_x + x as i64;
            let ty = origin_y + y as i64;
            if tx < 0 || ty < 0 || tx >= surface_w || ty >= surface_h {
                continue;
            }
            let target = self.pixels.get_pixel_mut(tx as u32, ty as u32);
            blend_over(target, pixel);
        }
    }

    /// Draw the surface onto itself. The source is snapshotted first so the
    /// copy never reads pixels it has already written.
    pub fn draw_self(&mut self, dst_x: f64, dst_y: f64, dst_w: f64, dst_h: f64) {
        let snapshot = self.pixels.clone();
        self.draw(&snapshot, dst_x, dst_y, dst_w, dst_h);
    }

    /// Flat row-major RGBA bytes.
    pub fn read_pixels(&self) -> &[u8] {
        self.pixels.as_raw()
    }

    /// Replace the surface with `buffer`, resizing to `width`×`height`.
    pub fn write_pixels(
        &mut self,
        buffer: Vec<u8>,
        width: u32,
        height: u32,
    ) -> Result<(), CompositeError> {
        let actual = buffer.len();
        let expected = width as usize * height as usize * 4;
        self.pixels = RgbaImage::from_raw(width, height, buffer)
            .ok_or(CompositeError::BufferSize { expected, actual })?;
        Ok(())
    }

    pub fn image(&self) -> &RgbaImage {
        &self.pixels
    }
}

/// Source-over blend in integer arithmetic. Opaque sources copy verbatim.
fn blend_over(dst: &mut Rgba<u8>, src: &Rgba<u8>) {
    let src_a = src[3] as u32;
    if src_a == 255 {
        *dst = *src;
        return;
    }
    if src_a == 0 {
        return;
    }

    let dst_a = dst[3] as u32;
    let inv = 255 - src_a;
    // Output alpha scaled by 255.
    let out_a = src_a * 255 + dst_a * inv;
    if out_a == 0 {
        *dst = Rgba([0, 0, 0, 0]);
        return;
    }

    let mut out = [0u8; 4];
    for c in 0..3 {
        let premul = src[c] as u32 * src_a * 255 + dst[c] as u32 * dst_a * inv;
        out[c] = ((premul + out_a / 2) / out_a).min(255) as u8;
    }
    out[3] = ((out_a + 127) / 255).min(255) as u8;
    *dst = Rgba(out);
}
