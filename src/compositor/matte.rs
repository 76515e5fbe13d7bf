use super::Surface;
use crate::error::CompositeError;
use crate::segmentation::SegmentationMask;

/// Mask value marking a pixel as background.
pub const NOT_PERSON: u8 = 0;

/// Apply a binary mask to an RGBA buffer of the same size.
///
/// Background pixels become transparent black, person pixels are copied
/// verbatim. There is no feathering at the mask boundary.
pub fn extract_matte(mask: &SegmentationMask, frame_rgba: &[u8]) -> Result<Vec<u8>, CompositeError> {
    let pixel_count = mask.width as usize * mask.height as usize;
    let expected = pixel_count * 4;
    if frame_rgba.len() != expected {
        return Err(CompositeError::BufferSize {
            expected,
            actual: frame_rgba.len(),
        });
    }
    if mask.data.len() != pixel_count {
        return Err(CompositeError::BufferSize {
            expected: pixel_count,
            actual: mask.data.len(),
        });
    }

    let mut matte = vec![0u8; expected];
    for (i, class) in mask.data.iter().enumerate() {
        if *class == NOT_PERSON {
            continue;
        }
        let offset = i * 4;
        matte[offset..offset + 4].copy_from_slice(&frame_rgba[offset..offset + 4]);
    }
    Ok(matte)
}

/// Rebuild the matte surface from `mask` and the reduced frame.
///
/// A zero-pixel mask leaves the matte cleared at the output surface's size;
/// its content carries nothing to draw.
pub fn update_matte(
    matte: &mut Surface,
    mask: &SegmentationMask,
    reduced: &Surface,
    output_size: (u32, u32),
) -> Result<(), CompositeError> {
    let _span = tracing::debug_span!("matte").entered();

    if mask.pixel_count() == 0 {
        tracing::debug!("Empty segmentation mask, clearing matte");
        matte.resize(output_size.0, output_size.1);
        return Ok(());
    }

    if (mask.width, mask.height) != reduced.dimensions() {
        return Err(CompositeError::MaskSize {
            mask_width: mask.width,
            mask_height: mask.height,
            frame_width: reduced.width(),
            frame_height: reduced.height(),
        });
    }

    let pixels = extract_matte(mask, reduced.read_pixels())?;
    matte.write_pixels(pixels, mask.width, mask.height)
}
