//! Presentational images derived from an original image and its binary mask.
//!
//! Everything here is a pure function of its inputs. Masks are expected to
//! come out of the postprocessor already binarized; no function in this
//! module applies a threshold of its own, non-zero mask pixels are
//! foreground.

use image::{imageops, GrayImage, Rgb, RgbImage};
use imageproc::{drawing::draw_hollow_rect_mut, rect::Rect};

use crate::error::{SINetError, SINetResult};

/// Overlay tint for foreground pixels.
pub const OVERLAY_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
/// Weight of [`OVERLAY_COLOR`] in the blend.
pub const OVERLAY_ALPHA: f32 = 0.5;
/// Outline color used by [`draw_bounding_box`].
pub const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
/// Outline thickness in pixels.
pub const BOX_THICKNESS: u32 = 3;

/// Axis-aligned pixel rectangle, `x`/`y` being the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

fn ensure_same_size(original: &RgbImage, mask: &GrayImage) -> SINetResult<()> {
    if original.dimensions() == mask.dimensions() {
        Ok(())
    } else {
        Err(SINetError::InvalidImage {
            reason: format!(
                "mask is {}x{} but image is {}x{}",
                mask.width(),
                mask.height(),
                original.width(),
                original.height()
            ),
        })
    }
}

/// Blend [`OVERLAY_COLOR`] into the foreground of `original`.
///
/// # Errors
///
/// Returns [`SINetError::InvalidImage`] when the sizes differ.
pub fn overlay(original: &RgbImage, mask: &GrayImage) -> SINetResult<RgbImage> {
    ensure_same_size(original, mask)?;

    let mut out = original.clone();
    for (pixel, m) in out.pixels_mut().zip(mask.pixels()) {
        if m[0] == 0 {
            continue;
        }
        for (channel, tint) in pixel.0.iter_mut().zip(OVERLAY_COLOR.0) {
            let blended =
                f32::from(*channel).mul_add(1.0 - OVERLAY_ALPHA, f32::from(tint) * OVERLAY_ALPHA);
            *channel = blended.round().clamp(0.0, 255.0) as u8;
        }
    }
    Ok(out)
}

/// Tight box around all non-zero pixels, or `None` for an empty mask.
pub fn mask_bounding_box(mask: &GrayImage) -> Option<BoundingBox> {
    let mut extent: Option<(u32, u32, u32, u32)> = None;

    for (x, y, pixel) in mask.enumerate_pixels() {
        if pixel[0] == 0 {
            continue;
        }
        extent = Some(match extent {
            None => (x, y, x, y),
            Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
        });
    }

    extent.map(|(x0, y0, x1, y1)| BoundingBox {
        x: x0,
        y: y0,
        width: x1 - x0 + 1,
        height: y1 - y0 + 1,
    })
}

/// Copy of `original` with a [`BOX_COLOR`] outline around the mask extent.
/// An empty mask yields an unmodified copy.
///
/// # Errors
///
/// Returns [`SINetError::InvalidImage`] when the sizes differ.
pub fn draw_bounding_box(original: &RgbImage, mask: &GrayImage) -> SINetResult<RgbImage> {
    ensure_same_size(original, mask)?;

    let mut out = original.clone();
    let Some(bbox) = mask_bounding_box(mask) else {
        return Ok(out);
    };

    // Grow inwards so the outline never leaves the image.
    for inset in 0..BOX_THICKNESS {
        let width = bbox.width.saturating_sub(2 * inset);
        let height = bbox.height.saturating_sub(2 * inset);
        if width == 0 || height == 0 {
            break;
        }
        let rect = Rect::at((bbox.x + inset) as i32, (bbox.y + inset) as i32).of_size(width, height);
        draw_hollow_rect_mut(&mut out, rect, BOX_COLOR);
    }
    Ok(out)
}

/// Crop of `original` to the mask extent, or `None` for an empty mask.
///
/// # Errors
///
/// Returns [`SINetError::InvalidImage`] when the sizes differ.
pub fn crop_to_mask(original: &RgbImage, mask: &GrayImage) -> SINetResult<Option<RgbImage>> {
    ensure_same_size(original, mask)?;

    Ok(mask_bounding_box(mask).map(|b| {
        imageops::crop_imm(original, b.x, b.y, b.width, b.height).to_image()
    }))
}

/// Jet colormap, 0 maps to dark blue and 255 to dark red.
fn jet(value: u8) -> Rgb<u8> {
    let v = f32::from(value) / 255.0;
    let channel = |center: f32| {
        let c = (1.5 - 4.0f32.mul_add(v, -center).abs()).clamp(0.0, 1.0);
        (c * 255.0).round() as u8
    };
    Rgb([channel(3.0), channel(2.0), channel(1.0)])
}

/// False-color rendering of `mask` with the jet colormap.
pub fn heatmap(mask: &GrayImage) -> RgbImage {
    RgbImage::from_fn(mask.width(), mask.height(), |x, y| jet(mask.get_pixel(x, y)[0]))
}

/// `original | mask | overlay`, left to right, all at the original size.
///
/// # Errors
///
/// Returns [`SINetError::InvalidImage`] when the sizes differ.
pub fn side_by_side(
    original: &RgbImage,
    mask: &GrayImage,
    overlay: &RgbImage,
) -> SINetResult<RgbImage> {
    ensure_same_size(original, mask)?;
    if overlay.dimensions() != original.dimensions() {
        return Err(SINetError::InvalidImage {
            reason: "overlay does not match the original image size".to_string(),
        });
    }

    let (width, height) = original.dimensions();
    let mask_rgb = RgbImage::from_fn(width, height, |x, y| {
        let v = mask.get_pixel(x, y)[0];
        Rgb([v, v, v])
    });

    let mut canvas = RgbImage::new(width * 3, height);
    imageops::replace(&mut canvas, original, 0, 0);
    imageops::replace(&mut canvas, &mask_rgb, i64::from(width), 0);
    imageops::replace(&mut canvas, overlay, 2 * i64::from(width), 0);
    Ok(canvas)
}
