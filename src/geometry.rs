//! Crop geometry.
//!
//! Two coordinate spaces meet here:
//! - display space: where a preview or crop widget draws the image (f64, scaled, offset)
//! - original space: the full-resolution raster's integer pixels
//!
//! `CropRectangle` only exists in original space and can only be built through
//! checked constructors, so every rectangle handed to the renderer or the server
//! satisfies `x + width <= original width`, `y + height <= original height` and
//! is non-empty.

use serde::{Deserialize, Serialize};

use crate::error::{ClientError, ClientResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    fn w(&self) -> f64 {
        self.width as f64
    }

    fn h(&self) -> f64 {
        self.height as f64
    }
}

/// Rectangle in display space, as a selection widget reports it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DisplayBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl DisplayBox {
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn translated(&self, dx: f64, dy: f64) -> Self {
        Self::new(self.x + dx, self.y + dy, self.width, self.height)
    }

    /// Shrink to fit inside `bounds`, then slide until fully contained.
    pub fn clamped_within(&self, bounds: &DisplayBox) -> Self {
        let width = self.width.max(0.0).min(bounds.width.max(0.0));
        let height = self.height.max(0.0).min(bounds.height.max(0.0));
        // right() - width can round below x when width == bounds.width.
        let max_x = (bounds.right() - width).max(bounds.x);
        let max_y = (bounds.bottom() - height).max(bounds.y);
        let x = self.x.max(bounds.x).min(max_x);
        let y = self.y.max(bounds.y).min(max_y);
        Self::new(x, y, width, height)
    }
}

/// Crop rectangle in original-image pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct CropRectangle {
    x: u32,
    y: u32,
    width: u32,
    height: u32,
}

impl CropRectangle {
    pub fn new(x: u32, y: u32, width: u32, height: u32, bounds: Size) -> ClientResult<Self> {
        if width == 0 || height == 0 {
            return Err(ClientError::Validation(
                "crop rectangle must not be empty".to_string(),
            ));
        }
        let fits_x = x.checked_add(width).is_some_and(|right| right <= bounds.width);
        let fits_y = y.checked_add(height).is_some_and(|bottom| bottom <= bounds.height);
        if !fits_x || !fits_y {
            return Err(ClientError::Validation(format!(
                "crop rectangle {}x{}+{}+{} exceeds image {}x{}",
                width, height, x, y, bounds.width, bounds.height
            )));
        }
        Ok(Self {
            x,
            y,
            width,
            height,
        })
    }

    pub fn full(bounds: Size) -> ClientResult<Self> {
        Self::new(0, 0, bounds.width, bounds.height, bounds)
    }

    /// Round a fractional original-space box to integer pixels and clip it to `bounds`.
    ///
    /// Each component is rounded independently. Portions hanging off the image are
    /// cut rather than shifted so the rectangle never covers pixels the user did not select.
    pub fn from_fractional(
        x: f64,
        y: f64,
        width: f64,
        height: f64,
        bounds: Size,
    ) -> ClientResult<Self> {
        if bounds.is_empty() {
            return Err(ClientError::Validation("image has no pixels".to_string()));
        }
        if !(x.is_finite() && y.is_finite() && width.is_finite() && height.is_finite()) {
            return Err(ClientError::Validation(
                "crop selection is not a finite box".to_string(),
            ));
        }
        let (left, width) = clip_axis(x.round(), width.round(), bounds.w());
        let (top, height) = clip_axis(y.round(), height.round(), bounds.h());
        if width < 1.0 || height < 1.0 {
            return Err(ClientError::Validation(
                "crop selection does not overlap the image".to_string(),
            ));
        }
        Self::new(
            left as u32,
            top as u32,
            width as u32,
            height as u32,
            bounds,
        )
    }

    pub fn x(&self) -> u32 {
        self.x
    }

    pub fn y(&self) -> u32 {
        self.y
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    pub fn fits_within(&self, bounds: Size) -> bool {
        self.width > 0
            && self.height > 0
            && self.x as u64 + self.width as u64 <= bounds.width as u64
            && self.y as u64 + self.height as u64 <= bounds.height as u64
    }
}

fn clip_axis(start: f64, len: f64, limit: f64) -> (f64, f64) {
    let mut start = start;
    let mut len = len;
    if start < 0.0 {
        len += start;
        start = 0.0;
    }
    if start > limit {
        return (limit, 0.0);
    }
    len = len.min(limit - start);
    (start, len.max(0.0))
}

/// Uniform scale plus offset placing a source raster in a display box.
///
/// `display = source * scale + offset`. Offsets are negative on an axis that
/// "cover" fitting clips.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Fit {
    pub scale: f64,
    pub offset_x: f64,
    pub offset_y: f64,
}

impl Fit {
    pub fn to_display(&self, x: f64, y: f64) -> (f64, f64) {
        (x * self.scale + self.offset_x, y * self.scale + self.offset_y)
    }

    pub fn to_source(&self, x: f64, y: f64) -> (f64, f64) {
        ((x - self.offset_x) / self.scale, (y - self.offset_y) / self.scale)
    }

    pub fn displayed_size(&self, source: Size) -> (f64, f64) {
        (source.w() * self.scale, source.h() * self.scale)
    }

    /// Box the source occupies in display space.
    pub fn displayed_box(&self, source: Size) -> DisplayBox {
        let (width, height) = self.displayed_size(source);
        DisplayBox::new(self.offset_x, self.offset_y, width, height)
    }
}

/// Fit the whole source inside the display box, letterboxing the slack axis.
pub fn contain_fit(source: Size, display: Size) -> Fit {
    let scale = (display.w() / source.w()).min(display.h() / source.h());
    Fit {
        scale,
        offset_x: (display.w() - source.w() * scale) / 2.0,
        offset_y: (display.h() - source.h() * scale) / 2.0,
    }
}

/// Fill the display box with the source, clipping the overflowing axis equally on both sides.
pub fn cover_fit(source: Size, display: Size) -> Fit {
    let scale = (display.w() / source.w()).max(display.h() / source.h());
    Fit {
        scale,
        offset_x: (display.w() - source.w() * scale) / 2.0,
        offset_y: (display.h() - source.h() * scale) / 2.0,
    }
}

/// Map the centered square overlay of a cover-fitted preview back to source pixels.
///
/// The preview shows `source` scaled by one uniform factor so that it fills
/// `display`; one axis overflows and is clipped symmetrically. The overlay is the
/// largest centered square of the display box. The returned rectangle is that
/// square in source pixels and is always square.
pub fn cover_square_region(source: Size, display: Size) -> ClientResult<CropRectangle> {
    if source.is_empty() || display.is_empty() {
        return Err(ClientError::Validation(
            "cannot map a capture square over an empty frame or display".to_string(),
        ));
    }
    // Ratio source/display along the axis that determines the cover scale.
    // Kept as a numerator/denominator pair so that exact ratios stay exact.
    let width_governs = display.w() * source.h() >= display.h() * source.w();
    let (num, den) = if width_governs {
        (source.w(), display.w())
    } else {
        (source.h(), display.h())
    };
    let to_source = |display_len: f64| display_len * num / den;

    let visible_w = to_source(display.w());
    let visible_h = to_source(display.h());
    let clip_x = (source.w() - visible_w).max(0.0) / 2.0;
    let clip_y = (source.h() - visible_h).max(0.0) / 2.0;

    let side_display = display.w().min(display.h());
    let left_display = (display.w() - side_display) / 2.0;
    let top_display = (display.h() - side_display) / 2.0;

    let limit = source.width.min(source.height);
    let side = (to_source(side_display).round() as u32).clamp(1, limit);
    let x = ((clip_x + to_source(left_display)).round().max(0.0) as u32)
        .min(source.width - side);
    let y = ((clip_y + to_source(top_display)).round().max(0.0) as u32)
        .min(source.height - side);
    CropRectangle::new(x, y, side, side, source)
}

/// Convert a selection reported in display space into original pixels.
///
/// `image_box` is where the image is drawn in the same display space (after zoom
/// and pan). Each axis is scaled by `original / displayed` and rounded.
pub fn display_to_original(
    selection: &DisplayBox,
    image_box: &DisplayBox,
    original: Size,
) -> ClientResult<CropRectangle> {
    if image_box.width <= 0.0 || image_box.height <= 0.0 {
        return Err(ClientError::Validation(
            "image is not displayed; cannot convert selection".to_string(),
        ));
    }
    let rel_x = selection.x - image_box.x;
    let rel_y = selection.y - image_box.y;
    CropRectangle::from_fractional(
        rel_x * original.w() / image_box.width,
        rel_y * original.h() / image_box.height,
        selection.width * original.w() / image_box.width,
        selection.height * original.h() / image_box.height,
        original,
    )
}

/// Side of the square working canvas that can hold the image at any rotation.
pub fn safe_area_side(size: Size) -> u32 {
    (size.w().powi(2) + size.h().powi(2)).sqrt().ceil() as u32
}

/// Where the image's top-left corner sits when centered in its safe area.
pub fn safe_area_offset(size: Size) -> (u32, u32) {
    let side = safe_area_side(size);
    ((side - size.width) / 2, (side - size.height) / 2)
}
