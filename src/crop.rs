//! Crop negotiation over a raw image.
//!
//! `CropNegotiator` plays the role of the interactive selection widget: it keeps
//! the viewport's zoom and pan plus a selection box in display space. Confirming
//! converts the selection into original pixels and renders the crop.
//!
//! The raw image is only borrowed; negotiation never mutates it, and every round
//! of a prediction session negotiates against the original capture.

use image::imageops::{self, FilterType};
use image::RgbImage;

use crate::error::{ClientError, ClientResult};
use crate::geometry::{
    contain_fit, display_to_original, safe_area_offset, safe_area_side, CropRectangle, DisplayBox,
    Fit, Size,
};
use crate::raster::{CroppedImage, RawImage};

/// Fraction of the image the initial selection covers.
pub const INITIAL_SELECTION: f64 = 0.8;
pub const MIN_ZOOM: f64 = 0.1;
pub const MAX_ZOOM: f64 = 10.0;
/// Smallest selection edge in display pixels.
const MIN_SELECTION_EDGE: f64 = 1.0;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum AspectRatio {
    Free,
    /// width / height
    Fixed(f64),
}

impl AspectRatio {
    pub const SQUARE: AspectRatio = AspectRatio::Fixed(1.0);
}

/// Result of a confirmed crop.
#[derive(Debug)]
pub struct CropOutcome {
    pub cropped: CroppedImage,
    pub rect: CropRectangle,
}

pub struct CropNegotiator<'a> {
    image: &'a RawImage,
    viewport: Size,
    base: Fit,
    aspect: AspectRatio,
    zoom: f64,
    pan: (f64, f64),
    selection: DisplayBox,
    output_edge: Option<u32>,
}

impl<'a> CropNegotiator<'a> {
    /// Show `image` contain-fitted in a `viewport` with an initial centered selection.
    pub fn new(image: &'a RawImage, viewport: Size, aspect: AspectRatio) -> ClientResult<Self> {
        if viewport.is_empty() {
            return Err(ClientError::Validation(
                "crop viewport must not be empty".to_string(),
            ));
        }
        if let AspectRatio::Fixed(ratio) = aspect {
            if !(ratio.is_finite() && ratio > 0.0) {
                return Err(ClientError::Validation(format!(
                    "invalid aspect ratio {}",
                    ratio
                )));
            }
        }
        let base = contain_fit(image.size(), viewport);
        let mut negotiator = Self {
            image,
            viewport,
            base,
            aspect,
            zoom: 1.0,
            pan: (0.0, 0.0),
            selection: DisplayBox::new(0.0, 0.0, 0.0, 0.0),
            output_edge: None,
        };
        negotiator.selection = negotiator.initial_selection();
        Ok(negotiator)
    }

    /// Resize the rendered crop so its longest edge is `edge` pixels.
    ///
    /// The reported `CropRectangle` stays in original pixels regardless.
    pub fn with_output_edge(mut self, edge: u32) -> Self {
        self.output_edge = (edge > 0).then_some(edge);
        self
    }

    pub fn original_size(&self) -> Size {
        self.image.size()
    }

    pub fn viewport(&self) -> Size {
        self.viewport
    }

    pub fn zoom_level(&self) -> f64 {
        self.zoom
    }

    pub fn pan_offset(&self) -> (f64, f64) {
        self.pan
    }

    pub fn selection(&self) -> DisplayBox {
        self.selection
    }

    /// Where the image is currently drawn in the viewport.
    pub fn image_box(&self) -> DisplayBox {
        let (width, height) = self.base.displayed_size(self.image.size());
        let width = width * self.zoom;
        let height = height * self.zoom;
        let (cx, cy) = (self.viewport.width as f64 / 2.0, self.viewport.height as f64 / 2.0);
        DisplayBox::new(
            cx - width / 2.0 + self.pan.0,
            cy - height / 2.0 + self.pan.1,
            width,
            height,
        )
    }

    /// Replace the selection with a box the user drew.
    pub fn set_selection(&mut self, selection: DisplayBox) {
        self.selection = self.constrain(selection);
    }

    /// Select a region given in original pixels, as if the user had drawn it.
    pub fn select_original(&mut self, rect: &CropRectangle) {
        let image_box = self.image_box();
        let sx = image_box.width / self.image.width() as f64;
        let sy = image_box.height / self.image.height() as f64;
        self.set_selection(DisplayBox::new(
            image_box.x + rect.x() as f64 * sx,
            image_box.y + rect.y() as f64 * sy,
            rect.width() as f64 * sx,
            rect.height() as f64 * sy,
        ));
    }

    /// Drag the selection without resizing it.
    pub fn move_by(&mut self, dx: f64, dy: f64) {
        let moved = self.selection.translated(dx, dy);
        self.selection = moved.clamped_within(&self.visible_image());
    }

    /// Resize the selection around its top-left corner.
    pub fn resize_to(&mut self, width: f64, height: f64) {
        let resized = DisplayBox::new(self.selection.x, self.selection.y, width, height);
        self.selection = self.constrain(resized);
    }

    /// Multiply the zoom about the viewport center.
    pub fn zoom_by(&mut self, factor: f64) {
        if !(factor.is_finite() && factor > 0.0) {
            return;
        }
        let zoom = (self.zoom * factor).clamp(MIN_ZOOM, MAX_ZOOM);
        let applied = zoom / self.zoom;
        self.zoom = zoom;
        self.pan = self.clamp_pan(self.pan.0 * applied, self.pan.1 * applied);
        self.selection = self.constrain(self.selection);
    }

    /// Move the image under the selection. The image center never leaves the viewport.
    pub fn pan_by(&mut self, dx: f64, dy: f64) {
        self.pan = self.clamp_pan(self.pan.0 + dx, self.pan.1 + dy);
        self.selection = self.constrain(self.selection);
    }

    /// Selection converted to original-image pixels.
    pub fn crop_rectangle(&self) -> ClientResult<CropRectangle> {
        display_to_original(&self.selection, &self.image_box(), self.image.size())
    }

    /// Render the current selection.
    pub fn confirm(&self) -> ClientResult<CropOutcome> {
        let rect = self.crop_rectangle()?;
        let transformed = self.zoom != 1.0 || self.pan != (0.0, 0.0);
        let pixels = if transformed {
            render_via_safe_area(self.image.pixels(), &rect)
        } else {
            render_direct(self.image.pixels(), &rect)
        };
        let pixels = match self.output_edge {
            Some(edge) => resize_longest_edge(&pixels, edge),
            None => pixels,
        };
        let cropped = CroppedImage::from_pixels(&pixels)?;
        log::debug!(
            "CropNegotiator: {} cropped to {}x{}+{}+{} ({}x{} output)",
            self.image.handle(),
            rect.width(),
            rect.height(),
            rect.x(),
            rect.y(),
            cropped.width(),
            cropped.height()
        );
        Ok(CropOutcome { cropped, rect })
    }

    fn initial_selection(&self) -> DisplayBox {
        let image_box = self.image_box();
        let (mut width, mut height) = (
            image_box.width * INITIAL_SELECTION,
            image_box.height * INITIAL_SELECTION,
        );
        if let AspectRatio::Fixed(ratio) = self.aspect {
            (width, height) = fit_aspect(width, height, ratio);
        }
        let (cx, cy) = image_box.center();
        DisplayBox::new(cx - width / 2.0, cy - height / 2.0, width, height)
    }

    /// Part of the image box that is inside the viewport.
    fn visible_image(&self) -> DisplayBox {
        let image_box = self.image_box();
        let left = image_box.x.max(0.0);
        let top = image_box.y.max(0.0);
        let right = image_box.right().min(self.viewport.width as f64);
        let bottom = image_box.bottom().min(self.viewport.height as f64);
        DisplayBox::new(left, top, (right - left).max(0.0), (bottom - top).max(0.0))
    }

    fn clamp_pan(&self, x: f64, y: f64) -> (f64, f64) {
        let half_w = self.viewport.width as f64 / 2.0;
        let half_h = self.viewport.height as f64 / 2.0;
        (x.clamp(-half_w, half_w), y.clamp(-half_h, half_h))
    }

    fn constrain(&self, selection: DisplayBox) -> DisplayBox {
        let bounds = self.visible_image();
        let mut width = selection.width.max(MIN_SELECTION_EDGE).min(bounds.width);
        let mut height = selection.height.max(MIN_SELECTION_EDGE).min(bounds.height);
        if let AspectRatio::Fixed(ratio) = self.aspect {
            (width, height) = fit_aspect(width, height, ratio);
        }
        DisplayBox::new(selection.x, selection.y, width, height).clamped_within(&bounds)
    }
}

/// Largest box of the given aspect that fits inside `width` x `height`.
fn fit_aspect(width: f64, height: f64, ratio: f64) -> (f64, f64) {
    if width / height > ratio {
        (height * ratio, height)
    } else {
        (width, width / ratio)
    }
}

fn render_direct(source: &RgbImage, rect: &CropRectangle) -> RgbImage {
    imageops::crop_imm(source, rect.x(), rect.y(), rect.width(), rect.height()).to_image()
}

/// Composite onto a canvas padded to the image diagonal, then cut the window.
///
/// The padding keeps the window addressable even when zoom or pan put part of it
/// past the image edge before clamping.
fn render_via_safe_area(source: &RgbImage, rect: &CropRectangle) -> RgbImage {
    let size = Size::new(source.width(), source.height());
    let side = safe_area_side(size);
    let (off_x, off_y) = safe_area_offset(size);
    let mut canvas = RgbImage::new(side, side);
    imageops::overlay(&mut canvas, source, off_x as i64, off_y as i64);
    imageops::crop_imm(
        &canvas,
        rect.x() + off_x,
        rect.y() + off_y,
        rect.width(),
        rect.height(),
    )
    .to_image()
}

fn resize_longest_edge(pixels: &RgbImage, edge: u32) -> RgbImage {
    let (w, h) = (pixels.width(), pixels.height());
    let longest = w.max(h);
    if longest == edge {
        return pixels.clone();
    }
    let scale = edge as f64 / longest as f64;
    let nw = ((w as f64 * scale).round() as u32).max(1);
    let nh = ((h as f64 * scale).round() as u32).max(1);
    imageops::resize(pixels, nw, nh, FilterType::Lanczos3)
}
