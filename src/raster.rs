//! In-memory rasters owned by a capture session.
//!
//! - `RawImage`: the full-resolution capture or upload. Not `Clone`; one owner.
//! - `CroppedImage`: JPEG produced by rendering a `RawImage` through a `CropRectangle`.
//!
//! Both zeroize their buffers on drop so a cancelled or finished session leaves
//! no image data behind in freed memory.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use image::{ImageFormat, RgbImage};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::Zeroize;

use crate::error::{ClientError, ClientResult};
use crate::geometry::Size;

/// JPEG quality used for camera captures and crops.
pub const JPEG_QUALITY: u8 = 90;

/// Where a raw image came from. Sent to the server as `source`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageSource {
    Upload,
    Camera,
}

/// Transient client-side handle for a raw image. Only meaningful within one process.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageHandle([u8; 8]);

impl ImageHandle {
    fn random() -> Self {
        let mut bytes = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }
}

impl fmt::Display for ImageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for ImageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ImageHandle({})", self)
    }
}

/// Full-resolution raster as captured or uploaded.
///
/// Holds both the decoded pixels (for cropping) and the encoded bytes that are
/// uploaded to `/api/predict`. There is no `Clone`: a session owns exactly one.
pub struct RawImage {
    handle: ImageHandle,
    source: ImageSource,
    format: ImageFormat,
    encoded: Vec<u8>,
    pixels: RgbImage,
}

impl RawImage {
    /// Decode an encoded image (JPEG, PNG) into a raw image.
    pub fn decode(encoded: Vec<u8>, source: ImageSource) -> ClientResult<Self> {
        let format = image::guess_format(&encoded)
            .map_err(|e| ClientError::Decode(format!("unrecognized image data: {}", e)))?;
        let decoded = image::load_from_memory_with_format(&encoded, format)?;
        let pixels = decoded.into_rgb8();
        if pixels.width() == 0 || pixels.height() == 0 {
            return Err(ClientError::Decode("image has no pixels".to_string()));
        }
        Ok(Self {
            handle: ImageHandle::random(),
            source,
            format,
            encoded,
            pixels,
        })
    }

    /// Wrap already decoded pixels, encoding them as JPEG for upload.
    pub fn from_pixels(pixels: RgbImage, source: ImageSource) -> ClientResult<Self> {
        if pixels.width() == 0 || pixels.height() == 0 {
            return Err(ClientError::Validation("image has no pixels".to_string()));
        }
        let encoded = encode_jpeg(&pixels, JPEG_QUALITY)?;
        Ok(Self {
            handle: ImageHandle::random(),
            source,
            format: ImageFormat::Jpeg,
            encoded,
            pixels,
        })
    }

    /// Parse a `data:image/...;base64,` URL (or bare base64) into a raw image.
    pub fn from_data_url(data_url: &str, source: ImageSource) -> ClientResult<Self> {
        let payload = strip_data_url(data_url);
        let encoded = STANDARD
            .decode(payload.trim())
            .map_err(|e| ClientError::Decode(format!("invalid base64 image data: {}", e)))?;
        Self::decode(encoded, source)
    }

    pub fn handle(&self) -> ImageHandle {
        self.handle
    }

    pub fn source(&self) -> ImageSource {
        self.source
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn size(&self) -> Size {
        Size::new(self.width(), self.height())
    }

    pub fn mime_type(&self) -> &'static str {
        self.format.to_mime_type()
    }

    pub fn encoded_len(&self) -> usize {
        self.encoded.len()
    }

    /// Base64 of the encoded bytes, without a data-URL prefix.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.encoded)
    }

    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type(), self.to_base64())
    }

    pub(crate) fn pixels(&self) -> &RgbImage {
        &self.pixels
    }
}

impl fmt::Debug for RawImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawImage")
            .field("handle", &self.handle)
            .field("source", &self.source)
            .field("width", &self.width())
            .field("height", &self.height())
            .field("encoded_len", &self.encoded.len())
            .finish()
    }
}

impl Drop for RawImage {
    fn drop(&mut self) {
        self.encoded.zeroize();
        let pixels: &mut [u8] = &mut self.pixels;
        pixels.zeroize();
    }
}

/// JPEG crop ready for `/api/predict-crop`.
pub struct CroppedImage {
    encoded: Vec<u8>,
    width: u32,
    height: u32,
}

impl CroppedImage {
    pub(crate) fn from_pixels(pixels: &RgbImage) -> ClientResult<Self> {
        Ok(Self {
            encoded: encode_jpeg(pixels, JPEG_QUALITY)?,
            width: pixels.width(),
            height: pixels.height(),
        })
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

    pub fn as_jpeg(&self) -> &[u8] {
        &self.encoded
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.encoded)
    }

    pub fn to_data_url(&self) -> String {
        format!("data:image/jpeg;base64,{}", self.to_base64())
    }
}

impl fmt::Debug for CroppedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CroppedImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("encoded_len", &self.encoded.len())
            .finish()
    }
}

impl Drop for CroppedImage {
    fn drop(&mut self) {
        self.encoded.zeroize();
    }
}

pub(crate) fn encode_jpeg(pixels: &RgbImage, quality: u8) -> ClientResult<Vec<u8>> {
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality)
        .encode_image(pixels)
        .map_err(|e| ClientError::Decode(format!("jpeg encode failed: {}", e)))?;
    Ok(out)
}

/// Drop a `data:...;base64,` prefix if present.
pub fn strip_data_url(value: &str) -> &str {
    match value.split_once(',') {
        Some((prefix, payload)) if prefix.starts_with("data:") => payload,
        _ => value,
    }
}
