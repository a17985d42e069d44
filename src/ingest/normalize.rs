use image::RgbImage;

use crate::error::{ClientError, ClientResult};

/// Pixel layouts camera backends deliver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PixelFormat {
    /// Only V4L2 devices deliver raw RGB.
    #[cfg_attr(not(feature = "camera-v4l2"), allow(dead_code))]
    Rgb24,
    /// Packed 4:2:2, Y0 U Y1 V.
    #[cfg_attr(not(feature = "camera-v4l2"), allow(dead_code))]
    Yuyv,
    /// One JPEG per frame.
    Mjpeg,
}

pub(crate) fn normalize_to_rgb(
    pixels: &[u8],
    width: u32,
    height: u32,
    format: PixelFormat,
) -> ClientResult<RgbImage> {
    match format {
        PixelFormat::Rgb24 => {
            let expected = frame_len(width, height, 3)?;
            if pixels.len() != expected {
                return Err(ClientError::Decode(format!(
                    "RGB frame length mismatch: expected {}, got {}",
                    expected,
                    pixels.len()
                )));
            }
            RgbImage::from_raw(width, height, pixels.to_vec())
                .ok_or_else(|| ClientError::Decode("RGB frame buffer too small".to_string()))
        }
        PixelFormat::Yuyv => yuyv_to_rgb(pixels, width, height),
        PixelFormat::Mjpeg => {
            let decoded = image::load_from_memory_with_format(pixels, image::ImageFormat::Jpeg)?;
            Ok(decoded.into_rgb8())
        }
    }
}

fn frame_len(width: u32, height: u32, bytes_per_pixel: u32) -> ClientResult<usize> {
    width
        .checked_mul(height)
        .and_then(|v| v.checked_mul(bytes_per_pixel))
        .map(|v| v as usize)
        .ok_or_else(|| ClientError::Decode("frame dimensions overflow".to_string()))
}

fn yuyv_to_rgb(pixels: &[u8], width: u32, height: u32) -> ClientResult<RgbImage> {
    if width % 2 != 0 {
        return Err(ClientError::Decode(format!(
            "YUYV frame width must be even, got {}",
            width
        )));
    }
    let expected = frame_len(width, height, 2)?;
    if pixels.len() != expected {
        return Err(ClientError::Decode(format!(
            "YUYV frame length mismatch: expected {}, got {}",
            expected,
            pixels.len()
        )));
    }

    let mut rgb = Vec::with_capacity(frame_len(width, height, 3)?);
    for chunk in pixels.chunks_exact(4) {
        let u = chunk[1] as f32 - 128.0;
        let v = chunk[3] as f32 - 128.0;
        for y in [chunk[0], chunk[2]] {
            let y = y as f32;
            rgb.push(clamp_to_u8(y + 1.402_f32 * v));
            rgb.push(clamp_to_u8(y - 0.344_136_f32 * u - 0.714_136_f32 * v));
            rgb.push(clamp_to_u8(y + 1.772_f32 * u));
        }
    }
    RgbImage::from_raw(width, height, rgb)
        .ok_or_else(|| ClientError::Decode("YUYV conversion produced a short buffer".to_string()))
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yuyv_conversion_produces_gray() -> ClientResult<()> {
        let yuyv = vec![128u8; 2 * 2 * 2];
        let rgb = normalize_to_rgb(&yuyv, 2, 2, PixelFormat::Yuyv)?;
        assert_eq!(rgb.into_raw(), vec![128u8; 12]);
        Ok(())
    }

    #[test]
    fn rgb_pass_through_validates_length() {
        let pixels = vec![1u8; 9];
        let rgb = normalize_to_rgb(&pixels, 1, 3, PixelFormat::Rgb24).unwrap();
        assert_eq!(rgb.into_raw(), pixels);
        assert!(normalize_to_rgb(&pixels, 2, 3, PixelFormat::Rgb24).is_err());
    }

    #[test]
    fn mjpeg_garbage_is_a_decode_error() {
        let err = normalize_to_rgb(b"\xff\xd8nope", 2, 2, PixelFormat::Mjpeg).unwrap_err();
        assert!(matches!(err, ClientError::Decode(_)));
    }
}
