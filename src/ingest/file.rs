//! Local file image source.
//!
//! This module provides `FileSource` for turning a user-selected file into a `RawImage`.
//! The file source is responsible for:
//! - Rejecting files that are not images
//! - Rejecting files above the upload ceiling before reading them
//! - Reading and decoding the file as one operation that either yields an image or fails
//!
//! Nothing is sent over the network here; a rejected file never reaches the API.

use image::ImageFormat;
use std::fs;
use std::io::Read;
use std::path::Path;

use crate::error::{ClientError, ClientResult};
use crate::raster::{ImageSource, RawImage};

/// Upload ceiling: 10 MB.
pub const MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;

/// Bytes read to sniff the format of a file without a usable extension.
const SNIFF_BYTES: usize = 64;

/// Configuration for a local file source.
#[derive(Clone, Debug)]
pub struct FileConfig {
    /// Largest accepted file in bytes.
    pub max_bytes: u64,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            max_bytes: MAX_UPLOAD_BYTES,
        }
    }
}

/// What validation learned about a file before it is read.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileCandidate {
    pub mime_type: &'static str,
    pub len: u64,
}

/// Local file image source.
#[derive(Clone, Debug, Default)]
pub struct FileSource {
    config: FileConfig,
}

impl FileSource {
    pub fn new(config: FileConfig) -> Self {
        Self { config }
    }

    /// Check type and size without reading the whole file.
    pub fn validate(&self, path: &Path) -> ClientResult<FileCandidate> {
        let meta = fs::metadata(path)?;
        if !meta.is_file() {
            return Err(ClientError::Validation(format!(
                "{} is not a file",
                path.display()
            )));
        }
        let mime_type = detect_mime(path)?.ok_or_else(|| {
            ClientError::Validation(format!(
                "{} is not an image file; please choose an image",
                path.display()
            ))
        })?;
        if meta.len() > self.config.max_bytes {
            return Err(ClientError::Validation(format!(
                "image is too large ({:.1} MB); please choose an image under {} MB",
                meta.len() as f64 / (1024.0 * 1024.0),
                self.config.max_bytes / (1024 * 1024)
            )));
        }
        Ok(FileCandidate {
            mime_type,
            len: meta.len(),
        })
    }

    /// Validate, read and decode the file.
    pub fn load(&self, path: &Path) -> ClientResult<RawImage> {
        let candidate = self.validate(path)?;
        let bytes = fs::read(path)?;
        // The file may have grown between validation and read.
        if bytes.len() as u64 > self.config.max_bytes {
            return Err(ClientError::Validation(format!(
                "image is too large; please choose an image under {} MB",
                self.config.max_bytes / (1024 * 1024)
            )));
        }
        let image = RawImage::decode(bytes, ImageSource::Upload)?;
        log::info!(
            "FileSource: loaded {} as {} ({}x{}, {} bytes)",
            path.display(),
            image.handle(),
            image.width(),
            image.height(),
            candidate.len
        );
        Ok(image)
    }
}

/// MIME type from the extension, falling back to the content's magic bytes.
fn detect_mime(path: &Path) -> ClientResult<Option<&'static str>> {
    if let Ok(format) = ImageFormat::from_path(path) {
        return Ok(Some(format.to_mime_type()));
    }
    let mut head = Vec::with_capacity(SNIFF_BYTES);
    fs::File::open(path)?
        .take(SNIFF_BYTES as u64)
        .read_to_end(&mut head)?;
    Ok(image::guess_format(&head)
        .ok()
        .map(|format| format.to_mime_type()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::encode_jpeg;
    use image::{Rgb, RgbImage};
    use std::io::Write;

    fn write_jpeg(dir: &Path, name: &str) -> std::path::PathBuf {
        let pixels = RgbImage::from_pixel(32, 16, Rgb([10, 200, 30]));
        let bytes = encode_jpeg(&pixels, 90).unwrap();
        let path = dir.join(name);
        fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn loads_a_small_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_jpeg(dir.path(), "leaf.jpg");
        let image = FileSource::default().load(&path).unwrap();
        assert_eq!((image.width(), image.height()), (32, 16));
        assert_eq!(image.source(), ImageSource::Upload);
    }

    #[test]
    fn sniffs_images_without_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_jpeg(dir.path(), "capture");
        let candidate = FileSource::default().validate(&path).unwrap();
        assert_eq!(candidate.mime_type, "image/jpeg");
    }

    #[test]
    fn rejects_non_images() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(b"hello").unwrap();
        let err = FileSource::default().validate(&path).unwrap_err();
        assert!(matches!(err, ClientError::Validation(_)));
    }

    #[test]
    fn rejects_oversized_files_before_reading() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("huge.jpg");
        let file = fs::File::create(&path).unwrap();
        file.set_len(12 * 1024 * 1024).unwrap();
        let err = FileSource::default().load(&path).unwrap_err();
        match err {
            ClientError::Validation(msg) => assert!(msg.contains("too large"), "{msg}"),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn undecodable_image_is_a_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        fs::write(&path, b"\x89PNG\r\n\x1a\nbroken").unwrap();
        let err = FileSource::default().load(&path).unwrap_err();
        assert!(matches!(err, ClientError::Decode(_)));
    }
}
