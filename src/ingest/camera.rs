//! Camera image source.
//!
//! This module provides `CameraSource`, which acquires a camera stream for a
//! requested facing mode and captures square stills from it.
//!
//! The camera source is responsible for:
//! - Acquiring exactly one stream at a time and releasing it on every exit path
//!   (close, facing switch, drop)
//! - Mapping the centered square the preview overlay shows back to sensor pixels
//! - Encoding the captured square as JPEG (quality 90)
//! - Reporting denied or missing cameras as errors the caller can recover from
//!
//! Backends are chosen by device string:
//! - `stub://name` - synthetic frames (`stub://denied` and `stub://missing` simulate failures)
//! - `http(s)://...` - network snapshot camera returning one JPEG per request
//! - anything else - local V4L2 device (feature: camera-v4l2)

use image::{Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::time::Duration;

use super::normalize::{normalize_to_rgb, PixelFormat};
use crate::error::{ClientError, ClientResult};
use crate::geometry::{cover_square_region, Size};
use crate::raster::{ImageSource, RawImage};

const MAX_SNAPSHOT_BYTES: u64 = 10 * 1024 * 1024;
const SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(5);

/// Which way the camera points. Front is the "user" camera, back is "environment".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Facing {
    Front,
    #[default]
    Back,
}

impl Facing {
    pub fn flipped(self) -> Self {
        match self {
            Facing::Front => Facing::Back,
            Facing::Back => Facing::Front,
        }
    }
}

/// Configuration for a camera source.
#[derive(Clone, Debug)]
pub struct CameraConfig {
    /// Device used for `Facing::Back`.
    pub back_device: String,
    /// Device used for `Facing::Front`.
    pub front_device: String,
    /// Facing mode requested on open.
    pub facing: Facing,
    /// Preview box the stream is cover-fitted into.
    pub display_width: u32,
    pub display_height: u32,
    /// Preferred sensor resolution (synthetic and V4L2 backends).
    pub width: u32,
    pub height: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            back_device: "stub://back_camera".to_string(),
            front_device: "stub://front_camera".to_string(),
            facing: Facing::Back,
            display_width: 720,
            display_height: 1280,
            width: 1280,
            height: 720,
        }
    }
}

impl CameraConfig {
    pub fn device_for(&self, facing: Facing) -> &str {
        match facing {
            Facing::Front => &self.front_device,
            Facing::Back => &self.back_device,
        }
    }

    pub fn display(&self) -> Size {
        Size::new(self.display_width, self.display_height)
    }
}

/// Statistics for a camera source.
#[derive(Clone, Debug)]
pub struct CameraStats {
    pub frames_captured: u64,
    pub streams_opened: u64,
    pub device: Option<String>,
}

/// Camera source with an explicitly scoped stream.
pub struct CameraSource {
    config: CameraConfig,
    facing: Facing,
    stream: Option<CameraStream>,
    frames_captured: u64,
    streams_opened: u64,
}

enum CameraStream {
    Synthetic(SyntheticCamera),
    Snapshot(SnapshotCamera),
    #[cfg(feature = "camera-v4l2")]
    Device(device::DeviceCamera),
}

impl CameraStream {
    fn acquire(device: &str, config: &CameraConfig) -> ClientResult<Self> {
        if let Some(name) = device.strip_prefix("stub://") {
            return Ok(CameraStream::Synthetic(SyntheticCamera::acquire(
                name, config,
            )?));
        }
        if device.starts_with("http://") || device.starts_with("https://") {
            return Ok(CameraStream::Snapshot(SnapshotCamera::acquire(device)?));
        }
        #[cfg(feature = "camera-v4l2")]
        {
            Ok(CameraStream::Device(device::DeviceCamera::acquire(
                device, config,
            )?))
        }
        #[cfg(not(feature = "camera-v4l2"))]
        {
            Err(ClientError::CameraUnavailable(format!(
                "{} needs the camera-v4l2 feature",
                device
            )))
        }
    }

    fn name(&self) -> &str {
        match self {
            CameraStream::Synthetic(stream) => &stream.name,
            CameraStream::Snapshot(stream) => &stream.url,
            #[cfg(feature = "camera-v4l2")]
            CameraStream::Device(stream) => stream.name(),
        }
    }

    fn grab(&mut self) -> ClientResult<RgbImage> {
        match self {
            CameraStream::Synthetic(stream) => Ok(stream.grab()),
            CameraStream::Snapshot(stream) => stream.grab(),
            #[cfg(feature = "camera-v4l2")]
            CameraStream::Device(stream) => stream.grab(),
        }
    }
}

impl CameraSource {
    /// Acquire the stream for `config.facing`.
    pub fn open(config: CameraConfig) -> ClientResult<Self> {
        let facing = config.facing;
        let mut source = Self {
            config,
            facing,
            stream: None,
            frames_captured: 0,
            streams_opened: 0,
        };
        source.acquire(facing)?;
        Ok(source)
    }

    pub fn facing(&self) -> Facing {
        self.facing
    }

    pub fn is_streaming(&self) -> bool {
        self.stream.is_some()
    }

    /// Grab the current frame and cut out the centered capture square.
    pub fn capture(&mut self) -> ClientResult<RawImage> {
        let display = self.config.display();
        let stream = self.stream.as_mut().ok_or_else(|| {
            ClientError::CameraUnavailable("camera stream is not open".to_string())
        })?;
        let frame = stream.grab()?;
        let sensor = Size::new(frame.width(), frame.height());
        let square = cover_square_region(sensor, display)?;
        let cropped = image::imageops::crop_imm(
            &frame,
            square.x(),
            square.y(),
            square.width(),
            square.height(),
        )
        .to_image();
        self.frames_captured += 1;
        let image = RawImage::from_pixels(cropped, ImageSource::Camera)?;
        log::info!(
            "CameraSource: captured {} from {} ({}x{} sensor, {}px square)",
            image.handle(),
            stream.name(),
            sensor.width,
            sensor.height,
            square.width()
        );
        Ok(image)
    }

    /// Stop the current stream, then start the one facing the other way.
    ///
    /// If the new stream cannot be acquired the source is left closed.
    pub fn switch_facing(&mut self) -> ClientResult<()> {
        let next = self.facing.flipped();
        self.release();
        self.facing = next;
        self.acquire(next)
    }

    /// Release the stream. Idempotent.
    pub fn close(&mut self) {
        self.release();
    }

    pub fn stats(&self) -> CameraStats {
        CameraStats {
            frames_captured: self.frames_captured,
            streams_opened: self.streams_opened,
            device: self.stream.as_ref().map(|s| s.name().to_string()),
        }
    }

    fn acquire(&mut self, facing: Facing) -> ClientResult<()> {
        debug_assert!(self.stream.is_none());
        let device = self.config.device_for(facing).to_string();
        let stream = CameraStream::acquire(&device, &self.config).map_err(|err| {
            log::warn!("CameraSource: cannot open {}: {}", device, err);
            err
        })?;
        self.streams_opened += 1;
        log::info!("CameraSource: streaming from {} ({:?})", device, facing);
        self.stream = Some(stream);
        Ok(())
    }

    fn release(&mut self) {
        if let Some(stream) = self.stream.take() {
            log::debug!("CameraSource: released {}", stream.name());
            drop(stream);
        }
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        self.release();
    }
}

// ----------------------------------------------------------------------------
// Synthetic camera (stub://) for tests and demos
// ----------------------------------------------------------------------------

struct SyntheticCamera {
    name: String,
    width: u32,
    height: u32,
    frame_count: u64,
}

impl SyntheticCamera {
    fn acquire(name: &str, config: &CameraConfig) -> ClientResult<Self> {
        match name {
            "denied" => Err(ClientError::Permission(format!(
                "stub://{} refused access",
                name
            ))),
            "missing" => Err(ClientError::CameraUnavailable(format!(
                "stub://{} has no device",
                name
            ))),
            _ => Ok(Self {
                name: format!("stub://{}", name),
                width: config.width.max(1),
                height: config.height.max(1),
                frame_count: 0,
            }),
        }
    }

    /// Green field with a darker diagonal band that moves per frame.
    fn grab(&mut self) -> RgbImage {
        self.frame_count += 1;
        let shift = self.frame_count as u32;
        RgbImage::from_fn(self.width, self.height, |x, y| {
            let band = (x + y + shift) % 64 < 16;
            if band {
                Rgb([40, 90, 30])
            } else {
                Rgb([(x % 64) as u8 + 60, 160, (y % 64) as u8 + 40])
            }
        })
    }
}

// ----------------------------------------------------------------------------
// Network snapshot camera
// ----------------------------------------------------------------------------

struct SnapshotCamera {
    url: String,
    agent: ureq::Agent,
}

impl SnapshotCamera {
    fn acquire(url: &str) -> ClientResult<Self> {
        let agent = ureq::AgentBuilder::new().timeout(SNAPSHOT_TIMEOUT).build();
        let camera = Self {
            url: url.to_string(),
            agent,
        };
        // Probe once so a denied or unreachable camera fails at open, not at capture.
        camera.fetch()?;
        Ok(camera)
    }

    fn grab(&mut self) -> ClientResult<RgbImage> {
        let bytes = self.fetch()?;
        normalize_to_rgb(&bytes, 0, 0, PixelFormat::Mjpeg)
    }

    fn fetch(&self) -> ClientResult<Vec<u8>> {
        let response = match self.agent.get(&self.url).call() {
            Ok(response) => response,
            Err(ureq::Error::Status(code @ (401 | 403), _)) => {
                return Err(ClientError::Permission(format!(
                    "{} answered {}",
                    self.url, code
                )))
            }
            Err(ureq::Error::Status(code, _)) => {
                return Err(ClientError::CameraUnavailable(format!(
                    "{} answered {}",
                    self.url, code
                )))
            }
            Err(ureq::Error::Transport(err)) => {
                return Err(ClientError::CameraUnavailable(format!(
                    "{}: {}",
                    self.url, err
                )))
            }
        };
        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(MAX_SNAPSHOT_BYTES)
            .read_to_end(&mut bytes)?;
        if bytes.is_empty() {
            return Err(ClientError::CameraUnavailable(format!(
                "{} returned an empty snapshot",
                self.url
            )));
        }
        Ok(bytes)
    }
}

// ----------------------------------------------------------------------------
// Local V4L2 device
// ----------------------------------------------------------------------------

#[cfg(feature = "camera-v4l2")]
mod device {
    use image::RgbImage;
    use ouroboros::self_referencing;

    use super::CameraConfig;
    use crate::error::{ClientError, ClientResult};
    use crate::ingest::normalize::{normalize_to_rgb, PixelFormat};

    pub(super) struct DeviceCamera {
        name: String,
        format: PixelFormat,
        width: u32,
        height: u32,
        state: DeviceState,
    }

    #[self_referencing]
    struct DeviceState {
        device: v4l::Device,
        #[borrows(mut device)]
        #[covariant]
        stream: v4l::prelude::MmapStream<'this, v4l::Device>,
    }

    impl DeviceCamera {
        pub(super) fn acquire(path: &str, config: &CameraConfig) -> ClientResult<Self> {
            use v4l::buffer::Type;
            use v4l::video::Capture;

            let mut device = v4l::Device::with_path(path).map_err(|err| open_error(path, err))?;
            let mut format = device
                .format()
                .map_err(|err| ClientError::CameraUnavailable(format!("{}: {}", path, err)))?;
            format.width = config.width;
            format.height = config.height;
            format.fourcc = v4l::FourCC::new(b"MJPG");
            let format = match device.set_format(&format) {
                Ok(format) => format,
                Err(err) => {
                    log::warn!("CameraSource: failed to set format on {}: {}", path, err);
                    device.format().map_err(|err| {
                        ClientError::CameraUnavailable(format!("{}: {}", path, err))
                    })?
                }
            };
            let pixel_format = match &format.fourcc.repr {
                b"MJPG" => PixelFormat::Mjpeg,
                b"YUYV" => PixelFormat::Yuyv,
                b"RGB3" => PixelFormat::Rgb24,
                other => {
                    return Err(ClientError::CameraUnavailable(format!(
                        "{} delivers unsupported pixel format {}",
                        path,
                        String::from_utf8_lossy(other)
                    )))
                }
            };

            let state = DeviceStateTryBuilder {
                device,
                stream_builder: |device| {
                    v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                        .map_err(|err| open_error(path, err))
                },
            }
            .try_build()?;

            log::info!(
                "CameraSource: opened {} ({}x{} {:?})",
                path,
                format.width,
                format.height,
                pixel_format
            );
            Ok(Self {
                name: path.to_string(),
                format: pixel_format,
                width: format.width,
                height: format.height,
                state,
            })
        }

        pub(super) fn name(&self) -> &str {
            &self.name
        }

        pub(super) fn grab(&mut self) -> ClientResult<RgbImage> {
            use v4l::io::traits::CaptureStream;

            let (format, width, height) = (self.format, self.width, self.height);
            let name = self.name.clone();
            self.state.with_stream_mut(|stream| {
                let (buf, meta) = stream
                    .next()
                    .map_err(|err| ClientError::CameraUnavailable(format!("{}: {}", name, err)))?;
                let used = (meta.bytesused as usize).min(buf.len());
                let frame = if used > 0 { &buf[..used] } else { buf };
                normalize_to_rgb(frame, width, height, format)
            })
        }
    }

    fn open_error(path: &str, err: std::io::Error) -> ClientError {
        match err.kind() {
            std::io::ErrorKind::PermissionDenied => {
                ClientError::Permission(format!("{}: {}", path, err))
            }
            _ => ClientError::CameraUnavailable(format!("{}: {}", path, err)),
        }
    }
}
