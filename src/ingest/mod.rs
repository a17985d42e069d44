//! Image capture sources.
//!
//! This module provides the two ways a user hands the client a photo:
//! - Local image files (`file`)
//! - Cameras (`camera`): synthetic `stub://` cameras, network snapshot cameras,
//!   and V4L2 devices (feature: camera-v4l2)
//!
//! All sources produce a `RawImage` owned by the caller's session.
//! The capture layer is responsible for:
//! - Rejecting unusable input (wrong type, too large, undecodable) before any network call
//! - Releasing camera streams on every exit path
//!
//! The capture layer MUST NOT:
//! - Write captured images to disk
//! - Log image content

pub mod camera;
pub mod file;
mod normalize;

pub use camera::{CameraConfig, CameraSource, CameraStats, Facing};
pub use file::{FileCandidate, FileConfig, FileSource, MAX_UPLOAD_BYTES};
