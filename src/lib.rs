//! leafscan
//!
//! Client library for a plant-leaf disease diagnosis service.
//!
//! # Architecture
//!
//! A diagnosis flows through four stages:
//!
//! 1. **Capture**: a `RawImage` comes from a file or a camera (`ingest`).
//! 2. **Prediction**: the image is submitted; the server either answers or asks
//!    for a tighter crop (`session`, `api`).
//! 3. **Crop negotiation**: a selection over the *original* capture is turned
//!    into a `CropRectangle` in original pixels plus a JPEG crop (`crop`, `geometry`).
//! 4. **Result**: a terminal verdict (`yolo_detected`, `not_plant`, or crop limit reached).
//!
//! Past results are browsed with the `history` viewer.
//!
//! # Module Structure
//!
//! - `ingest`: Capture sources (files, cameras)
//! - `raster`: Owned image buffers (RawImage, CroppedImage)
//! - `geometry`, `crop`: Coordinate mapping and crop rendering
//! - `session`: Prediction state machine
//! - `api`: REST client and wire types
//! - `auth`, `history`, `config`: Identity, history browsing, settings
//! - `cli`, `ui`: Terminal front end

pub mod api;
pub mod auth;
pub mod cli;
pub mod config;
pub mod crop;
pub mod error;
pub mod geometry;
pub mod history;
pub mod ingest;
pub mod raster;
pub mod session;
pub mod ui;

pub use api::types::{
    AuthStatus, CnnResult, Detection, DiseaseInfo, FinalStatus, HistoryPage, HistoryRecord,
    Pagination, PredictCropRequest, PredictRequest, PredictionResponse, UserProfile, UserStats,
    YoloResult,
};
pub use api::{ApiClient, ApiConfig, CookieJar};
pub use auth::AuthContext;
pub use config::ClientConfig;
pub use crop::{AspectRatio, CropNegotiator, CropOutcome};
pub use error::{ClientError, ClientResult};
pub use geometry::{CropRectangle, DisplayBox, Size};
pub use history::{HistoryBackend, HistoryQuery, HistoryViewer, OrderBy, OrderDir};
pub use ingest::{CameraConfig, CameraSource, Facing, FileConfig, FileSource};
pub use raster::{CroppedImage, ImageHandle, ImageSource, RawImage};
pub use session::{
    PredictionBackend, PredictionSession, SessionState, Step, Ticket, Verdict,
    DEFAULT_MAX_CROP_COUNT,
};
