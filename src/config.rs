use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::api::{ApiConfig, DEFAULT_BASE_URL};
use crate::ingest::{CameraConfig, Facing, FileConfig, MAX_UPLOAD_BYTES};
use crate::session::DEFAULT_MAX_CROP_COUNT;

const DEFAULT_PREDICT_TIMEOUT_SECS: u64 = 120;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
const DEFAULT_CAMERA_BACK: &str = "stub://back_camera";
const DEFAULT_CAMERA_FRONT: &str = "stub://front_camera";
const DEFAULT_DISPLAY_WIDTH: u32 = 720;
const DEFAULT_DISPLAY_HEIGHT: u32 = 1280;
const DEFAULT_CAMERA_WIDTH: u32 = 1280;
const DEFAULT_CAMERA_HEIGHT: u32 = 720;
/// Long edge of crops sent to the server.
const DEFAULT_CROP_OUTPUT_EDGE: u32 = 800;
const DEFAULT_COOKIE_FILE: &str = ".leafscan-session.json";

#[derive(Debug, Deserialize, Default)]
struct ClientConfigFile {
    api: Option<ApiConfigFile>,
    camera: Option<CameraConfigFile>,
    capture: Option<CaptureConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    base_url: Option<String>,
    cookie_path: Option<PathBuf>,
    predict_timeout_secs: Option<u64>,
    request_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    back: Option<String>,
    front: Option<String>,
    facing: Option<Facing>,
    width: Option<u32>,
    height: Option<u32>,
    display_width: Option<u32>,
    display_height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
    max_upload_bytes: Option<u64>,
    max_crop_count: Option<u32>,
    crop_output_edge: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api: ApiConfig,
    pub camera: CameraConfig,
    pub capture: CaptureSettings,
}

#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub max_upload_bytes: u64,
    pub max_crop_count: u32,
    /// Crops are scaled so their longest edge is at most this; 0 keeps full resolution.
    pub crop_output_edge: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::from_file(ClientConfigFile::default())
    }
}

impl ClientConfig {
    /// Defaults, then the file named by `LEAFSCAN_CONFIG`, then `LEAFSCAN_*` overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("LEAFSCAN_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn file_config(&self) -> FileConfig {
        FileConfig {
            max_bytes: self.capture.max_upload_bytes,
        }
    }

    fn from_file(file: ClientConfigFile) -> Self {
        let api_file = file.api.unwrap_or_default();
        let camera_file = file.camera.unwrap_or_default();
        let capture_file = file.capture.unwrap_or_default();

        let api = ApiConfig {
            base_url: api_file
                .base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            predict_timeout: Duration::from_secs(
                api_file
                    .predict_timeout_secs
                    .unwrap_or(DEFAULT_PREDICT_TIMEOUT_SECS),
            ),
            request_timeout: Duration::from_secs(
                api_file
                    .request_timeout_secs
                    .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
            ),
            cookie_path: Some(api_file.cookie_path.unwrap_or_else(default_cookie_path)),
        };
        let camera = CameraConfig {
            back_device: camera_file
                .back
                .unwrap_or_else(|| DEFAULT_CAMERA_BACK.to_string()),
            front_device: camera_file
                .front
                .unwrap_or_else(|| DEFAULT_CAMERA_FRONT.to_string()),
            facing: camera_file.facing.unwrap_or_default(),
            display_width: camera_file.display_width.unwrap_or(DEFAULT_DISPLAY_WIDTH),
            display_height: camera_file
                .display_height
                .unwrap_or(DEFAULT_DISPLAY_HEIGHT),
            width: camera_file.width.unwrap_or(DEFAULT_CAMERA_WIDTH),
            height: camera_file.height.unwrap_or(DEFAULT_CAMERA_HEIGHT),
        };
        let capture = CaptureSettings {
            max_upload_bytes: capture_file.max_upload_bytes.unwrap_or(MAX_UPLOAD_BYTES),
            max_crop_count: capture_file
                .max_crop_count
                .unwrap_or(DEFAULT_MAX_CROP_COUNT),
            crop_output_edge: capture_file
                .crop_output_edge
                .unwrap_or(DEFAULT_CROP_OUTPUT_EDGE),
        };
        Self {
            api,
            camera,
            capture,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("LEAFSCAN_API_BASE_URL") {
            if !url.trim().is_empty() {
                self.api.base_url = url.trim().to_string();
            }
        }
        if let Ok(path) = std::env::var("LEAFSCAN_COOKIE_PATH") {
            if !path.trim().is_empty() {
                self.api.cookie_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(device) = std::env::var("LEAFSCAN_CAMERA_BACK") {
            if !device.trim().is_empty() {
                self.camera.back_device = device;
            }
        }
        if let Ok(device) = std::env::var("LEAFSCAN_CAMERA_FRONT") {
            if !device.trim().is_empty() {
                self.camera.front_device = device;
            }
        }
        if let Some(count) = env_number::<u32>("LEAFSCAN_MAX_CROP_COUNT")? {
            self.capture.max_crop_count = count;
        }
        if let Some(secs) = env_number::<u64>("LEAFSCAN_PREDICT_TIMEOUT_SECS")? {
            self.api.predict_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_number::<u64>("LEAFSCAN_REQUEST_TIMEOUT_SECS")? {
            self.api.request_timeout = Duration::from_secs(secs);
        }
        if let Some(bytes) = env_number::<u64>("LEAFSCAN_MAX_UPLOAD_BYTES")? {
            self.capture.max_upload_bytes = bytes;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        let url = url::Url::parse(&self.api.base_url)
            .map_err(|e| anyhow!("invalid api base url '{}': {}", self.api.base_url, e))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(anyhow!("api base url must use http or https"));
        }
        self.api.base_url = self.api.base_url.trim_end_matches('/').to_string();

        if self.api.predict_timeout.as_secs() == 0 || self.api.request_timeout.as_secs() == 0 {
            return Err(anyhow!("timeouts must be greater than zero"));
        }
        if self.capture.max_crop_count == 0 {
            return Err(anyhow!("max crop count must be at least 1"));
        }
        if self.capture.max_upload_bytes == 0 {
            return Err(anyhow!("max upload size must be greater than zero"));
        }
        if self.camera.display_width == 0 || self.camera.display_height == 0 {
            return Err(anyhow!("camera display size must be non-zero"));
        }
        Ok(())
    }
}

fn default_cookie_path() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(DEFAULT_COOKIE_FILE),
        None => PathBuf::from(DEFAULT_COOKIE_FILE),
    }
}

fn env_number<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("{} must be a non-negative integer", name)),
        _ => Ok(None),
    }
}

fn read_config_file(path: &Path) -> Result<ClientConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
