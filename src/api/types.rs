//! Wire types for the diagnosis service.
//!
//! Response shapes the server varies (history arrays vs. paginated objects,
//! string-or-list descriptive fields, flat vs. nested boxes) are normalized
//! here, once, so nothing past this module sees the variation.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

use crate::geometry::CropRectangle;
use crate::raster::ImageSource;

#[derive(Debug, Serialize)]
pub struct PredictRequest {
    /// Base64 image without a data-URL prefix.
    pub image: String,
    pub source: ImageSource,
}

#[derive(Debug, Serialize)]
pub struct PredictCropRequest {
    pub prediction_id: String,
    pub crop_coordinates: CropRectangle,
    pub cropped_image: String,
    pub crop_count: u32,
}

/// Terminal or intermediate outcome reported by the server.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalStatus {
    YoloDetected,
    NeedCrop,
    NotPlant,
    #[serde(other)]
    Unknown,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CnnResult {
    #[serde(default)]
    pub mean_score: Option<f64>,
    #[serde(default)]
    pub best_class: Option<String>,
    #[serde(default)]
    pub best_score: Option<f64>,
    #[serde(default)]
    pub all_scores: BTreeMap<String, f64>,
}

impl CnnResult {
    /// Class scores, highest first.
    pub fn ranked(&self) -> Vec<(&str, f64)> {
        let mut scores: Vec<(&str, f64)> = self
            .all_scores
            .iter()
            .map(|(class, score)| (class.as_str(), *score))
            .collect();
        scores.sort_by(|a, b| b.1.total_cmp(&a.1));
        scores
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct YoloResult {
    #[serde(default)]
    pub detected: bool,
    #[serde(default)]
    pub detections: Vec<Detection>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Detection {
    pub class: String,
    pub confidence: f64,
    /// `[x1, y1, x2, y2]` in pixels of the submitted image.
    #[serde(default, deserialize_with = "de_bbox")]
    pub bbox: Option<[f64; 4]>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BboxWire {
    Flat(Vec<f64>),
    Nested(Vec<Vec<f64>>),
}

fn de_bbox<'de, D>(deserializer: D) -> Result<Option<[f64; 4]>, D::Error>
where
    D: Deserializer<'de>,
{
    let wire = Option::<BboxWire>::deserialize(deserializer)?;
    let flat = match wire {
        None => return Ok(None),
        Some(BboxWire::Flat(values)) => values,
        Some(BboxWire::Nested(rows)) => rows.into_iter().next().unwrap_or_default(),
    };
    Ok(match flat.as_slice() {
        [x1, y1, x2, y2] => Some([*x1, *y1, *x2, *y2]),
        _ => None,
    })
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TextOrList {
    Text(String),
    List(Vec<String>),
}

fn de_text_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<TextOrList>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(TextOrList::Text(text)) if text.trim().is_empty() => Vec::new(),
        Some(TextOrList::Text(text)) => vec![text],
        Some(TextOrList::List(items)) => items,
    })
}

/// Descriptive block attached to a diagnosis.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DiseaseInfo {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "de_text_list")]
    pub causes: Vec<String>,
    #[serde(default, deserialize_with = "de_text_list")]
    pub features: Vec<String>,
    #[serde(default, deserialize_with = "de_text_list")]
    pub symptoms: Vec<String>,
    #[serde(default, deserialize_with = "de_text_list")]
    pub target_crops: Vec<String>,
    #[serde(default, deserialize_with = "de_text_list")]
    pub severity_levels: Vec<String>,
    #[serde(default, deserialize_with = "de_text_list")]
    pub management_measures: Vec<String>,
    #[serde(default, deserialize_with = "de_text_list")]
    pub pesticides: Vec<String>,
    #[serde(default, deserialize_with = "de_text_list")]
    pub prevention_tips: Vec<String>,
    #[serde(default, deserialize_with = "de_text_list")]
    pub reference_links: Vec<String>,
}

/// Body of `/api/predict` and `/api/predict-crop`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PredictionResponse {
    pub final_status: FinalStatus,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub workflow: Option<String>,
    #[serde(default)]
    pub prediction_id: Option<String>,
    #[serde(default)]
    pub disease: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub image_path: Option<String>,
    #[serde(default)]
    pub predict_img_url: Option<String>,
    #[serde(default)]
    pub processing_time_ms: Option<f64>,
    #[serde(default)]
    pub cnn_time_ms: Option<f64>,
    #[serde(default)]
    pub yolo_time_ms: Option<f64>,
    #[serde(default)]
    pub cnn_result: Option<CnnResult>,
    #[serde(default)]
    pub yolo_result: Option<YoloResult>,
    #[serde(default)]
    pub disease_info: Option<DiseaseInfo>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: i64,
    /// Display label (the server maps raw classes such as `others` to friendly names).
    #[serde(default)]
    pub disease: Option<String>,
    /// Raw class name.
    #[serde(default)]
    pub disease_name: Option<String>,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub image_path: Option<String>,
    #[serde(default)]
    pub image_source: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub processing_time_ms: Option<f64>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl HistoryRecord {
    /// Label shown to users, falling back to the raw class.
    pub fn label(&self) -> &str {
        self.disease
            .as_deref()
            .or(self.disease_name.as_deref())
            .unwrap_or("unknown")
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u32,
    pub per_page: u32,
    pub total: u64,
    pub total_pages: u32,
    pub has_next: bool,
    pub has_prev: bool,
}

impl Pagination {
    /// Pagination for a list that is known to be complete.
    pub fn single_page(len: usize, per_page: u32) -> Self {
        Self {
            page: 1,
            per_page,
            total: len as u64,
            total_pages: if len == 0 { 0 } else { 1 },
            has_next: false,
            has_prev: false,
        }
    }

    pub fn empty(per_page: u32) -> Self {
        Self::single_page(0, per_page)
    }
}

/// One page of history, whatever shape the server answered with.
#[derive(Clone, Debug, PartialEq)]
pub struct HistoryPage {
    pub records: Vec<HistoryRecord>,
    pub pagination: Pagination,
}

#[derive(Deserialize)]
#[serde(untagged)]
pub(crate) enum HistoryWire {
    Paged {
        records: Vec<HistoryRecord>,
        pagination: Option<Pagination>,
    },
    Legacy(Vec<HistoryRecord>),
}

impl HistoryWire {
    pub(crate) fn normalize(self, per_page: u32) -> HistoryPage {
        match self {
            HistoryWire::Paged {
                records,
                pagination,
            } => {
                let pagination =
                    pagination.unwrap_or_else(|| Pagination::single_page(records.len(), per_page));
                HistoryPage {
                    records,
                    pagination,
                }
            }
            HistoryWire::Legacy(records) => {
                let pagination = Pagination::single_page(records.len(), per_page);
                HistoryPage {
                    records,
                    pagination,
                }
            }
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct DeleteHistoryRequest {
    pub record_id: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserProfile {
    pub email: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub last_login: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct UserStats {
    #[serde(default)]
    pub total_detections: u64,
    #[serde(default)]
    pub disease_stats: BTreeMap<String, u64>,
    #[serde(default)]
    pub severity_stats: BTreeMap<String, u64>,
}

#[derive(Debug, Serialize)]
pub(crate) struct Credentials<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct ChangePasswordRequest<'a> {
    pub old_password: &'a str,
    pub new_password: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct UpdateProfileRequest<'a> {
    pub username: &'a str,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AuthStatus {
    pub authenticated: bool,
    #[serde(default)]
    pub email: Option<String>,
}

/// `{"status": ...}` acknowledgement used by mutating endpoints.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StatusMessage {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Error body of a non-2xx answer.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}
