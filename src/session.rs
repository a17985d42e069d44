//! Prediction session state machine.
//!
//! A session owns one capture at a time and sequences it through the server's
//! two-stage workflow:
//!
//! ```text
//! Idle --submit--> Processing --need_crop--> NeedCrop --submit_crop--> Processing
//!                      |                                                   |
//!                      +----- yolo_detected / not_plant / limit ------> Result
//! ```
//!
//! Each request is bound to a `Ticket`. `abort` invalidates the outstanding
//! ticket and restores the state the request was issued from, so a response
//! that arrives late is discarded instead of overwriting newer state.

use std::fmt;

use crate::api::types::{FinalStatus, PredictCropRequest, PredictRequest, PredictionResponse};
use crate::crop::CropOutcome;
use crate::error::{ClientError, ClientResult};
use crate::raster::RawImage;

pub const DEFAULT_MAX_CROP_COUNT: u32 = 3;

/// Anything that can answer the two prediction endpoints.
pub trait PredictionBackend {
    fn predict(&mut self, request: &PredictRequest) -> ClientResult<PredictionResponse>;

    fn predict_crop(&mut self, request: &PredictCropRequest) -> ClientResult<PredictionResponse>;
}

/// Identifies one in-flight request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Ticket(u64);

/// Terminal classification of a capture.
#[derive(Clone, Debug)]
pub enum Verdict {
    /// The detector confirmed a disease (or a healthy leaf).
    Detected(Box<PredictionResponse>),
    /// The image is not a plant.
    NotPlant(Box<PredictionResponse>),
    /// The server still wanted a tighter crop after the last allowed round.
    CropLimitReached(Box<PredictionResponse>),
}

impl Verdict {
    pub fn response(&self) -> &PredictionResponse {
        match self {
            Verdict::Detected(resp) | Verdict::NotPlant(resp) | Verdict::CropLimitReached(resp) => {
                resp.as_ref()
            }
        }
    }
}

/// Where a request returns to when it fails or is aborted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resume {
    Idle,
    NeedCrop {
        prediction_id: String,
        crop_count: u32,
    },
}

#[derive(Clone, Debug)]
pub enum SessionState {
    Idle,
    Processing { resume: Resume },
    NeedCrop {
        prediction_id: String,
        crop_count: u32,
    },
    Result(Verdict),
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Processing { .. } => "processing",
            SessionState::NeedCrop { .. } => "need_crop",
            SessionState::Result(_) => "result",
        }
    }

    fn from_resume(resume: Resume) -> Self {
        match resume {
            Resume::Idle => SessionState::Idle,
            Resume::NeedCrop {
                prediction_id,
                crop_count,
            } => SessionState::NeedCrop {
                prediction_id,
                crop_count,
            },
        }
    }
}

/// What a completed request moved the session to.
#[derive(Clone, Debug)]
pub enum Step {
    NeedCrop {
        prediction_id: String,
        crop_count: u32,
    },
    Done(Verdict),
}

pub struct PredictionSession {
    max_crop_count: u32,
    state: SessionState,
    original: Option<RawImage>,
    generation: u64,
    in_flight: Option<Ticket>,
}

impl fmt::Debug for PredictionSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PredictionSession")
            .field("state", &self.state.name())
            .field("crop_count", &self.crop_count())
            .field("max_crop_count", &self.max_crop_count)
            .field("original", &self.original.as_ref().map(|img| img.handle()))
            .finish()
    }
}

impl Default for PredictionSession {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CROP_COUNT)
    }
}

impl PredictionSession {
    pub fn new(max_crop_count: u32) -> Self {
        Self {
            max_crop_count: max_crop_count.max(1),
            state: SessionState::Idle,
            original: None,
            generation: 0,
            in_flight: None,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn max_crop_count(&self) -> u32 {
        self.max_crop_count
    }

    /// Crop round the next crop submission belongs to; 1 outside of crop mode.
    pub fn crop_count(&self) -> u32 {
        match &self.state {
            SessionState::NeedCrop { crop_count, .. } => *crop_count,
            SessionState::Processing {
                resume: Resume::NeedCrop { crop_count, .. },
            } => *crop_count,
            _ => 1,
        }
    }

    pub fn prediction_id(&self) -> Option<&str> {
        match &self.state {
            SessionState::NeedCrop { prediction_id, .. }
            | SessionState::Processing {
                resume: Resume::NeedCrop { prediction_id, .. },
            } => Some(prediction_id),
            _ => None,
        }
    }

    /// The capture crops must be taken from.
    pub fn original(&self) -> Option<&RawImage> {
        self.original.as_ref()
    }

    pub fn is_processing(&self) -> bool {
        matches!(self.state, SessionState::Processing { .. })
    }

    /// Start a first-stage prediction for a new capture.
    ///
    /// Allowed from `Idle` and `Result`; the previous result is discarded.
    pub fn begin_submit(&mut self, image: RawImage) -> ClientResult<(Ticket, PredictRequest)> {
        match &self.state {
            SessionState::Processing { .. } => return Err(ClientError::Busy),
            SessionState::NeedCrop { .. } => {
                return Err(ClientError::InvalidState(
                    "a crop is pending; cancel the session before submitting a new image"
                        .to_string(),
                ))
            }
            SessionState::Idle | SessionState::Result(_) => {}
        }
        let request = PredictRequest {
            image: image.to_base64(),
            source: image.source(),
        };
        log::info!(
            "PredictionSession: submitting {} ({}x{}, {})",
            image.handle(),
            image.width(),
            image.height(),
            image.mime_type()
        );
        self.original = Some(image);
        let ticket = self.issue(Resume::Idle);
        Ok((ticket, request))
    }

    /// Start a crop round for the pending prediction.
    pub fn begin_crop(&mut self, outcome: &CropOutcome) -> ClientResult<(Ticket, PredictCropRequest)> {
        let (prediction_id, crop_count) = match &self.state {
            SessionState::Processing { .. } => return Err(ClientError::Busy),
            SessionState::NeedCrop {
                prediction_id,
                crop_count,
            } => (prediction_id.clone(), *crop_count),
            other => {
                return Err(ClientError::InvalidState(format!(
                    "no crop requested (session is {})",
                    other.name()
                )))
            }
        };
        let original = self.original.as_ref().ok_or_else(|| {
            ClientError::InvalidState("the original capture is gone".to_string())
        })?;
        if !outcome.rect.fits_within(original.size()) {
            return Err(ClientError::Validation(format!(
                "crop {}x{}+{}+{} lies outside the {}x{} original",
                outcome.rect.width(),
                outcome.rect.height(),
                outcome.rect.x(),
                outcome.rect.y(),
                original.width(),
                original.height()
            )));
        }
        let request = PredictCropRequest {
            prediction_id: prediction_id.clone(),
            crop_coordinates: outcome.rect,
            cropped_image: outcome.cropped.to_base64(),
            crop_count,
        };
        log::info!(
            "PredictionSession: crop round {}/{} for {}",
            crop_count,
            self.max_crop_count,
            prediction_id
        );
        let ticket = self.issue(Resume::NeedCrop {
            prediction_id,
            crop_count,
        });
        Ok((ticket, request))
    }

    /// Apply the answer to the request identified by `ticket`.
    ///
    /// A stale ticket yields `ClientError::Cancelled` and leaves the state untouched.
    /// A failed request restores the state it was issued from and returns the error.
    pub fn complete(
        &mut self,
        ticket: Ticket,
        result: ClientResult<PredictionResponse>,
    ) -> ClientResult<Step> {
        if self.in_flight != Some(ticket) {
            log::debug!("PredictionSession: discarding response for stale {:?}", ticket);
            return Err(ClientError::Cancelled);
        }
        self.in_flight = None;
        let resume = match std::mem::replace(&mut self.state, SessionState::Idle) {
            SessionState::Processing { resume } => resume,
            other => {
                self.state = other;
                return Err(ClientError::InvalidState(
                    "response arrived outside of processing".to_string(),
                ));
            }
        };

        let response = match result {
            Ok(response) => response,
            Err(err) => {
                log::warn!("PredictionSession: request failed: {}", err);
                self.state = SessionState::from_resume(resume);
                return Err(err);
            }
        };

        match response.final_status {
            FinalStatus::NeedCrop => self.enter_need_crop(resume, response),
            FinalStatus::YoloDetected => Ok(self.finish(Verdict::Detected(Box::new(response)))),
            FinalStatus::NotPlant => Ok(self.finish(Verdict::NotPlant(Box::new(response)))),
            FinalStatus::Unknown => {
                self.state = SessionState::from_resume(resume);
                Err(ClientError::InvalidResponse(
                    "server returned an unknown final_status".to_string(),
                ))
            }
        }
    }

    /// Submit a capture and wait for the answer.
    pub fn submit<B: PredictionBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        image: RawImage,
    ) -> ClientResult<Step> {
        let (ticket, request) = self.begin_submit(image)?;
        let result = backend.predict(&request);
        self.complete(ticket, result)
    }

    /// Submit a crop of the original capture and wait for the answer.
    pub fn submit_crop<B: PredictionBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        outcome: &CropOutcome,
    ) -> ClientResult<Step> {
        let (ticket, request) = self.begin_crop(outcome)?;
        let result = backend.predict_crop(&request);
        self.complete(ticket, result)
    }

    /// Drop the in-flight request and return to the state it was issued from.
    pub fn abort(&mut self) -> ClientResult<()> {
        let resume = match &self.state {
            SessionState::Processing { resume } => resume.clone(),
            other => {
                return Err(ClientError::InvalidState(format!(
                    "nothing to abort (session is {})",
                    other.name()
                )))
            }
        };
        self.in_flight = None;
        self.generation += 1;
        if resume == Resume::Idle {
            self.original = None;
        }
        log::info!("PredictionSession: request aborted, back to {:?}", resume);
        self.state = SessionState::from_resume(resume);
        Ok(())
    }

    /// Forget the pending prediction and the original capture.
    pub fn cancel(&mut self) -> ClientResult<()> {
        if self.is_processing() {
            return Err(ClientError::Busy);
        }
        if let Some(image) = self.original.take() {
            log::info!("PredictionSession: discarded {}", image.handle());
        }
        self.state = SessionState::Idle;
        Ok(())
    }

    fn issue(&mut self, resume: Resume) -> Ticket {
        self.generation += 1;
        let ticket = Ticket(self.generation);
        self.in_flight = Some(ticket);
        self.state = SessionState::Processing { resume };
        ticket
    }

    fn enter_need_crop(&mut self, resume: Resume, response: PredictionResponse) -> ClientResult<Step> {
        let (previous_id, next_count) = match resume {
            Resume::Idle => (None, 1),
            Resume::NeedCrop {
                prediction_id,
                crop_count,
            } => {
                if crop_count >= self.max_crop_count {
                    log::info!(
                        "PredictionSession: crop limit {} reached for {}",
                        self.max_crop_count,
                        prediction_id
                    );
                    return Ok(self.finish(Verdict::CropLimitReached(Box::new(response))));
                }
                (Some(prediction_id), crop_count + 1)
            }
        };
        let prediction_id = match response.prediction_id.clone().or(previous_id) {
            Some(id) if !id.is_empty() => id,
            _ => {
                self.state = SessionState::Idle;
                self.original = None;
                return Err(ClientError::InvalidResponse(
                    "need_crop answer without prediction_id".to_string(),
                ));
            }
        };
        log::info!(
            "PredictionSession: server asks for crop {}/{} ({})",
            next_count,
            self.max_crop_count,
            prediction_id
        );
        self.state = SessionState::NeedCrop {
            prediction_id: prediction_id.clone(),
            crop_count: next_count,
        };
        Ok(Step::NeedCrop {
            prediction_id,
            crop_count: next_count,
        })
    }

    fn finish(&mut self, verdict: Verdict) -> Step {
        self.original = None;
        self.state = SessionState::Result(verdict.clone());
        Step::Done(verdict)
    }
}
