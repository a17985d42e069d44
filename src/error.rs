//! Client error types.
//!
//! Every failure the client can surface to a user maps to one variant here.
//! None of them are retried automatically; callers report the message and
//! return to the last stable interactive state.

use thiserror::Error;

pub type ClientResult<T> = Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    /// Input rejected before any network call (file too large, not an image, bad crop).
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("camera permission denied: {0}")]
    Permission(String),

    #[error("camera unavailable: {0}")]
    CameraUnavailable(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out after {0} seconds")]
    Timeout(u64),

    /// 401 from a path that requires a session. The auth context has been cleared.
    #[error("not logged in (server returned 401 for {0})")]
    Unauthorized(String),

    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("could not decode image: {0}")]
    Decode(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// A prediction request is already in flight for this session.
    #[error("a request is already in progress")]
    Busy,

    #[error("invalid session state: {0}")]
    InvalidState(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ClientError {
    /// Short message suitable for a one-line notification.
    pub fn user_message(&self) -> String {
        match self {
            ClientError::Validation(msg) => msg.clone(),
            ClientError::Permission(_) => {
                "Camera access was denied. Check permissions or upload a file instead.".to_string()
            }
            ClientError::CameraUnavailable(_) => {
                "No camera is available. Upload a file instead.".to_string()
            }
            ClientError::Unauthorized(_) => "Please log in first.".to_string(),
            ClientError::Server { message, .. } => message.clone(),
            ClientError::Timeout(secs) => format!("The server did not answer within {secs}s."),
            other => other.to_string(),
        }
    }

    /// True for failures that leave the user logged out.
    pub fn requires_login(&self) -> bool {
        matches!(self, ClientError::Unauthorized(_))
    }
}

impl From<image::ImageError> for ClientError {
    fn from(err: image::ImageError) -> Self {
        ClientError::Decode(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_surface_the_server_message() {
        let err = ClientError::Server {
            status: 400,
            message: "old password is incorrect".to_string(),
        };
        assert_eq!(err.user_message(), "old password is incorrect");
        assert!(!err.requires_login());
    }

    #[test]
    fn unauthorized_requires_login() {
        let err = ClientError::Unauthorized("/history".to_string());
        assert!(err.requires_login());
    }
}
