use crate::error::PipelineError;
use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::{error, warn};

/// Anything a handler can fail with. Always rendered as `{"error": ...}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    /// Body extraction failed; keeps the extractor's own status (413, 415, 422...).
    #[error("{1}")]
    Rejection(StatusCode, String),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    /// Same as `Pipeline`, raised from the stream endpoint.
    #[error(transparent)]
    StreamPipeline(PipelineError),
    #[error("{0}")]
    Internal(String),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> ApiError {
        ApiError::Rejection(rejection.status(), rejection.body_text())
    }
}

fn pipeline_status(e: &PipelineError) -> StatusCode {
    match e {
        PipelineError::Decode(_) => StatusCode::BAD_REQUEST,
        PipelineError::Timeout(_) => StatusCode::SERVICE_UNAVAILABLE,
        PipelineError::ModelUnavailable(_)
        | PipelineError::Classification(_)
        | PipelineError::InvalidParams(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Rejection(status, _) => *status,
            Self::Pipeline(e) | Self::StreamPipeline(e) => pipeline_status(e),
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Re-tags pipeline failures as coming from the stream endpoint.
    pub fn in_stream(self) -> ApiError {
        match self {
            Self::Pipeline(e) => Self::StreamPipeline(e),
            other => other,
        }
    }

    fn message(&self) -> String {
        match self {
            Self::Pipeline(PipelineError::Classification(_)) => {
                format!("Prediction failed: {self}")
            }
            Self::StreamPipeline(PipelineError::Classification(_)) => {
                format!("Stream prediction failed: {self}")
            }
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.message();

        if status.is_server_error() {
            error!(cause = ?self, "{status}: {message}");
        } else {
            warn!("{status}: {message}");
        }

        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::from(PipelineError::Decode("x".into())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(PipelineError::ModelUnavailable("face cascade")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ApiError::from(PipelineError::Timeout(10)).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::BadRequest("No image data provided".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Rejection(StatusCode::PAYLOAD_TOO_LARGE, "too big".into()).status(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
    }

    #[test]
    fn test_messages_per_endpoint() {
        let failure = || PipelineError::Classification("nan output".into());

        assert_eq!(
            ApiError::from(failure()).message(),
            "Prediction failed: classification failed: nan output"
        );
        assert_eq!(
            ApiError::from(failure()).in_stream().message(),
            "Stream prediction failed: classification failed: nan output"
        );
        assert_eq!(
            ApiError::from(PipelineError::ModelUnavailable("emotion model")).message(),
            "Model or face cascade not loaded"
        );
        assert!(matches!(
            ApiError::BadRequest("x".into()).in_stream(),
            ApiError::BadRequest(_)
        ));
    }
}
