use super::AppState;
use super::error::ApiError;
use super::schema::{HealthResponse, InferenceResponse, PredictRequest, StreamRequest};
use crate::error::PipelineError;
use crate::payload::decode_data_url;
use crate::pipeline::{Emotion, Mode, PipelineOutput};
use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use tracing::{debug, instrument};

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        model_loaded: state.models.classifier_loaded(),
        face_cascade_loaded: state.models.locator_loaded(),
        model_type: state.models.classifier_kind(),
        emotion_classes: Emotion::ALL.iter().map(|e| e.class_name()).collect(),
    })
}

pub async fn predict_emotion(
    State(state): State<AppState>,
    payload: Result<Json<PredictRequest>, JsonRejection>,
) -> Result<Json<InferenceResponse>, ApiError> {
    let Json(request) = payload?;
    let image = request
        .image
        .ok_or_else(|| ApiError::BadRequest("No image data provided".to_string()))?;

    let output = run_inference(&state, &image, Mode::AllFaces).await?;
    Ok(Json(output.into()))
}

pub async fn predict_emotion_stream(
    State(state): State<AppState>,
    payload: Result<Json<StreamRequest>, JsonRejection>,
) -> Result<Json<InferenceResponse>, ApiError> {
    let Json(request) = payload?;
    let frame = request
        .frame
        .ok_or_else(|| ApiError::BadRequest("No frame data provided".to_string()))?;

    let output = run_inference(&state, &frame, Mode::LargestFace)
        .await
        .map_err(ApiError::in_stream)?;
    Ok(Json(output.into()))
}

/// Decodes the payload and runs the blocking pipeline off the async
/// executor, bounded by the configured timeout. An expired timeout only
/// abandons the worker; the model call itself cannot be interrupted.
#[instrument(level = "debug", skip(state, payload))]
async fn run_inference(
    state: &AppState,
    payload: &str,
    mode: Mode,
) -> Result<PipelineOutput, ApiError> {
    let pipeline = state.models.pipeline(state.on_failure)?;
    let image_bytes = decode_data_url(payload)?;
    debug!("Decoded {} payload bytes", image_bytes.len());

    let worker = tokio::task::spawn_blocking(move || pipeline.infer(&image_bytes, mode));
    match tokio::time::timeout(state.request_timeout, worker).await {
        Err(_) => Err(PipelineError::Timeout(state.request_timeout.as_millis() as u64).into()),
        Ok(Err(join_err)) => Err(ApiError::Internal(format!(
            "inference worker failed: {join_err}"
        ))),
        Ok(Ok(res)) => Ok(res?),
    }
}
