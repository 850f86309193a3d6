use crate::pipeline::{Emotion, EmotionDistribution, FaceEmotion, PipelineOutput};
use crate::shapes::FaceBox;
use serde::{Deserialize, Serialize};

pub const NO_FACE_MESSAGE: &str = "No face detected";

#[derive(Debug, Deserialize)]
pub struct PredictRequest {
    pub image: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StreamRequest {
    pub frame: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FaceResult {
    pub face_coordinates: FaceBox,
    pub predicted_emotion: Emotion,
    pub confidence: f32,
    pub emotion_distribution: EmotionDistribution,
}

impl From<FaceEmotion> for FaceResult {
    fn from(f: FaceEmotion) -> FaceResult {
        FaceResult {
            face_coordinates: f.face,
            predicted_emotion: f.classification.emotion,
            confidence: f.classification.confidence,
            emotion_distribution: f.classification.distribution,
        }
    }
}

/// `/predict_emotion` body. No face is a `success: false` answer, not an
/// error.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum PredictResponse {
    Faces {
        success: bool,
        faces_detected: usize,
        results: Vec<FaceResult>,
    },
    NoFace {
        success: bool,
        message: String,
    },
}

impl From<Vec<FaceEmotion>> for PredictResponse {
    fn from(faces: Vec<FaceEmotion>) -> PredictResponse {
        if faces.is_empty() {
            return PredictResponse::NoFace {
                success: false,
                message: NO_FACE_MESSAGE.to_string(),
            };
        }

        PredictResponse::Faces {
            success: true,
            faces_detected: faces.len(),
            results: faces.into_iter().map(FaceResult::from).collect(),
        }
    }
}

/// `/predict_emotion_stream` body. No face reads as neutral with zero
/// confidence, kept for compatibility with existing stream clients.
#[derive(Debug, Serialize)]
pub struct StreamResponse {
    pub success: bool,
    pub emotion: Emotion,
    pub confidence: f32,
    pub faces_detected: usize,
    pub emotion_distribution: EmotionDistribution,
}

impl StreamResponse {
    pub fn new(faces_detected: usize, face: Option<FaceEmotion>) -> StreamResponse {
        match face {
            Some(f) => StreamResponse {
                success: true,
                emotion: f.classification.emotion,
                confidence: f.classification.confidence,
                faces_detected,
                emotion_distribution: f.classification.distribution,
            },
            None => StreamResponse {
                success: true,
                emotion: Emotion::Neutral,
                confidence: 0.,
                faces_detected,
                emotion_distribution: EmotionDistribution::zeros(),
            },
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum InferenceResponse {
    Predict(PredictResponse),
    Stream(StreamResponse),
}

impl From<PipelineOutput> for InferenceResponse {
    fn from(output: PipelineOutput) -> InferenceResponse {
        match output {
            PipelineOutput::AllFaces(faces) => InferenceResponse::Predict(faces.into()),
            PipelineOutput::LargestFace {
                faces_detected,
                face,
            } => InferenceResponse::Stream(StreamResponse::new(faces_detected, face)),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub model_loaded: bool,
    pub face_cascade_loaded: bool,
    pub model_type: Option<&'static str>,
    pub emotion_classes: Vec<&'static str>,
}
