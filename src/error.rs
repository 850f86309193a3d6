use thiserror::Error;

/// Failures of the inference pipeline.
///
/// Finding no face is a normal outcome and has no variant here.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid image data: {0}")]
    Decode(String),

    /// Names the missing handle; the message stays generic for clients.
    #[error("Model or face cascade not loaded")]
    ModelUnavailable(&'static str),

    #[error("classification failed: {0}")]
    Classification(String),

    #[error("invalid detection parameters: {0}")]
    InvalidParams(String),

    #[error("inference exceeded {0}ms")]
    Timeout(u64),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
