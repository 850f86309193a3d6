use super::classifier::EmotionClassifier;
use super::cnn::UntrainedCnn;
use super::emotion::EmotionDistribution;
use crate::error::{PipelineError, Result};
use anyhow::Context;
use ndarray::Array4;
use ort::execution_providers;
use ort::session::Session;
use ort::session::builder::GraphOptimizationLevel;
use ort::value::Tensor;
use std::path::Path;
use std::sync::Arc;
use tracing::{Level, info, span, warn};

pub fn initialize_model(model_file_path: &Path, threads: usize) -> anyhow::Result<Session> {
    ort::init()
        .with_execution_providers([
            execution_providers::XNNPACKExecutionProvider::default().build()
        ])
        .commit()?;

    let model = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(threads.max(1))?
        .commit_from_file(model_file_path)?;

    Ok(model)
}

/// Trained emotion network exported to ONNX.
///
/// Input: one (1, 48, 48, 1) f32 tensor. Output: seven softmax scores in
/// label order.
pub struct OnnxClassifier {
    model: Session,
    input_name: String,
    output_name: String,
}

impl OnnxClassifier {
    pub fn new(model_file_path: &Path, threads: usize) -> anyhow::Result<OnnxClassifier> {
        let model = initialize_model(model_file_path, threads)
            .with_context(|| format!("loading emotion model {}", model_file_path.display()))?;

        let input_name = model
            .inputs
            .first()
            .map(|i| i.name.clone())
            .context("emotion model declares no inputs")?;
        let output_name = model
            .outputs
            .first()
            .map(|o| o.name.clone())
            .context("emotion model declares no outputs")?;

        Ok(OnnxClassifier {
            model,
            input_name,
            output_name,
        })
    }
}

fn runtime_err(e: ort::Error) -> PipelineError {
    PipelineError::Classification(e.to_string())
}

impl EmotionClassifier for OnnxClassifier {
    fn predict(&self, input: &Array4<f32>) -> Result<EmotionDistribution> {
        let span = span!(Level::DEBUG, "onnx_classifier");
        let _guard = span.enter();

        let tensor = Tensor::from_array(input.clone()).map_err(runtime_err)?;
        let outputs = self
            .model
            .run(ort::inputs![self.input_name.as_str() => tensor].map_err(runtime_err)?)
            .map_err(runtime_err)?;

        let scores = outputs[self.output_name.as_str()]
            .try_extract_tensor::<f32>()
            .map_err(runtime_err)?;
        let scores: Vec<f32> = scores.iter().copied().collect();

        EmotionDistribution::from_probabilities(&scores)
    }

    fn kind(&self) -> &'static str {
        "onnx_cnn"
    }
}

/// Loads the trained network at `model_file_path`, falling back to a
/// randomly initialised one when the file does not exist.
pub fn load_classifier(
    model_file_path: &Path,
    threads: usize,
    seed: Option<u64>,
) -> anyhow::Result<Arc<dyn EmotionClassifier>> {
    if model_file_path.exists() {
        let classifier = OnnxClassifier::new(model_file_path, threads)?;
        info!("Loaded emotion model from {}", model_file_path.display());
        return Ok(Arc::new(classifier));
    }

    warn!(
        "No emotion model at {}, created an untrained network; predictions are meaningless until a trained model is supplied",
        model_file_path.display()
    );
    Ok(Arc::new(UntrainedCnn::new(seed)))
}
