#![warn(unused_extern_crates)]

use anyhow::{Context, Result};
use clap::Parser;
use faceml::config::{Cli, Command, ModelArgs, PredictArgs, ServeArgs};
use faceml::pipeline::model::load_classifier;
use faceml::pipeline::{
    CascadeLocator, DetectionParams, EmotionClassifier, FaceLocator, Mode, Pipeline, annotate,
};
use faceml::server::schema::InferenceResponse;
use faceml::server::{self, AppState, Models};
use image::ImageReader;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

fn load_models(args: &ModelArgs) -> Result<(Arc<dyn FaceLocator>, Arc<dyn EmotionClassifier>)> {
    info!("Loading face detector from {}", args.detector_model.display());
    let locator = CascadeLocator::from_file(&args.detector_model, DetectionParams::default())?;

    info!("Loading emotion classifier");
    let classifier = load_classifier(&args.classifier_model, args.threads(), args.seed)?;

    Ok((Arc::new(locator), classifier))
}

async fn serve(args: ServeArgs) -> Result<()> {
    // refuse to serve traffic unless both models come up
    let (locator, classifier) = load_models(&args.models).inspect_err(|e| {
        error!("Failed to load face detector or emotion model, exiting: {e:#}");
    })?;

    let models = Arc::new(Models::new());
    models.install_locator(locator);
    models.install_classifier(classifier);
    info!("Face detector and emotion model loaded");

    let state = AppState {
        models,
        on_failure: args.models.on_classify_failure,
        request_timeout: args.request_timeout(),
    };

    server::serve(state, args.settings()).await
}

fn predict(args: PredictArgs) -> Result<()> {
    let (locator, classifier) = load_models(&args.models)?;
    let pipeline = Pipeline::new(locator, classifier, args.models.on_classify_failure);

    let img = ImageReader::open(&args.input)
        .with_context(|| format!("opening {}", args.input.display()))?
        .with_guessed_format()?
        .decode()?;

    let mode = if args.largest {
        Mode::LargestFace
    } else {
        Mode::AllFaces
    };

    let start = Instant::now();
    let output = pipeline.run(&img, mode)?;
    debug!("Took {:?}", start.elapsed());

    if let Some(output_path) = &args.output {
        let mut annotated = img.into_rgb8();
        annotate(&mut annotated, &output);
        annotated.save(output_path)?;
        info!("Result at {}", output_path.display());
    }

    let response = InferenceResponse::from(output);
    println!("{}", serde_json::to_string_pretty(&response)?);

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::from_default_env();
    tracing_subscriber::fmt()
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_env_filter(filter)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve(args) => serve(args).await,
        Command::Predict(args) => predict(args),
    }
}
