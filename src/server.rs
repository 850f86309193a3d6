use crate::error::{PipelineError, Result};
use crate::pipeline::{EmotionClassifier, FailurePolicy, FaceLocator, Pipeline};
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderValue, Method, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use error::ApiError;
use std::any::Any;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub mod error;
pub mod handlers;
pub mod schema;

/// Process-wide model handles. Each slot is written once at startup and
/// only read afterwards; an empty slot means the pipeline cannot run.
#[derive(Default)]
pub struct Models {
    locator: OnceLock<Arc<dyn FaceLocator>>,
    classifier: OnceLock<Arc<dyn EmotionClassifier>>,
}

impl Models {
    pub fn new() -> Models {
        Models::default()
    }

    pub fn install_locator(&self, locator: Arc<dyn FaceLocator>) {
        if self.locator.set(locator).is_err() {
            warn!("Face locator already installed, keeping the first one");
        }
    }

    pub fn install_classifier(&self, classifier: Arc<dyn EmotionClassifier>) {
        if self.classifier.set(classifier).is_err() {
            warn!("Emotion classifier already installed, keeping the first one");
        }
    }

    pub fn locator_loaded(&self) -> bool {
        self.locator.get().is_some()
    }

    pub fn classifier_loaded(&self) -> bool {
        self.classifier.get().is_some()
    }

    pub fn classifier_kind(&self) -> Option<&'static str> {
        self.classifier.get().map(|c| c.kind())
    }

    pub fn pipeline(&self, on_failure: FailurePolicy) -> Result<Pipeline> {
        let locator = self
            .locator
            .get()
            .ok_or(PipelineError::ModelUnavailable("face cascade"))?;
        let classifier = self
            .classifier
            .get()
            .ok_or(PipelineError::ModelUnavailable("emotion model"))?;

        Ok(Pipeline::new(locator.clone(), classifier.clone(), on_failure))
    }
}

#[derive(Clone)]
pub struct AppState {
    pub models: Arc<Models>,
    pub on_failure: FailurePolicy,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub bind: SocketAddr,
    pub max_body_bytes: usize,
    pub cors_origins: Vec<String>,
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(v) => Some(v),
            Err(_) => {
                warn!("Ignoring invalid CORS origin {o:?}");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };

    ApiError::Internal(format!("Unexpected server error: {detail}")).into_response()
}

pub fn router(state: AppState, settings: &ServerSettings) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/predict_emotion", post(handlers::predict_emotion))
        .route("/predict_emotion_stream", post(handlers::predict_emotion_stream))
        .layer(DefaultBodyLimit::max(settings.max_body_bytes))
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(cors_layer(&settings.cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}

pub async fn serve(state: AppState, settings: ServerSettings) -> anyhow::Result<()> {
    let app = router(state, &settings);

    let listener = tokio::net::TcpListener::bind(settings.bind).await?;
    info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
