use crate::pipeline::FailurePolicy;
use crate::server::ServerSettings;
use clap::{Args, Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the emotion detection HTTP API
    Serve(ServeArgs),
    /// Run detection on a single image file and print the JSON result
    Predict(PredictArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ModelArgs {
    /// SeetaFace frontal face detector model
    #[arg(long, env = "FACEML_DETECTOR_MODEL", default_value = "models/seeta_fd_frontal_v1.0.bin")]
    pub detector_model: PathBuf,

    /// Trained emotion classifier (ONNX). An untrained network is used when
    /// the file does not exist
    #[arg(long, env = "FACEML_CLASSIFIER_MODEL", default_value = "models/emotion_model.onnx")]
    pub classifier_model: PathBuf,

    /// Threads for the classifier runtime. Defaults to the CPU count
    #[arg(long, env = "FACEML_THREADS")]
    pub threads: Option<usize>,

    /// Seed for the untrained network's weights
    #[arg(long, env = "FACEML_SEED")]
    pub seed: Option<u64>,

    /// What to do when a face cannot be classified
    #[arg(
        long,
        env = "FACEML_ON_CLASSIFY_FAILURE",
        value_enum,
        default_value_t = FailurePolicy::Propagate
    )]
    pub on_classify_failure: FailurePolicy,
}

impl ModelArgs {
    pub fn threads(&self) -> usize {
        self.threads.unwrap_or_else(num_cpus::get).max(1)
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    #[command(flatten)]
    pub models: ModelArgs,

    /// Address to listen on
    #[arg(short, long, env = "FACEML_BIND", default_value = "0.0.0.0:5000")]
    pub bind: SocketAddr,

    /// Max time (ms) to spend on detection and classification per request
    #[arg(long, env = "FACEML_REQUEST_TIMEOUT_MS", default_value_t = 10_000)]
    pub request_timeout_ms: u64,

    /// Largest accepted request body, in bytes
    #[arg(long, env = "FACEML_MAX_BODY_BYTES", default_value_t = 16 * 1024 * 1024)]
    pub max_body_bytes: usize,

    /// Origin allowed to call the API from a browser. Repeatable
    #[arg(
        long = "cors-origin",
        env = "FACEML_CORS_ORIGINS",
        value_delimiter = ',',
        default_values = ["http://localhost:5173", "http://127.0.0.1:5173"]
    )]
    pub cors_origins: Vec<String>,
}

impl ServeArgs {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn settings(&self) -> ServerSettings {
        ServerSettings {
            bind: self.bind,
            max_body_bytes: self.max_body_bytes,
            cors_origins: self.cors_origins.clone(),
        }
    }
}

#[derive(Args, Debug)]
pub struct PredictArgs {
    #[command(flatten)]
    pub models: ModelArgs,

    /// Image to analyse
    #[arg(short, long)]
    pub input: PathBuf,

    /// Write a copy of the input with face boxes drawn
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Classify only the largest face, answering in stream shape
    #[arg(long)]
    pub largest: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serve_defaults() {
        let cli = Cli::try_parse_from(["faceml", "serve"]).unwrap();
        let Command::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(args.bind, "0.0.0.0:5000".parse::<SocketAddr>().unwrap());
        assert_eq!(args.request_timeout(), Duration::from_secs(10));
        assert_eq!(args.models.on_classify_failure, FailurePolicy::Propagate);
        assert_eq!(
            args.cors_origins,
            vec!["http://localhost:5173", "http://127.0.0.1:5173"]
        );
        assert!(args.models.threads() >= 1);
    }

    #[test]
    fn test_serve_overrides() {
        let cli = Cli::try_parse_from([
            "faceml",
            "serve",
            "--bind",
            "127.0.0.1:8080",
            "--on-classify-failure",
            "synthesize",
            "--cors-origin",
            "https://example.org",
            "--threads",
            "2",
        ])
        .unwrap();
        let Command::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(args.settings().bind.port(), 8080);
        assert_eq!(args.models.on_classify_failure, FailurePolicy::Synthesize);
        assert_eq!(args.cors_origins, vec!["https://example.org"]);
        assert_eq!(args.models.threads(), 2);
    }

    #[test]
    fn test_predict_requires_input() {
        assert!(Cli::try_parse_from(["faceml", "predict"]).is_err());
        let cli =
            Cli::try_parse_from(["faceml", "predict", "-i", "face.jpg", "--largest"]).unwrap();
        let Command::Predict(args) = cli.command else {
            panic!("expected predict");
        };
        assert!(args.largest);
        assert_eq!(args.input, PathBuf::from("face.jpg"));
    }
}
