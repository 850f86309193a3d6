//! Face detection and per-face emotion classification, served over HTTP.
//!
//! Images flow one way: bytes -> raster -> face boxes -> 48x48 crops ->
//! emotion distributions -> JSON.

pub mod config;
pub mod error;
pub mod payload;
pub mod pipeline;
pub mod server;
pub mod shapes;

pub use error::{PipelineError, Result};
pub use pipeline::{Mode, Pipeline, PipelineOutput};
