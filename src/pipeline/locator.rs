use crate::error::{PipelineError, Result};
use crate::shapes::FaceBox;
use anyhow::Context;
use image::{DynamicImage, GrayImage, Luma};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::{Level, debug, span, trace};

/// Finds frontal faces on a single-channel raster.
///
/// Implementations return an empty vec when nothing is found; an error is
/// reserved for a detector that cannot run at all.
pub trait FaceLocator: Send + Sync {
    fn locate(&self, gray: &GrayImage) -> Result<Vec<FaceBox>>;
}

/// Fixed cascade parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionParams {
    /// Smallest face edge, in pixels, considered a candidate.
    pub min_size: u32,
    /// Growth between consecutive pyramid levels.
    pub scale_factor: f32,
    /// Overlapping candidate windows required to confirm a detection.
    pub min_neighbors: u32,
}

impl Default for DetectionParams {
    fn default() -> Self {
        DetectionParams {
            min_size: 30,
            scale_factor: 1.1,
            min_neighbors: 5,
        }
    }
}

// rustface refuses windows under 20px and pyramid steps outside 0.01..=0.99
const ENGINE_MIN_FACE: u32 = 20;
const ENGINE_MAX_PYRAMID_STEP: f32 = 0.99;
// score contributed by each confirming neighbor; 5 neighbors lands on the
// engine's stock threshold of 2.0
const SCORE_PER_NEIGHBOR: f64 = 0.4;

impl DetectionParams {
    pub fn validate(&self) -> Result<()> {
        if self.min_size < ENGINE_MIN_FACE {
            return Err(PipelineError::InvalidParams(format!(
                "min_size must be at least {ENGINE_MIN_FACE}, got {}",
                self.min_size
            )));
        }
        if !(self.scale_factor.is_finite() && 1. / self.scale_factor <= ENGINE_MAX_PYRAMID_STEP) {
            return Err(PipelineError::InvalidParams(format!(
                "scale_factor must be above {:.3}, got {}",
                1. / ENGINE_MAX_PYRAMID_STEP,
                self.scale_factor
            )));
        }
        if self.min_neighbors == 0 {
            return Err(PipelineError::InvalidParams(
                "min_neighbors must be positive".to_string(),
            ));
        }
        Ok(())
    }

    fn pyramid_step(&self) -> f32 {
        1. / self.scale_factor
    }

    fn score_threshold(&self) -> f64 {
        self.min_neighbors as f64 * SCORE_PER_NEIGHBOR
    }
}

/// Luma conversion with BT.601 weights, the same weighting the emotion
/// model's training images went through. Alpha is dropped.
pub fn to_grayscale(img: &DynamicImage) -> GrayImage {
    match img {
        DynamicImage::ImageLuma8(gray) => gray.clone(),
        DynamicImage::ImageLuma16(_)
        | DynamicImage::ImageLumaA8(_)
        | DynamicImage::ImageLumaA16(_) => img.to_luma8(),
        _ => {
            let rgb = img.to_rgb8();
            GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
                let [r, g, b] = rgb.get_pixel(x, y).0;
                let luma = (299 * r as u32 + 587 * g as u32 + 114 * b as u32 + 500) / 1000;
                Luma([luma as u8])
            })
        }
    }
}

/// Funnel-structured cascade (SeetaFace) via the `rustface` crate.
pub struct CascadeLocator {
    model: rustface::Model,
    params: DetectionParams,
}

impl CascadeLocator {
    pub fn new(model: rustface::Model, params: DetectionParams) -> Result<CascadeLocator> {
        params.validate()?;
        Ok(CascadeLocator { model, params })
    }

    pub fn from_file(path: &Path, params: DetectionParams) -> anyhow::Result<CascadeLocator> {
        let file = File::open(path)
            .with_context(|| format!("opening face detector model {}", path.display()))?;
        let model = rustface::read_model(BufReader::new(file))
            .with_context(|| format!("reading face detector model {}", path.display()))?;
        Ok(CascadeLocator::new(model, params)?)
    }
}

impl FaceLocator for CascadeLocator {
    fn locate(&self, gray: &GrayImage) -> Result<Vec<FaceBox>> {
        let span = span!(Level::DEBUG, "face_locator");
        let _guard = span.enter();

        let (width, height) = gray.dimensions();
        if width == 0 || height == 0 {
            return Ok(Vec::new());
        }

        // the detector keeps per-run scratch buffers, so each call gets its own
        let mut detector = rustface::create_detector_with_model(self.model.clone());
        detector.set_min_face_size(self.params.min_size);
        detector.set_pyramid_scale_factor(self.params.pyramid_step());
        detector.set_score_thresh(self.params.score_threshold());
        detector.set_slide_window_step(4, 4);

        let mut image = rustface::ImageData::new(gray.as_raw(), width, height);
        let faces = detector.detect(&mut image);
        trace!("Cascade returned {} candidates", faces.len());

        let boxes: Vec<FaceBox> = faces
            .iter()
            .filter_map(|face| {
                let bbox = face.bbox();
                FaceBox::clamped(bbox.x(), bbox.y(), bbox.width(), bbox.height(), width, height)
            })
            .collect();

        debug!("Located {} faces", boxes.len());
        Ok(boxes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage, Rgba, RgbaImage};

    #[test]
    fn test_default_params() {
        let p = DetectionParams::default();
        assert_eq!(p.min_size, 30);
        assert_eq!(p.scale_factor, 1.1);
        assert_eq!(p.min_neighbors, 5);
        assert!(p.validate().is_ok());
        assert!((p.score_threshold() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_rejects_bad_params() {
        let small = DetectionParams {
            min_size: 10,
            ..Default::default()
        };
        assert!(small.validate().is_err());

        let flat = DetectionParams {
            scale_factor: 1.0,
            ..Default::default()
        };
        assert!(flat.validate().is_err());

        let lonely = DetectionParams {
            min_neighbors: 0,
            ..Default::default()
        };
        assert!(lonely.validate().is_err());
    }

    #[test]
    fn test_grayscale_weights() {
        let mut img = RgbImage::new(3, 1);
        img.put_pixel(0, 0, Rgb([255, 0, 0]));
        img.put_pixel(1, 0, Rgb([0, 255, 0]));
        img.put_pixel(2, 0, Rgb([0, 0, 255]));

        let gray = to_grayscale(&DynamicImage::ImageRgb8(img));
        assert_eq!(gray.get_pixel(0, 0).0[0], 76);
        assert_eq!(gray.get_pixel(1, 0).0[0], 150);
        assert_eq!(gray.get_pixel(2, 0).0[0], 29);
    }

    #[test]
    fn test_grayscale_ignores_alpha() {
        let img = RgbaImage::from_pixel(2, 2, Rgba([200, 200, 200, 0]));
        let gray = to_grayscale(&DynamicImage::ImageRgba8(img));
        assert_eq!(gray.dimensions(), (2, 2));
        assert_eq!(gray.get_pixel(1, 1).0[0], 200);
    }

    #[test]
    fn test_grayscale_passthrough() {
        let img = GrayImage::from_pixel(4, 3, Luma([17]));
        let gray = to_grayscale(&DynamicImage::ImageLuma8(img.clone()));
        assert_eq!(gray, img);
    }
}
