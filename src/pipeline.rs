use crate::error::{PipelineError, Result};
use crate::shapes::FaceBox;
use image::imageops;
use image::{DynamicImage, GrayImage, Rgb, RgbImage};
use imageproc::drawing;
use std::sync::Arc;
use tracing::{Level, debug, info, span, trace, warn};

pub mod classifier;
pub mod cnn;
pub mod emotion;
pub mod locator;
pub mod model;

pub use classifier::{EmotionClassifier, FailurePolicy};
pub use emotion::{Classification, Emotion, EmotionDistribution};
pub use locator::{CascadeLocator, DetectionParams, FaceLocator};

/// Which faces of a frame get classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Every detected face, in detector order.
    AllFaces,
    /// Only the face with the largest box.
    LargestFace,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FaceEmotion {
    pub face: FaceBox,
    pub classification: Classification,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutput {
    /// Empty when no face was found.
    AllFaces(Vec<FaceEmotion>),
    LargestFace {
        faces_detected: usize,
        face: Option<FaceEmotion>,
    },
}

/// decode -> locate -> crop/classify per face. Holds nothing but shared,
/// read-only model handles, so one instance can serve concurrent requests.
#[derive(Clone)]
pub struct Pipeline {
    locator: Arc<dyn FaceLocator>,
    classifier: Arc<dyn EmotionClassifier>,
    on_failure: FailurePolicy,
}

pub fn decode_image(image_bytes: &[u8]) -> Result<DynamicImage> {
    image::load_from_memory(image_bytes).map_err(|e| PipelineError::Decode(e.to_string()))
}

/// Box with the greatest area; the earliest one wins a tie.
pub fn largest_face(faces: &[FaceBox]) -> Option<FaceBox> {
    let mut largest: Option<FaceBox> = None;
    for face in faces {
        match largest {
            Some(l) if l.area() >= face.area() => {}
            _ => largest = Some(*face),
        }
    }
    largest
}

impl Pipeline {
    pub fn new(
        locator: Arc<dyn FaceLocator>,
        classifier: Arc<dyn EmotionClassifier>,
        on_failure: FailurePolicy,
    ) -> Pipeline {
        Pipeline {
            locator,
            classifier,
            on_failure,
        }
    }

    pub fn infer(&self, image_bytes: &[u8], mode: Mode) -> Result<PipelineOutput> {
        let img = decode_image(image_bytes)?;
        self.run(&img, mode)
    }

    pub fn run(&self, img: &DynamicImage, mode: Mode) -> Result<PipelineOutput> {
        let span = span!(Level::DEBUG, "pipeline");
        let _guard = span.enter();

        let gray = locator::to_grayscale(img);
        let (width, height) = gray.dimensions();
        let faces: Vec<FaceBox> = self
            .locator
            .locate(&gray)?
            .into_iter()
            .filter(|face| {
                let fits = face.fits_within(width, height);
                if !fits {
                    warn!("Dropping face box {face:?} outside the {width}x{height} frame");
                }
                fits
            })
            .collect();
        info!("Detected {} faces in {}x{} frame", faces.len(), gray.width(), gray.height());

        match mode {
            Mode::AllFaces => {
                let mut results = Vec::with_capacity(faces.len());
                for face in faces {
                    results.push(self.classify_face(&gray, face)?);
                }
                Ok(PipelineOutput::AllFaces(results))
            }
            Mode::LargestFace => {
                let face = match largest_face(&faces) {
                    Some(face) => Some(self.classify_face(&gray, face)?),
                    None => None,
                };
                Ok(PipelineOutput::LargestFace {
                    faces_detected: faces.len(),
                    face,
                })
            }
        }
    }

    fn classify_face(&self, gray: &GrayImage, face: FaceBox) -> Result<FaceEmotion> {
        trace!("Face bound: {face:?}");
        let crop = imageops::crop_imm(gray, face.x, face.y, face.width, face.height).to_image();
        let classification =
            classifier::classify(self.classifier.as_ref(), &crop, self.on_failure)?;
        debug!(
            "Face at ({}, {}) classified {} ({:.3})",
            face.x,
            face.y,
            classification.emotion.label(),
            classification.confidence
        );

        Ok(FaceEmotion {
            face,
            classification,
        })
    }
}

/// Draws each classified face's box onto `img`.
pub fn annotate(img: &mut RgbImage, output: &PipelineOutput) {
    let faces: Vec<&FaceEmotion> = match output {
        PipelineOutput::AllFaces(faces) => faces.iter().collect(),
        PipelineOutput::LargestFace { face, .. } => face.iter().collect(),
    };

    for f in faces {
        drawing::draw_hollow_rect_mut(img, f.face.into(), Rgb([255u8, 0u8, 0u8]));
    }
}
