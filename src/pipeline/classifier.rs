use super::emotion::{Classification, EmotionDistribution, NUM_EMOTIONS};
use crate::error::{PipelineError, Result};
use image::GrayImage;
use image::imageops::{self, FilterType};
use ndarray::Array4;
use rand::Rng;
use tracing::warn;

/// Edge length of the square crop the network is trained on.
pub const INPUT_SIZE: u32 = 48;

/// A network mapping a (1, 48, 48, 1) batch of [0, 1] floats to a softmax
/// over the seven emotions.
pub trait EmotionClassifier: Send + Sync {
    fn predict(&self, input: &Array4<f32>) -> Result<EmotionDistribution>;

    /// Short identifier reported by `/health`.
    fn kind(&self) -> &'static str;
}

/// What to do when a face cannot be classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum FailurePolicy {
    /// Surface the failure to the caller.
    #[default]
    Propagate,
    /// Answer with a random distribution instead. Demo mode only: the
    /// result looks like a real, confident prediction.
    Synthesize,
}

/// Resize to 48x48 (bilinear), scale to [0, 1] and lay out as NHWC with a
/// single batch and channel.
pub fn preprocess(face: &GrayImage) -> Result<Array4<f32>> {
    if face.width() == 0 || face.height() == 0 {
        return Err(PipelineError::Classification(format!(
            "empty face crop {}x{}",
            face.width(),
            face.height()
        )));
    }

    let resized = imageops::resize(face, INPUT_SIZE, INPUT_SIZE, FilterType::Triangle);
    let side = INPUT_SIZE as usize;

    Ok(Array4::from_shape_fn((1, side, side, 1), |(_, y, x, _)| {
        resized.get_pixel(x as u32, y as u32).0[0] as f32 / 255. // 0. - 1. range
    }))
}

/// Uniform draws per class, normalized to sum to 1.
pub fn synthesize<R: Rng + ?Sized>(rng: &mut R) -> EmotionDistribution {
    let mut raw = [0f32; NUM_EMOTIONS];
    for v in raw.iter_mut() {
        *v = rng.random::<f32>();
    }

    let total: f32 = raw.iter().sum();
    let probs: Vec<f32> = if total > 0. {
        raw.iter().map(|v| v / total).collect()
    } else {
        vec![1. / NUM_EMOTIONS as f32; NUM_EMOTIONS]
    };

    // seven finite values in [0, 1]
    EmotionDistribution::from_probabilities(&probs).unwrap_or_else(|_| EmotionDistribution::zeros())
}

/// Runs one face crop through `classifier`, applying `policy` to any failure
/// along the way.
pub fn classify(
    classifier: &dyn EmotionClassifier,
    face: &GrayImage,
    policy: FailurePolicy,
) -> Result<Classification> {
    let outcome = preprocess(face).and_then(|input| classifier.predict(&input));

    match (outcome, policy) {
        (Ok(distribution), _) => Ok(distribution.into()),
        (Err(e), FailurePolicy::Propagate) => Err(e),
        (Err(e), FailurePolicy::Synthesize) => {
            warn!("Classification failed, answering with a synthetic distribution: {e}");
            Ok(synthesize(&mut rand::rng()).into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::emotion::Emotion;
    use image::Luma;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    struct Fixed([f32; NUM_EMOTIONS]);

    impl EmotionClassifier for Fixed {
        fn predict(&self, input: &Array4<f32>) -> Result<EmotionDistribution> {
            assert_eq!(input.shape(), &[1, 48, 48, 1]);
            EmotionDistribution::from_probabilities(&self.0)
        }

        fn kind(&self) -> &'static str {
            "fixed"
        }
    }

    struct Broken;

    impl EmotionClassifier for Broken {
        fn predict(&self, _input: &Array4<f32>) -> Result<EmotionDistribution> {
            Err(PipelineError::Classification("numeric failure".to_string()))
        }

        fn kind(&self) -> &'static str {
            "broken"
        }
    }

    fn assert_distribution(c: &Classification) {
        assert!((c.distribution.sum() - 1.).abs() < 1e-4);
        assert_eq!(c.distribution.iter().count(), NUM_EMOTIONS);
        assert_eq!(c.distribution.get(c.emotion), c.confidence);
        assert!(c.distribution.values().iter().all(|v| *v <= c.confidence));
    }

    #[test]
    fn test_preprocess_shape_and_range() {
        let face = GrayImage::from_fn(97, 61, |x, y| Luma([((x * 7 + y * 3) % 256) as u8]));
        let input = preprocess(&face).unwrap();
        assert_eq!(input.shape(), &[1, 48, 48, 1]);
        assert!(input.iter().all(|v| (0. ..=1.).contains(v)));
    }

    #[test]
    fn test_preprocess_scales_by_255() {
        let face = GrayImage::from_pixel(10, 10, Luma([255]));
        let input = preprocess(&face).unwrap();
        assert!(input.iter().all(|v| (*v - 1.).abs() < 1e-6));
    }

    #[test]
    fn test_preprocess_rejects_empty() {
        assert!(preprocess(&GrayImage::new(0, 5)).is_err());
    }

    #[test]
    fn test_classify_uses_model_output() {
        let model = Fixed([0.1, 0.0, 0.0, 0.0, 0.2, 0.6, 0.1]);
        let face = GrayImage::from_pixel(60, 60, Luma([128]));
        let c = classify(&model, &face, FailurePolicy::Propagate).unwrap();
        assert_eq!(c.emotion, Emotion::Surprise);
        assert_eq!(c.confidence, 0.6);
        assert_distribution(&c);
    }

    #[test]
    fn test_propagate_returns_error() {
        let face = GrayImage::from_pixel(60, 60, Luma([128]));
        let res = classify(&Broken, &face, FailurePolicy::Propagate);
        assert!(matches!(res, Err(PipelineError::Classification(_))));
    }

    #[test]
    fn test_synthesize_keeps_structure() {
        let face = GrayImage::from_pixel(60, 60, Luma([128]));
        let first = classify(&Broken, &face, FailurePolicy::Synthesize).unwrap();
        let second = classify(&Broken, &face, FailurePolicy::Synthesize).unwrap();
        // the two draws may differ; both must be well-formed
        assert_distribution(&first);
        assert_distribution(&second);
    }

    #[test]
    fn test_synthesize_covers_empty_crop() {
        let c = classify(&Broken, &GrayImage::new(0, 0), FailurePolicy::Synthesize).unwrap();
        assert_distribution(&c);
    }

    #[test]
    fn test_synthesize_normalizes() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let d = synthesize(&mut rng);
            assert!((d.sum() - 1.).abs() < 1e-4);
            assert!(d.values().iter().all(|v| (0. ..=1.).contains(v)));
        }
    }
}
