use super::classifier::{EmotionClassifier, INPUT_SIZE};
use super::emotion::{EmotionDistribution, NUM_EMOTIONS};
use crate::error::{PipelineError, Result};
use ndarray::{Array1, Array2, Array3, Array4, Axis, s};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{Level, span};

/*
Freshly initialised emotion network, used when no trained artifact is
available. Weights are random, so predictions carry no meaning, but the
shapes and the softmax contract match the trained model exactly.

    48x48x1
    conv 3x3 32 relu      -> 46x46x32
    conv 3x3 64 relu      -> 44x44x64
    maxpool 2             -> 22x22x64
    conv 3x3 128 relu     -> 20x20x128
    maxpool 2             -> 10x10x128
    conv 3x3 128 relu     -> 8x8x128
    maxpool 2             -> 4x4x128
    flatten               -> 2048
    dense 1024 relu
    dense 7 softmax

Dropout layers are identity at inference and are left out.
 */
pub struct UntrainedCnn {
    convs: [Conv2d; 4],
    hidden: Dense,
    output: Dense,
}

struct Conv2d {
    // (kernel * kernel * in_channels, out_channels), rows ordered ky, kx, c
    weights: Array2<f32>,
    bias: Array1<f32>,
    kernel: usize,
}

struct Dense {
    weights: Array2<f32>,
    bias: Array1<f32>,
}

fn glorot<R: Rng>(
    rng: &mut R,
    fan_in: usize,
    fan_out: usize,
    shape: (usize, usize),
) -> Array2<f32> {
    let limit = (6. / (fan_in + fan_out) as f32).sqrt();
    Array2::from_shape_fn(shape, |_| rng.random_range(-limit..limit))
}

impl Conv2d {
    fn new<R: Rng>(rng: &mut R, in_channels: usize, out_channels: usize, kernel: usize) -> Conv2d {
        let rows = kernel * kernel * in_channels;
        Conv2d {
            weights: glorot(rng, rows, kernel * kernel * out_channels, (rows, out_channels)),
            bias: Array1::zeros(out_channels),
            kernel,
        }
    }

    /// Valid (unpadded) convolution followed by ReLU, as a single matmul
    /// over unrolled patches.
    fn forward(&self, x: &Array3<f32>) -> Result<Array3<f32>> {
        let (h, w, c) = x.dim();
        let k = self.kernel;
        if h < k || w < k || c * k * k != self.weights.nrows() {
            return Err(PipelineError::Classification(format!(
                "conv input {h}x{w}x{c} does not fit a {k}x{k}x{} kernel",
                self.weights.nrows() / (k * k)
            )));
        }

        let (oh, ow) = (h - k + 1, w - k + 1);
        let mut patches = Array2::<f32>::zeros((oh * ow, k * k * c));
        for oy in 0..oh {
            for ox in 0..ow {
                let mut row = patches.row_mut(oy * ow + ox);
                for ky in 0..k {
                    for kx in 0..k {
                        let start = (ky * k + kx) * c;
                        row.slice_mut(s![start..start + c])
                            .assign(&x.slice(s![oy + ky, ox + kx, ..]));
                    }
                }
            }
        }

        let mut out = patches.dot(&self.weights) + &self.bias;
        out.mapv_inplace(relu);

        out.into_shape_with_order((oh, ow, self.weights.ncols()))
            .map_err(|e| PipelineError::Classification(e.to_string()))
    }
}

impl Dense {
    fn new<R: Rng>(rng: &mut R, inputs: usize, outputs: usize) -> Dense {
        Dense {
            weights: glorot(rng, inputs, outputs, (inputs, outputs)),
            bias: Array1::zeros(outputs),
        }
    }

    fn forward(&self, x: &Array1<f32>) -> Array1<f32> {
        x.dot(&self.weights) + &self.bias
    }
}

fn relu(v: f32) -> f32 {
    v.max(0.)
}

fn max_pool2(input: &Array3<f32>) -> Array3<f32> {
    let (h, w, c) = input.dim();
    Array3::from_shape_fn((h / 2, w / 2, c), |(y, x, ch)| {
        let (y0, x0) = (y * 2, x * 2);
        input[[y0, x0, ch]]
            .max(input[[y0, x0 + 1, ch]])
            .max(input[[y0 + 1, x0, ch]])
            .max(input[[y0 + 1, x0 + 1, ch]])
    })
}

fn softmax(x: &Array1<f32>) -> Array1<f32> {
    let max = x.fold(f32::NEG_INFINITY, |a, b| a.max(*b));
    let exp = x.mapv(|v| (v - max).exp());
    let total = exp.sum();
    exp / total
}

impl UntrainedCnn {
    /// Random init; `seed` makes the weights reproducible.
    pub fn new(seed: Option<u64>) -> UntrainedCnn {
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        UntrainedCnn {
            convs: [
                Conv2d::new(&mut rng, 1, 32, 3),
                Conv2d::new(&mut rng, 32, 64, 3),
                Conv2d::new(&mut rng, 64, 128, 3),
                Conv2d::new(&mut rng, 128, 128, 3),
            ],
            hidden: Dense::new(&mut rng, 4 * 4 * 128, 1024),
            output: Dense::new(&mut rng, 1024, NUM_EMOTIONS),
        }
    }

    fn forward(&self, input: &Array4<f32>) -> Result<Array1<f32>> {
        let side = INPUT_SIZE as usize;
        if input.shape() != [1, side, side, 1] {
            return Err(PipelineError::Classification(format!(
                "expected input shape [1, {side}, {side}, 1], got {:?}",
                input.shape()
            )));
        }

        let [c1, c2, c3, c4] = &self.convs;
        let x = input.index_axis(Axis(0), 0).to_owned();
        let x = c2.forward(&c1.forward(&x)?)?;
        let x = max_pool2(&x);
        let x = max_pool2(&c3.forward(&x)?);
        let x = max_pool2(&c4.forward(&x)?);

        let flat = Array1::from_iter(x.iter().copied());
        let mut hidden = self.hidden.forward(&flat);
        hidden.mapv_inplace(relu);

        Ok(softmax(&self.output.forward(&hidden)))
    }
}

impl EmotionClassifier for UntrainedCnn {
    fn predict(&self, input: &Array4<f32>) -> Result<EmotionDistribution> {
        let span = span!(Level::DEBUG, "untrained_cnn");
        let _guard = span.enter();

        let probs = self.forward(input)?;
        EmotionDistribution::from_probabilities(&probs.to_vec())
    }

    fn kind(&self) -> &'static str {
        "untrained_cnn"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_input() -> Array4<f32> {
        Array4::from_shape_fn((1, 48, 48, 1), |(_, y, x, _)| ((x * 5 + y * 11) % 256) as f32 / 255.)
    }

    #[test]
    fn test_max_pool_floors() {
        let x = Array3::from_shape_fn((5, 4, 1), |(y, x, _)| (y * 4 + x) as f32);
        let pooled = max_pool2(&x);
        assert_eq!(pooled.dim(), (2, 2, 1));
        assert_eq!(pooled[[0, 0, 0]], 5.);
        assert_eq!(pooled[[1, 1, 0]], 15.);
    }

    #[test]
    fn test_conv_identity_kernel() {
        // 1x1 kernel with weight 1 passes input through unchanged
        let conv = Conv2d {
            weights: Array2::ones((1, 1)),
            bias: Array1::zeros(1),
            kernel: 1,
        };
        let x = Array3::from_shape_fn((3, 3, 1), |(y, x, _)| (y * 3 + x) as f32);
        assert_eq!(conv.forward(&x).unwrap(), x);
    }

    #[test]
    fn test_softmax_sums_to_one() {
        let p = softmax(&Array1::from(vec![1000., 0., -5., 3., 3., 2., 1.]));
        assert!((p.sum() - 1.).abs() < 1e-5);
        assert!(p.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_forward_is_distribution_and_deterministic() {
        let cnn = UntrainedCnn::new(Some(42));
        let input = sample_input();

        let first = cnn.predict(&input).unwrap();
        let second = cnn.predict(&input).unwrap();
        assert!((first.sum() - 1.).abs() < 1e-4);
        assert_eq!(first.values(), second.values());
    }

    #[test]
    fn test_rejects_wrong_shape() {
        let cnn = UntrainedCnn::new(Some(1));
        let input = Array4::<f32>::zeros((1, 32, 32, 1));
        assert!(matches!(
            cnn.predict(&input),
            Err(PipelineError::Classification(_))
        ));
    }
}
