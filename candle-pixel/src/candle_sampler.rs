use crate::candle_discretize::Discretizer;
use crate::candle_exec_context::ExecContext;
use crate::candle_image_output::save_strip;
use crate::candle_model_traits::AutoregressiveModuleT;
use crate::errors::PixelCnnError;

use candle_core::{Device, Tensor};
use candle_nn::ops;
use indicatif::{ProgressBar, ProgressDrawTarget};
use log::info;
use rand::distr::weighted::WeightedIndex;
use rand::distr::Distribution;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::Path;

pub const DEFAULT_INTERPOLATION_STEPS: usize = 8;

/// How the bin distribution of a pixel becomes a pixel value
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PixelDecoding {
    /// most probable bin; deterministic
    Argmax,
    /// draw a bin from the tempered distribution
    Sample { temperature: f32, seed: u64 },
}

enum BinPicker {
    Argmax,
    Sample { temperature: f32, rng: StdRng },
}

impl BinPicker {
    fn new(decoding: PixelDecoding) -> anyhow::Result<Self> {
        match decoding {
            PixelDecoding::Argmax => Ok(Self::Argmax),
            PixelDecoding::Sample { temperature, seed } => {
                if temperature.is_nan() || temperature <= 0. {
                    return Err(PixelCnnError::config(format!(
                        "sampling temperature must be positive, got {}",
                        temperature
                    ))
                    .into());
                }
                Ok(Self::Sample {
                    temperature,
                    rng: StdRng::seed_from_u64(seed),
                })
            }
        }
    }

    /// * `log_prob_nbc` - bin log-probabilities at one position
    ///
    /// Returns `[n][c]` bin labels
    fn pick(&mut self, log_prob_nbc: &Tensor) -> anyhow::Result<Vec<Vec<u32>>> {
        match self {
            Self::Argmax => Ok(log_prob_nbc.argmax(1)?.to_vec2::<u32>()?),
            Self::Sample { temperature, rng } => {
                let prob_ncb = ops::softmax(&(log_prob_nbc / *temperature as f64)?, 1)?
                    .transpose(1, 2)?
                    .to_vec3::<f32>()?;
                prob_ncb
                    .iter()
                    .map(|prob_cb| {
                        prob_cb
                            .iter()
                            .map(|prob_b| Ok(WeightedIndex::new(prob_b)?.sample(rng) as u32))
                            .collect::<anyhow::Result<Vec<u32>>>()
                    })
                    .collect()
            }
        }
    }
}

/// Generate images pixel by pixel in raster order
///
/// Every position costs one forward pass over the partially filled
/// batch; the value written at `(r, c)` is the decoded bin drawn from
/// the distribution the network predicts at exactly `(r, c)`.
///
/// * `model` - trained network
/// * `shape` - `(channels, height, width)` of each image
/// * `class_nk` - one conditioning vector per image
/// * `decoding` - argmax or sampling
/// * `device` - where the passes run
///
/// Returns `[n, c, h, w]` with every value equal to some `k / (n_bins - 1)`
pub fn sample<M>(
    model: &M,
    shape: (usize, usize, usize),
    class_nk: &Tensor,
    decoding: PixelDecoding,
    device: &Device,
) -> anyhow::Result<Tensor>
where
    M: AutoregressiveModuleT,
{
    let (c, h, w) = shape;
    let (n, k) = class_nk.dims2()?;

    if c != model.dim_channels() {
        return Err(PixelCnnError::config(format!(
            "network models {} channels, asked for {}",
            model.dim_channels(),
            c
        ))
        .into());
    }
    if k != model.dim_classes() {
        return Err(PixelCnnError::config(format!(
            "network is conditioned on {} classes, got vectors of width {}",
            model.dim_classes(),
            k
        ))
        .into());
    }

    let discretizer = Discretizer::new(model.num_bins())?;
    let ctx = ExecContext::eval(device);
    let mut picker = BinPicker::new(decoding)?;
    let class_nk = class_nk.to_device(device)?;

    let pb = ProgressBar::new((h * w) as u64);
    if h * w < 256 {
        pb.set_draw_target(ProgressDrawTarget::hidden());
    }

    let mut pixels = vec![0f32; n * c * h * w];

    for r in 0..h {
        for col in 0..w {
            let x_nchw = Tensor::from_slice(&pixels, (n, c, h, w), device)?;
            let log_prob = model.forward_t(&x_nchw, &class_nk, &ctx)?;
            let log_prob_nbc = log_prob
                .narrow(3, r, 1)?
                .narrow(4, col, 1)?
                .reshape((n, model.num_bins(), c))?;

            let labels = picker.pick(&log_prob_nbc)?;
            for (i, labels_c) in labels.iter().enumerate() {
                for (ch, &label) in labels_c.iter().enumerate() {
                    pixels[((i * c + ch) * h + r) * w + col] = discretizer.decode_label(label);
                }
            }
            pb.inc(1);
        }
    }
    pb.finish_and_clear();

    Ok(Tensor::from_vec(pixels, (n, c, h, w), device)?)
}

/// `n_steps` evenly spaced weights in [0, 1], starting at 0
pub fn interpolation_weights(n_steps: usize) -> Vec<f32> {
    match n_steps {
        0 => vec![],
        1 => vec![0.],
        _ => (0..n_steps)
            .map(|i| i as f32 / (n_steps - 1) as f32)
            .collect(),
    }
}

/// Blend the one-hot vectors of a class pair
///
/// v(t) = (1 - t) * onehot(a) + t * onehot(b)
///
/// Returns `[n_steps, n_classes]`
pub fn interpolate_class_vectors(
    n_classes: usize,
    pair: (usize, usize),
    n_steps: usize,
    device: &Device,
) -> anyhow::Result<Tensor> {
    let (a, b) = pair;
    if a >= n_classes || b >= n_classes {
        return Err(PixelCnnError::config(format!(
            "class pair ({}, {}) out of range for {} classes",
            a, b, n_classes
        ))
        .into());
    }
    if n_steps == 0 {
        return Err(PixelCnnError::config("need at least one interpolation step").into());
    }

    let weights = interpolation_weights(n_steps);
    let mut data = vec![0f32; n_steps * n_classes];
    for (i, t) in weights.iter().enumerate() {
        data[i * n_classes + a] += 1. - t;
        data[i * n_classes + b] += t;
    }
    Ok(Tensor::from_vec(data, (n_steps, n_classes), device)?)
}

#[derive(Clone, Debug)]
pub struct BetweenClassOptions {
    pub n_steps: usize,
    pub decoding: PixelDecoding,
    pub device: Device,
}

impl Default for BetweenClassOptions {
    fn default() -> Self {
        Self {
            n_steps: DEFAULT_INTERPOLATION_STEPS,
            decoding: PixelDecoding::Argmax,
            device: Device::Cpu,
        }
    }
}

/// Sample one image per interpolation step between two classes and
/// write them as a horizontal strip to `output_path`
///
/// * `model` - trained network
/// * `image_shape` - `(height, width)`
/// * `pair` - the two classes to blend
/// * `output_path` - raster image file (format by extension)
/// * `n_classes` - width of the conditioning vector
/// * `options` - steps, decoding and device
///
/// Returns the `[n_steps, c, h, w]` samples
pub fn generate_between_classes<M>(
    model: &M,
    image_shape: (usize, usize),
    pair: (usize, usize),
    output_path: &Path,
    n_classes: usize,
    options: &BetweenClassOptions,
) -> anyhow::Result<Tensor>
where
    M: AutoregressiveModuleT,
{
    if n_classes != model.dim_classes() {
        return Err(PixelCnnError::config(format!(
            "network is conditioned on {} classes, caller says {}",
            model.dim_classes(),
            n_classes
        ))
        .into());
    }

    let class_nk = interpolate_class_vectors(n_classes, pair, options.n_steps, &options.device)?;
    let (h, w) = image_shape;

    info!(
        "sampling {} images between classes {} and {} ...",
        options.n_steps, pair.0, pair.1
    );

    let images = sample(
        model,
        (model.dim_channels(), h, w),
        &class_nk,
        options.decoding,
        &options.device,
    )?;

    save_strip(&images, output_path)?;
    info!("wrote {}", output_path.display());
    Ok(images)
}
