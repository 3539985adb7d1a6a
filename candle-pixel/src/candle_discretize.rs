use crate::errors::PixelCnnError;

use candle_core::{DType, Result, Tensor};

/// Uniform binning of `[0, 1]` intensities into `n_bins` labels
///
/// label = round( (n_bins - 1) * x )
/// value = label / (n_bins - 1)
///
/// The labels are the targets of the per-pixel categorical loss; the
/// decoded values are what the sampler feeds back into the network.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Discretizer {
    n_bins: usize,
}

impl Discretizer {
    /// * `n_bins` - number of discrete levels, at least one
    pub fn new(n_bins: usize) -> anyhow::Result<Self> {
        if n_bins == 0 {
            return Err(PixelCnnError::config("number of bins must be at least 1").into());
        }
        Ok(Self { n_bins })
    }

    pub fn n_bins(&self) -> usize {
        self.n_bins
    }

    fn scale(&self) -> f64 {
        (self.n_bins - 1) as f64
    }

    /// Largest distance between a value and its decoded bin is half of this
    pub fn bin_width(&self) -> f64 {
        if self.n_bins > 1 {
            1. / self.scale()
        } else {
            0.
        }
    }

    /// Map `x_bchw` to `u32` labels in `[0, n_bins)`.
    ///
    /// A singleton channel axis is squeezed, so a grayscale batch
    /// `[b, 1, h, w]` gives `[b, h, w]`.
    pub fn encode(&self, x_bchw: &Tensor) -> Result<Tensor> {
        let labels = (x_bchw.clamp(0f32, 1f32)? * self.scale())?
            .round()?
            .to_dtype(DType::U32)?;
        if labels.rank() == 4 {
            labels.squeeze(1)
        } else {
            Ok(labels)
        }
    }

    /// Map `u32` labels back to their representative `f32` values
    pub fn decode(&self, labels: &Tensor) -> Result<Tensor> {
        let values = labels.to_dtype(DType::F32)?;
        if self.n_bins > 1 {
            values / self.scale()
        } else {
            values.zeros_like()
        }
    }

    pub fn encode_value(&self, x: f32) -> u32 {
        (x.clamp(0., 1.) as f64 * self.scale()).round() as u32
    }

    pub fn decode_label(&self, label: u32) -> f32 {
        if self.n_bins > 1 {
            (label as f64 / self.scale()) as f32
        } else {
            0.
        }
    }
}
