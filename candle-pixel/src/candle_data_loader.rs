use crate::candle_data_loader_util::*;
use crate::errors::PixelCnnError;

use candle_core::{DType, Device, Tensor};
use rand::Rng;

pub struct ImageMinibatch {
    /// `[b, c, h, w]` in `[0, 1]`
    pub images: Tensor,
    /// `[b]` class indexes
    pub labels: Tensor,
}

/// `DataLoader` for minibatch learning over labeled images
pub trait ImageDataLoader {
    fn minibatch_data(
        &self,
        batch_idx: usize,
        target_device: &Device,
    ) -> anyhow::Result<ImageMinibatch>;

    fn num_minibatch(&self) -> usize;

    fn num_samples(&self) -> usize;

    /// `(channels, height, width)`
    fn image_shape(&self) -> (usize, usize, usize);

    fn shuffle_minibatch<R: Rng>(&mut self, batch_size: usize, rng: &mut R) -> anyhow::Result<()>;

    fn ordered_minibatch(&mut self, batch_size: usize) -> anyhow::Result<()>;
}

///
/// A simple data loader for in-memory images. Each slice along axis 0
/// of the image tensor is one sample with the class label at the same
/// position of the label tensor.
///
pub struct InMemoryImageData {
    image_data: Vec<Tensor>,
    label_data: Vec<Tensor>,
    image_shape: (usize, usize, usize),
    minibatches: Minibatches,
}

impl InMemoryImageData {
    ///
    /// * `images` - `[n, c, h, w]` (or `[n, h, w]` for grayscale)
    /// * `labels` - `[n]` integer class labels
    ///
    pub fn new(images: &Tensor, labels: &Tensor) -> anyhow::Result<Self> {
        let images = match images.rank() {
            3 => images.unsqueeze(1)?,
            4 => images.clone(),
            _ => {
                return Err(PixelCnnError::config(format!(
                    "images must be [n, c, h, w], got {:?}",
                    images.dims()
                ))
                .into())
            }
        };
        let (n, c, h, w) = images.dims4()?;
        let labels = labels.flatten_all()?.to_dtype(DType::U32)?;

        if labels.dim(0)? != n {
            return Err(PixelCnnError::config(format!(
                "{} images but {} labels",
                n,
                labels.dim(0)?
            ))
            .into());
        }

        let images = images.to_dtype(DType::F32)?;
        let image_data = (0..n)
            .map(|i| images.narrow(0, i, 1))
            .collect::<candle_core::Result<Vec<_>>>()?;
        let label_data = (0..n)
            .map(|i| labels.narrow(0, i, 1))
            .collect::<candle_core::Result<Vec<_>>>()?;

        Ok(Self {
            image_data,
            label_data,
            image_shape: (c, h, w),
            minibatches: Minibatches::new(n),
        })
    }

    /// Batch exactly these samples, in this order
    pub fn samples(&self, indexes: &[usize], target_device: &Device) -> anyhow::Result<ImageMinibatch> {
        Ok(ImageMinibatch {
            images: take_rows(indexes, target_device, &self.image_data)?,
            labels: take_rows(indexes, target_device, &self.label_data)?,
        })
    }
}

impl ImageDataLoader for InMemoryImageData {
    fn minibatch_data(
        &self,
        batch_idx: usize,
        target_device: &Device,
    ) -> anyhow::Result<ImageMinibatch> {
        let indexes = self.minibatches.chunks.get(batch_idx).ok_or_else(|| {
            anyhow::anyhow!(
                "invalid index = {} vs. total # = {}",
                batch_idx,
                self.num_minibatch()
            )
        })?;
        self.samples(indexes, target_device)
    }

    fn num_minibatch(&self) -> usize {
        self.minibatches.chunks.len()
    }

    fn num_samples(&self) -> usize {
        self.minibatches.size()
    }

    fn image_shape(&self) -> (usize, usize, usize) {
        self.image_shape
    }

    fn shuffle_minibatch<R: Rng>(&mut self, batch_size: usize, rng: &mut R) -> anyhow::Result<()> {
        self.minibatches.shuffle_minibatch(batch_size, rng);
        Ok(())
    }

    fn ordered_minibatch(&mut self, batch_size: usize) -> anyhow::Result<()> {
        self.minibatches.ordered_minibatch(batch_size);
        Ok(())
    }
}
