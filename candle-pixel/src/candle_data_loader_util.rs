use anyhow::anyhow;
use candle_core::{Device, Tensor};
use rand::prelude::SliceRandom;
use rand::Rng;

///
/// A helper `struct` for shuffling and creating minibatch indexes;
/// after `shuffle_minibatch` or `ordered_minibatch` is called,
/// `chunks` partition the sample indexes.
///
pub struct Minibatches {
    pub samples: Vec<usize>,
    pub chunks: Vec<Vec<usize>>,
}

impl Minibatches {
    pub fn new(size: usize) -> Self {
        Self {
            samples: (0..size).collect(),
            chunks: vec![],
        }
    }

    /// Permute the samples with `rng` and cut them into batches; the
    /// last batch may be smaller
    pub fn shuffle_minibatch<R: Rng>(&mut self, batch_size: usize, rng: &mut R) {
        self.samples.sort_unstable();
        self.samples.shuffle(rng);
        self.chunk(batch_size);
    }

    /// Cut the samples in their original order
    pub fn ordered_minibatch(&mut self, batch_size: usize) {
        self.samples.sort_unstable();
        self.chunk(batch_size);
    }

    fn chunk(&mut self, batch_size: usize) {
        let batch_size = batch_size.max(1);
        self.chunks = self
            .samples
            .chunks(batch_size)
            .map(|c| c.to_vec())
            .collect();
    }

    pub fn size(&self) -> usize {
        self.samples.len()
    }
}

/// Stack the rows `indexes` of `data_vec` along axis 0
pub fn take_rows(
    indexes: &[usize],
    target_device: &Device,
    data_vec: &[Tensor],
) -> anyhow::Result<Tensor> {
    if let Some(&bad) = indexes.iter().find(|&&i| i >= data_vec.len()) {
        return Err(anyhow!(
            "invalid sample index = {} vs. total # = {}",
            bad,
            data_vec.len()
        ));
    }
    let chunk = Tensor::cat(
        &indexes.iter().map(|&i| data_vec[i].clone()).collect::<Vec<_>>(),
        0,
    )?;
    Ok(chunk.to_device(target_device)?)
}
