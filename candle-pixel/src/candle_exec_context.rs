use candle_core::{Device, Tensor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cell::RefCell;

use crate::errors::PixelCnnError;

/// What a forward pass needs to know about where and how it runs.
///
/// The training flag switches dropout on for the whole pass; the
/// dropout masks come from a seeded generator so two runs with the same
/// seed see the same masks.
pub struct ExecContext {
    device: Device,
    train: bool,
    dropout_rng: Option<RefCell<StdRng>>,
}

impl ExecContext {
    /// Training mode with dropout driven by `seed`
    pub fn train(device: &Device, seed: u64) -> Self {
        Self {
            device: device.clone(),
            train: true,
            dropout_rng: Some(RefCell::new(StdRng::seed_from_u64(seed))),
        }
    }

    /// Evaluation mode: no dropout
    pub fn eval(device: &Device) -> Self {
        Self {
            device: device.clone(),
            train: false,
            dropout_rng: None,
        }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Every tensor of a pass must live on the context device
    pub fn check_placement(&self, name: &str, x: &Tensor) -> anyhow::Result<()> {
        if !x.device().same_device(&self.device) {
            return Err(PixelCnnError::config(format!(
                "{} is on {:?} but the pass runs on {:?}",
                name,
                x.device(),
                self.device
            ))
            .into());
        }
        Ok(())
    }

    /// Inverted dropout with drop probability `drop_p`; identity in
    /// evaluation mode or when `drop_p` is zero
    pub fn dropout(&self, x: &Tensor, drop_p: f32) -> candle_core::Result<Tensor> {
        let rng = match (&self.dropout_rng, self.train && drop_p > 0.) {
            (Some(rng), true) => rng,
            _ => return Ok(x.clone()),
        };

        let keep = 1. - drop_p;
        let n = x.elem_count();
        let mask: Vec<f32> = {
            let mut rng = rng.borrow_mut();
            (0..n)
                .map(|_| if rng.random::<f32>() < keep { 1. / keep } else { 0. })
                .collect()
        };
        let mask = Tensor::from_vec(mask, x.dims(), x.device())?.to_dtype(x.dtype())?;
        x.mul(&mask)
    }
}
