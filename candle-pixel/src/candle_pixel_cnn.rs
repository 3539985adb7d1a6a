use crate::candle_aux_layers::*;
use crate::candle_exec_context::ExecContext;
use crate::candle_masked_conv::*;
use crate::candle_model_traits::AutoregressiveModuleT;
use crate::errors::PixelCnnError;

use candle_core::Tensor;
use candle_nn::{ops, Activation, VarBuilder, VarMap};
use log::info;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Uniform};
use serde::{Deserialize, Serialize};

pub const DEFAULT_FIRST_KERNEL: usize = 7;
pub const DEFAULT_HIDDEN_KERNEL: usize = 3;

/// Everything needed to rebuild the same network from scratch
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PixelCnnConfig {
    pub in_channels: usize,
    pub n_classes: usize,
    pub n_features: usize,
    pub n_layers: usize,
    pub n_bins: usize,
    #[serde(default = "default_first_kernel")]
    pub first_kernel: usize,
    #[serde(default = "default_hidden_kernel")]
    pub hidden_kernel: usize,
    pub dropout: f32,
}

fn default_first_kernel() -> usize {
    DEFAULT_FIRST_KERNEL
}

fn default_hidden_kernel() -> usize {
    DEFAULT_HIDDEN_KERNEL
}

impl PixelCnnConfig {
    pub fn new(
        in_channels: usize,
        n_classes: usize,
        n_features: usize,
        n_layers: usize,
        n_bins: usize,
        dropout: f32,
    ) -> Self {
        Self {
            in_channels,
            n_classes,
            n_features,
            n_layers,
            n_bins,
            first_kernel: DEFAULT_FIRST_KERNEL,
            hidden_kernel: DEFAULT_HIDDEN_KERNEL,
            dropout,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let positive = [
            ("in_channels", self.in_channels),
            ("n_classes", self.n_classes),
            ("n_features", self.n_features),
            ("n_layers", self.n_layers),
            ("n_bins", self.n_bins),
        ];
        for (name, value) in positive {
            if value == 0 {
                crate::config_bail!("{} must be positive", name);
            }
        }
        for (name, k) in [
            ("first_kernel", self.first_kernel),
            ("hidden_kernel", self.hidden_kernel),
        ] {
            if k % 2 == 0 {
                crate::config_bail!("{} must be odd, got {}", name, k);
            }
        }
        if !(0. ..1.).contains(&self.dropout) {
            crate::config_bail!("dropout must be in [0, 1), got {}", self.dropout);
        }
        Ok(())
    }
}

/// Stack of masked convolutions with class conditioning at every layer
///
/// image -> [mask A, k0] -> relu -> ([mask B, k] -> relu) x (L - 1)
///       -> 1x1 -> (b, n_bins, c, h, w) -> log_softmax over bins
pub struct PixelCnn {
    config: PixelCnnConfig,
    causal: ConditionedStackLayers,
    out_proj: candle_nn::Conv2d,
}

impl PixelCnn {
    /// Will create a new conditional PixelCNN with these variables:
    ///
    /// * `nn.causal.{j}.weight`, `nn.causal.{j}.bias` masked kernels
    /// * `nn.cond.{j}.weight`, `nn.cond.{j}.bias` class projections
    /// * `nn.out.weight`, `nn.out.bias` 1x1 output projection
    ///
    /// # Arguments
    /// * `config` - network dimensions
    /// * `vs` - variable builder
    pub fn new(config: &PixelCnnConfig, vs: VarBuilder) -> anyhow::Result<Self> {
        config.validate()?;

        let mut causal = ConditionedStackLayers::new(config.dropout);
        let mut prev_dim = config.in_channels;

        for j in 0..config.n_layers {
            let (kernel, mask_type) = if j == 0 {
                (config.first_kernel, MaskType::A)
            } else {
                (config.hidden_kernel, MaskType::B)
            };
            let conv = masked_conv2d(
                prev_dim,
                config.n_features,
                kernel,
                mask_type,
                vs.pp(format!("nn.causal.{}", j)),
            )?;
            let cond = candle_nn::linear(
                config.n_classes,
                config.n_features,
                vs.pp(format!("nn.cond.{}", j)),
            )?;
            causal.push_with_act(conv, cond, Activation::Relu);
            prev_dim = config.n_features;
        }

        let out_proj = candle_nn::conv2d(
            config.n_features,
            config.n_bins * config.in_channels,
            1,
            Default::default(),
            vs.pp("nn.out"),
        )?;

        Ok(Self {
            config: config.clone(),
            causal,
            out_proj,
        })
    }

    pub fn config(&self) -> &PixelCnnConfig {
        &self.config
    }

    /// Overwrite every variable deterministically from `seed`
    ///
    /// weights ~ U(-1/sqrt(fan_in), 1/sqrt(fan_in)), biases = 0
    pub fn seed_parameters(parameters: &VarMap, seed: u64) -> anyhow::Result<()> {
        let data = parameters
            .data()
            .lock()
            .map_err(|_| anyhow::anyhow!("variable map lock poisoned"))?;

        let mut names: Vec<&String> = data.keys().collect();
        names.sort();

        let mut rng = StdRng::seed_from_u64(seed);
        for name in names {
            let var = &data[name];
            let dims = var.dims().to_vec();
            let value = if dims.len() < 2 {
                var.as_tensor().zeros_like()?
            } else {
                let fan_in: usize = dims[1..].iter().product();
                let bound = 1. / (fan_in as f32).sqrt();
                let unif = Uniform::new_inclusive(-bound, bound)?;
                let values: Vec<f32> = (0..var.elem_count())
                    .map(|_| unif.sample(&mut rng))
                    .collect();
                Tensor::from_vec(values, dims.as_slice(), var.device())?.to_dtype(var.dtype())?
            };
            var.set(&value)?;
        }
        info!("seeded {} parameter tensors", data.len());
        Ok(())
    }
}

impl AutoregressiveModuleT for PixelCnn {
    fn forward_t(
        &self,
        x_bchw: &Tensor,
        class_bk: &Tensor,
        ctx: &ExecContext,
    ) -> anyhow::Result<Tensor> {
        ctx.check_placement("image", x_bchw)?;
        ctx.check_placement("class vector", class_bk)?;

        let (b, c, h, w) = x_bchw.dims4()?;
        let (bk, k) = class_bk.dims2()?;
        if c != self.config.in_channels {
            return Err(PixelCnnError::config(format!(
                "expected {} channels, got {}",
                self.config.in_channels, c
            ))
            .into());
        }
        if bk != b || k != self.config.n_classes {
            return Err(PixelCnnError::config(format!(
                "class vector {:?} does not match batch {} x {} classes",
                class_bk.dims(),
                b,
                self.config.n_classes
            ))
            .into());
        }

        let h_bfhw = self.causal.forward_t(x_bchw, class_bk, ctx)?;
        let logits = candle_nn::Module::forward(&self.out_proj, &h_bfhw)?
            .reshape((b, self.config.n_bins, c, h, w))?;

        Ok(ops::log_softmax(&logits, 1)?)
    }

    fn dim_channels(&self) -> usize {
        self.config.in_channels
    }

    fn dim_classes(&self) -> usize {
        self.config.n_classes
    }

    fn num_bins(&self) -> usize {
        self.config.n_bins
    }
}
