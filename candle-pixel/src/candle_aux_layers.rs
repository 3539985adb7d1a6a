use crate::candle_exec_context::ExecContext;
use crate::candle_masked_conv::MaskedConv2d;

use candle_core::{Result, Tensor};
use candle_nn::{Activation, Linear, Module};

/// build a stack of causal layers, each one seeing its own projection
/// of the conditioning vector, with an activation and dropout after it
pub struct ConditionedStackLayers {
    module_layers: Vec<MaskedConv2d>,
    cond_layers: Vec<Linear>,
    activation_layers: Vec<Option<Activation>>,
    dropout: f32,
}

impl ConditionedStackLayers {
    pub fn new(dropout: f32) -> Self {
        Self {
            module_layers: Vec::new(),
            cond_layers: Vec::new(),
            activation_layers: Vec::new(),
            dropout,
        }
    }

    /// Appends a layer after all the current layers.
    pub fn push_with_act(&mut self, layer: MaskedConv2d, cond: Linear, activation: Activation) {
        self.module_layers.push(layer);
        self.cond_layers.push(cond);
        self.activation_layers.push(Some(activation));
    }

    pub fn len(&self) -> usize {
        self.module_layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.module_layers.is_empty()
    }

    /// * `input` - `[b, c, h, w]` image or feature map
    /// * `class_bk` - `[b, n_classes]` conditioning vector
    /// * `ctx` - dropout is applied between layers in training mode
    pub fn forward_t(&self, input: &Tensor, class_bk: &Tensor, ctx: &ExecContext) -> Result<Tensor> {
        let nlayers = self.module_layers.len();
        let mut x = input.clone();
        for (j, ((module, cond), activation)) in self
            .module_layers
            .iter()
            .zip(self.cond_layers.iter())
            .zip(self.activation_layers.iter())
            .enumerate()
        {
            let cond_bf = cond.forward(class_bk)?;
            x = module.forward_t(&x, Some(&cond_bf))?;
            if let Some(activation) = activation {
                x = activation.forward(&x)?;
            }
            if j + 1 < nlayers {
                x = ctx.dropout(&x, self.dropout)?;
            }
        }
        Ok(x)
    }
}
