use crate::candle_exec_context::ExecContext;

use candle_core::Tensor;

pub trait AutoregressiveModuleT {
    /// A class-conditioned model that spits out per-pixel bin
    /// log-probabilities
    ///
    /// # Arguments
    /// * `x_bchw` - image batch (b x c x h x w), values in [0, 1]
    /// * `class_bk` - conditioning vector (b x n_classes)
    /// * `ctx` - device and train/eval mode
    ///
    /// # Returns `log_prob_bnchw`
    /// * (b x n_bins x c x h x w), log-softmax over the bin axis
    fn forward_t(
        &self,
        x_bchw: &Tensor,
        class_bk: &Tensor,
        ctx: &ExecContext,
    ) -> anyhow::Result<Tensor>;

    fn dim_channels(&self) -> usize;

    fn dim_classes(&self) -> usize;

    fn num_bins(&self) -> usize;
}
