use candle_core::{Result, Tensor};

/// Negative log-likelihood of discretised pixels
///
/// nll = - mean_{b,c,h,w} log pr(b, label(b,c,h,w), c, h, w)
///
/// * `log_prob_bnchw` - per-pixel bin log-probabilities (log-softmax over `n`)
/// * `labels` - `u32` bin labels, `[b, h, w]` or `[b, c, h, w]`
///
pub fn discretized_nll(log_prob_bnchw: &Tensor, labels: &Tensor) -> Result<Tensor> {
    let (b, n, c, h, w) = log_prob_bnchw.dims5()?;
    let m = b * c * h * w;

    let log_prob_mn = log_prob_bnchw
        .permute((0, 2, 3, 4, 1))?
        .contiguous()?
        .reshape((m, n))?;

    let target_m = labels.flatten_all()?;
    if target_m.dim(0)? != m {
        candle_core::bail!(
            "labels {:?} do not cover the predicted {} pixels",
            labels.dims(),
            m
        );
    }

    candle_nn::loss::nll(&log_prob_mn, &target_m)
}

/// Log-likelihood of each image (summed over channel and pixels)
///
/// llik(b) = sum_{c,h,w} log pr(b, label(b,c,h,w), c, h, w)
///
/// * `log_prob_bnchw` - per-pixel bin log-probabilities
/// * `labels` - `u32` bin labels, `[b, h, w]` or `[b, c, h, w]`
///
pub fn discretized_log_likelihood(log_prob_bnchw: &Tensor, labels: &Tensor) -> Result<Tensor> {
    let (b, _n, c, h, w) = log_prob_bnchw.dims5()?;
    let target_b1chw = labels.reshape((b, 1, c, h, w))?;
    log_prob_bnchw
        .gather(&target_b1chw.contiguous()?, 1)?
        .reshape((b, c * h * w))?
        .sum(1)
}
