use crate::errors::PixelCnnError;

use candle_core::{DType, Device, Result, Tensor};

/// Which centre tap a causal kernel may see
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MaskType {
    /// first layer: the centre pixel is the prediction target
    A,
    /// later layers: the centre carries only past information
    B,
}

//////////////////////////////////////////////
// 2d convolution restricted to past pixels //
//////////////////////////////////////////////

/// Convolution whose kernel footprint covers only the rows above the
/// centre and the columns left of it on the centre row (plus the centre
/// itself for `MaskType::B`). With raster ordering this means output
/// `(r, c)` never reads input `(r', c')` with `(r', c') > (r, c)`.
#[derive(Clone, Debug)]
pub struct MaskedConv2d {
    in_dim: usize,
    out_dim: usize,
    kernel: usize,
    mask_type: MaskType,
    weight_oikk: Tensor,
    mask_oikk: Tensor,
    bias_o: Option<Tensor>,
}

impl MaskedConv2d {
    pub fn new(
        weight_oikk: Tensor,
        bias_o: Option<Tensor>,
        mask_type: MaskType,
    ) -> anyhow::Result<Self> {
        let (out_dim, in_dim, kh, kw) = weight_oikk.dims4()?;
        if kh != kw {
            return Err(PixelCnnError::config(format!(
                "causal kernel must be square, got {}x{}",
                kh, kw
            ))
            .into());
        }
        let mask_oikk = causal_mask(out_dim, in_dim, kh, mask_type, weight_oikk.device())?
            .to_dtype(weight_oikk.dtype())?;
        Ok(Self {
            in_dim,
            out_dim,
            kernel: kh,
            mask_type,
            weight_oikk,
            mask_oikk,
            bias_o,
        })
    }

    /// The effective (masked) kernel
    pub fn weight(&self) -> Result<Tensor> {
        self.weight_oikk.mul(&self.mask_oikk)
    }

    pub fn mask(&self) -> &Tensor {
        &self.mask_oikk
    }

    pub fn mask_type(&self) -> MaskType {
        self.mask_type
    }

    pub fn kernel_size(&self) -> usize {
        self.kernel
    }

    pub fn dim_in(&self) -> usize {
        self.in_dim
    }

    pub fn dim_out(&self) -> usize {
        self.out_dim
    }

    /// * `x_bihw` - input feature map
    /// * `cond_bo` - conditioning added to every spatial position
    pub fn forward_t(&self, x_bihw: &Tensor, cond_bo: Option<&Tensor>) -> Result<Tensor> {
        // rows below the centre are all zero in the mask; drop them and
        // pad only above, so the padded input is never square
        let centre = self.kernel / 2;
        let weight_live = self.weight()?.narrow(2, 0, centre + 1)?.contiguous()?;
        let x_padded = x_bihw
            .pad_with_zeros(2, centre, 0)?
            .pad_with_zeros(3, centre, centre)?;
        let h_bohw = x_padded.conv2d(&weight_live, 0, 1, 1, 1)?;

        let h_bohw = match &self.bias_o {
            None => h_bohw,
            Some(bias) => h_bohw.broadcast_add(&bias.reshape((1, self.out_dim, 1, 1))?)?,
        };

        match cond_bo {
            None => Ok(h_bohw),
            Some(cond) => {
                let b = cond.dim(0)?;
                h_bohw.broadcast_add(&cond.reshape((b, self.out_dim, 1, 1))?)
            }
        }
    }
}

/// Build a `[out, in, k, k]` 0/1 mask
///
/// * `kernel` - odd kernel size
/// * `mask_type` - whether the centre tap survives
pub fn causal_mask(
    out_dim: usize,
    in_dim: usize,
    kernel: usize,
    mask_type: MaskType,
    device: &Device,
) -> anyhow::Result<Tensor> {
    if kernel == 0 || kernel % 2 == 0 {
        return Err(PixelCnnError::config(format!(
            "causal kernel size must be odd, got {}",
            kernel
        ))
        .into());
    }

    let centre = kernel / 2;
    let footprint: Vec<f32> = (0..kernel * kernel)
        .map(|i| {
            let (r, c) = (i / kernel, i % kernel);
            let keep = r < centre
                || (r == centre && c < centre)
                || (r == centre && c == centre && mask_type == MaskType::B);
            if keep {
                1.
            } else {
                0.
            }
        })
        .collect();

    Ok(Tensor::from_vec(footprint, (1, 1, kernel, kernel), device)?
        .broadcast_as((out_dim, in_dim, kernel, kernel))?
        .contiguous()?
        .to_dtype(DType::F32)?)
}

/// Create a masked convolution with these variables:
///
/// * `weight` of shape `[out, in, k, k]`
/// * `bias` of shape `[out]`
pub fn masked_conv2d(
    in_dim: usize,
    out_dim: usize,
    kernel: usize,
    mask_type: MaskType,
    vb: candle_nn::VarBuilder,
) -> anyhow::Result<MaskedConv2d> {
    if kernel == 0 || kernel % 2 == 0 {
        return Err(PixelCnnError::config(format!(
            "causal kernel size must be odd, got {}",
            kernel
        ))
        .into());
    }
    let init_ws = candle_nn::init::DEFAULT_KAIMING_NORMAL;
    let ws = vb.get_with_hints((out_dim, in_dim, kernel, kernel), "weight", init_ws)?;
    let bs = vb.get_with_hints(out_dim, "bias", candle_nn::init::ZERO)?;
    MaskedConv2d::new(ws, Some(bs), mask_type)
}

#[test]
fn mask_a_hides_centre_and_future() -> anyhow::Result<()> {
    let mask = causal_mask(1, 1, 3, MaskType::A, &Device::Cpu)?
        .flatten_all()?
        .to_vec1::<f32>()?;
    assert_eq!(mask, vec![1., 1., 1., 1., 0., 0., 0., 0., 0.]);

    let mask = causal_mask(1, 1, 3, MaskType::B, &Device::Cpu)?
        .flatten_all()?
        .to_vec1::<f32>()?;
    assert_eq!(mask, vec![1., 1., 1., 1., 1., 0., 0., 0., 0.]);
    Ok(())
}
