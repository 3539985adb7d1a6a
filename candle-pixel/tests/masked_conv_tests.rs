use candle_pixel::candle_core::{DType, Device, Tensor};
use candle_pixel::candle_masked_conv::*;
use candle_pixel::candle_nn::{VarBuilder, VarMap};
use candle_pixel::errors::PixelCnnError;

fn max_abs_diff_at(a: &Tensor, b: &Tensor, r: usize, c: usize) -> anyhow::Result<f32> {
    let a = a.narrow(2, r, 1)?.narrow(3, c, 1)?;
    let b = b.narrow(2, r, 1)?.narrow(3, c, 1)?;
    Ok((a - b)?.abs()?.flatten_all()?.max(0)?.to_scalar::<f32>()?)
}

#[test]
fn even_kernel_is_rejected() {
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    let err = masked_conv2d(1, 4, 4, MaskType::A, vb).unwrap_err();
    assert!(err
        .downcast_ref::<PixelCnnError>()
        .map(|e| e.is_config())
        .unwrap_or(false));
}

#[test]
fn masked_weights_never_see_future_taps() -> anyhow::Result<()> {
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    let conv = masked_conv2d(2, 3, 5, MaskType::B, vb)?;
    assert_eq!(conv.mask_type(), MaskType::B);
    assert_eq!((conv.dim_in(), conv.dim_out(), conv.kernel_size()), (2, 3, 5));
    assert_eq!(conv.mask().dims(), &[3, 2, 5, 5]);

    let w = conv.weight()?.narrow(0, 0, 1)?.narrow(1, 0, 1)?.reshape((5, 5))?;
    let w = w.to_vec2::<f32>()?;
    for (r, row) in w.iter().enumerate() {
        for (c, &x) in row.iter().enumerate() {
            if r > 2 || (r == 2 && c > 2) {
                assert_eq!(x, 0.);
            }
        }
    }
    Ok(())
}

#[test]
fn single_layer_output_ignores_current_and_later_pixels() -> anyhow::Result<()> {
    let dev = Device::Cpu;
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
    let conv = masked_conv2d(1, 4, 3, MaskType::A, vb)?;

    let x = Tensor::rand(0f32, 1f32, (1, 1, 6, 6), &dev)?;
    let (pr, pc) = (3, 2);
    let mut bump = vec![0f32; 36];
    bump[pr * 6 + pc] = 1.;
    let x_perturbed = (&x + Tensor::from_vec(bump, (1, 1, 6, 6), &dev)?)?;

    let cond = Tensor::ones((1, 4), DType::F32, &dev)?;
    let y = conv.forward_t(&x, Some(&cond))?;
    let y_perturbed = conv.forward_t(&x_perturbed, Some(&cond))?;

    for r in 0..6 {
        for c in 0..6 {
            let d = max_abs_diff_at(&y, &y_perturbed, r, c)?;
            if (r, c) <= (pr, pc) {
                assert!(d < 1e-6, "output ({}, {}) moved by {}", r, c, d);
            }
        }
    }
    Ok(())
}
