use candle_pixel::candle_core::{DType, Device, Tensor};
use candle_pixel::candle_exec_context::ExecContext;
use candle_pixel::candle_image_datasets::one_hot;
use candle_pixel::candle_model_traits::AutoregressiveModuleT;
use candle_pixel::candle_nn::{VarBuilder, VarMap};
use candle_pixel::candle_pixel_cnn::*;
use candle_pixel::errors::PixelCnnError;

fn small_network(n_layers: usize, seed: u64) -> anyhow::Result<(PixelCnn, VarMap)> {
    network_with_width(8, n_layers, seed)
}

fn network_with_width(
    n_features: usize,
    n_layers: usize,
    seed: u64,
) -> anyhow::Result<(PixelCnn, VarMap)> {
    let dev = Device::Cpu;
    let parameters = VarMap::new();
    let vb = VarBuilder::from_varmap(&parameters, DType::F32, &dev);
    let config = PixelCnnConfig::new(1, 3, n_features, n_layers, 4, 0.3);
    let net = PixelCnn::new(&config, vb)?;
    PixelCnn::seed_parameters(&parameters, seed)?;
    Ok((net, parameters))
}

fn pixel_diff(a: &Tensor, b: &Tensor, r: usize, c: usize) -> anyhow::Result<f32> {
    let a = a.narrow(3, r, 1)?.narrow(4, c, 1)?;
    let b = b.narrow(3, r, 1)?.narrow(4, c, 1)?;
    Ok((a - b)?.abs()?.flatten_all()?.max(0)?.to_scalar::<f32>()?)
}

#[test]
fn output_is_a_distribution_over_bins() -> anyhow::Result<()> {
    let (net, _) = small_network(3, 1)?;
    let dev = Device::Cpu;
    let x = Tensor::rand(0f32, 1f32, (2, 1, 6, 5), &dev)?;
    let class = one_hot(&Tensor::new(&[0u32, 2], &dev)?, 3, &dev)?;

    let log_prob = net.forward_t(&x, &class, &ExecContext::eval(&dev))?;
    assert_eq!(log_prob.dims(), &[2, 4, 1, 6, 5]);

    let total = log_prob.exp()?.sum(1)?.flatten_all()?.to_vec1::<f32>()?;
    for p in total {
        approx::assert_abs_diff_eq!(p, 1., epsilon = 1e-5);
    }
    Ok(())
}

/// Bump each of `pixels` in turn and check no prediction at or before it moves
fn assert_raster_causal(
    net: &PixelCnn,
    (h, w): (usize, usize),
    pixels: &[(usize, usize)],
) -> anyhow::Result<()> {
    let dev = Device::Cpu;
    let ctx = ExecContext::eval(&dev);
    let class = one_hot(&Tensor::new(&[1u32], &dev)?, 3, &dev)?;

    let x = Tensor::rand(0f32, 1f32, (1, 1, h, w), &dev)?;
    let base = net.forward_t(&x, &class, &ctx)?;

    for &(pr, pc) in pixels {
        let mut bump = vec![0f32; h * w];
        bump[pr * w + pc] = 5.;
        let x_perturbed = (&x + Tensor::from_vec(bump, (1, 1, h, w), &dev)?)?;
        let moved = net.forward_t(&x_perturbed, &class, &ctx)?;

        let mut later_change = 0f32;
        for r in 0..h {
            for c in 0..w {
                let d = pixel_diff(&base, &moved, r, c)?;
                if (r, c) <= (pr, pc) {
                    assert!(
                        d < 1e-6,
                        "pixel ({}, {}) leaked into ({}, {}): {}",
                        pr,
                        pc,
                        r,
                        c,
                        d
                    );
                } else {
                    later_change += d;
                }
            }
        }
        if (pr, pc) != (h - 1, w - 1) {
            assert!(later_change > 0., "pixel ({}, {}) reaches nothing", pr, pc);
        }
    }
    Ok(())
}

#[test]
fn perturbing_a_pixel_leaves_earlier_predictions_unchanged() -> anyhow::Result<()> {
    let (net, _) = small_network(4, 7)?;
    assert_raster_causal(&net, (7, 7), &[(0, 0), (3, 3), (3, 0), (6, 6), (2, 5)])
}

#[test]
fn causal_when_feature_width_equals_image_side() -> anyhow::Result<()> {
    for (n_features, side) in [(8, 8), (6, 6), (16, 16)] {
        let (net, _) = network_with_width(n_features, 2, 13)?;
        let every_pixel: Vec<(usize, usize)> = (0..side)
            .flat_map(|r| (0..side).map(move |c| (r, c)))
            .collect();
        assert_raster_causal(&net, (side, side), &every_pixel)?;
    }
    Ok(())
}

#[test]
fn class_vector_reaches_the_first_pixel() -> anyhow::Result<()> {
    let (net, _) = small_network(2, 3)?;
    let dev = Device::Cpu;
    let ctx = ExecContext::eval(&dev);
    let x = Tensor::zeros((1, 1, 4, 4), DType::F32, &dev)?;

    let a = net.forward_t(&x, &one_hot(&Tensor::new(&[0u32], &dev)?, 3, &dev)?, &ctx)?;
    let b = net.forward_t(&x, &one_hot(&Tensor::new(&[2u32], &dev)?, 3, &dev)?, &ctx)?;

    // the very first pixel sees nothing but the class
    assert!(pixel_diff(&a, &b, 0, 0)? > 0.);
    Ok(())
}

#[test]
fn dropout_only_in_training_mode() -> anyhow::Result<()> {
    let (net, _) = small_network(3, 5)?;
    let dev = Device::Cpu;
    let x = Tensor::rand(0f32, 1f32, (2, 1, 5, 5), &dev)?;
    let class = one_hot(&Tensor::new(&[0u32, 1], &dev)?, 3, &dev)?;

    let diff = |a: &Tensor, b: &Tensor| -> anyhow::Result<f32> {
        Ok((a - b)?.abs()?.flatten_all()?.max(0)?.to_scalar::<f32>()?)
    };

    let eval_a = net.forward_t(&x, &class, &ExecContext::eval(&dev))?;
    let eval_b = net.forward_t(&x, &class, &ExecContext::eval(&dev))?;
    assert_eq!(diff(&eval_a, &eval_b)?, 0.);

    let train_a = net.forward_t(&x, &class, &ExecContext::train(&dev, 11))?;
    let train_b = net.forward_t(&x, &class, &ExecContext::train(&dev, 11))?;
    let train_c = net.forward_t(&x, &class, &ExecContext::train(&dev, 12))?;
    assert_eq!(diff(&train_a, &train_b)?, 0.);
    assert!(diff(&train_a, &train_c)? > 0.);
    Ok(())
}

#[test]
fn mismatched_inputs_are_configuration_errors() -> anyhow::Result<()> {
    let (net, _) = small_network(2, 1)?;
    let dev = Device::Cpu;
    let ctx = ExecContext::eval(&dev);
    let x = Tensor::zeros((2, 1, 4, 4), DType::F32, &dev)?;

    let wrong_width = Tensor::zeros((2, 5), DType::F32, &dev)?;
    let err = net.forward_t(&x, &wrong_width, &ctx).unwrap_err();
    assert!(err.downcast_ref::<PixelCnnError>().is_some_and(|e| e.is_config()));

    let wrong_channels = Tensor::zeros((2, 3, 4, 4), DType::F32, &dev)?;
    let class = Tensor::zeros((2, 3), DType::F32, &dev)?;
    let err = net.forward_t(&wrong_channels, &class, &ctx).unwrap_err();
    assert!(err.downcast_ref::<PixelCnnError>().is_some_and(|e| e.is_config()));
    Ok(())
}

#[test]
fn config_validation() {
    let mut config = PixelCnnConfig::new(1, 10, 16, 2, 4, 0.5);
    assert!(config.validate().is_ok());

    config.hidden_kernel = 4;
    assert!(config.validate().is_err());

    let config = PixelCnnConfig::new(1, 10, 16, 2, 4, 1.0);
    assert!(config.validate().is_err());

    let config = PixelCnnConfig::new(1, 10, 16, 0, 4, 0.);
    assert!(config.validate().is_err());
}

#[test]
fn seeded_parameters_are_reproducible() -> anyhow::Result<()> {
    let (_, p1) = small_network(2, 99)?;
    let (_, p2) = small_network(2, 99)?;

    let d1 = p1.data().lock().unwrap();
    let d2 = p2.data().lock().unwrap();
    assert_eq!(d1.len(), d2.len());
    for (name, v1) in d1.iter() {
        let v2 = &d2[name];
        let diff = (v1.as_tensor() - v2.as_tensor())?
            .abs()?
            .flatten_all()?
            .max(0)?
            .to_scalar::<f32>()?;
        assert_eq!(diff, 0., "{} differs", name);
    }
    Ok(())
}
