use candle_pixel::candle_core::{DType, Device, Tensor};
use candle_pixel::candle_image_datasets::one_hot;
use candle_pixel::candle_nn::{VarBuilder, VarMap};
use candle_pixel::candle_pixel_cnn::{PixelCnn, PixelCnnConfig};
use candle_pixel::candle_sampler::*;
use candle_pixel::errors::PixelCnnError;

fn untrained(n_classes: usize, n_bins: usize) -> anyhow::Result<PixelCnn> {
    let parameters = VarMap::new();
    let vb = VarBuilder::from_varmap(&parameters, DType::F32, &Device::Cpu);
    let config = PixelCnnConfig::new(1, n_classes, 8, 2, n_bins, 0.5);
    let net = PixelCnn::new(&config, vb)?;
    PixelCnn::seed_parameters(&parameters, 21)?;
    Ok(net)
}

#[test]
fn interpolation_starts_and_ends_at_the_pair() -> anyhow::Result<()> {
    let dev = Device::Cpu;
    let v = interpolate_class_vectors(10, (1, 7), 8, &dev)?.to_vec2::<f32>()?;
    assert_eq!(v.len(), 8);

    let a = one_hot(&Tensor::new(&[1u32], &dev)?, 10, &dev)?.to_vec2::<f32>()?;
    let b = one_hot(&Tensor::new(&[7u32], &dev)?, 10, &dev)?.to_vec2::<f32>()?;
    assert_eq!(v[0], a[0]);
    assert_eq!(v[7], b[0]);

    for row in &v {
        approx::assert_abs_diff_eq!(row.iter().sum::<f32>(), 1., epsilon = 1e-6);
        for (k, &x) in row.iter().enumerate() {
            if k != 1 && k != 7 {
                assert_eq!(x, 0.);
            }
        }
    }
    approx::assert_abs_diff_eq!(v[2][7], 2. / 7., epsilon = 1e-6);
    Ok(())
}

#[test]
fn interpolation_weight_counts() {
    assert!(interpolation_weights(0).is_empty());
    assert_eq!(interpolation_weights(1), vec![0.]);
    assert_eq!(interpolation_weights(3), vec![0., 0.5, 1.]);
}

#[test]
fn bad_pairs_and_step_counts_are_rejected() {
    let dev = Device::Cpu;
    for (pair, steps) in [((0, 10), 4), ((10, 0), 4), ((0, 1), 0)] {
        let err = interpolate_class_vectors(10, pair, steps, &dev).unwrap_err();
        assert!(err.downcast_ref::<PixelCnnError>().is_some_and(|e| e.is_config()));
    }
}

#[test]
fn two_step_interpolation_samples_the_endpoint_classes() -> anyhow::Result<()> {
    let net = untrained(3, 4)?;
    let dev = Device::Cpu;

    let blended = interpolate_class_vectors(3, (0, 2), 2, &dev)?;
    let endpoints = one_hot(&Tensor::new(&[0u32, 2], &dev)?, 3, &dev)?;

    let x = sample(&net, (1, 5, 5), &blended, PixelDecoding::Argmax, &dev)?;
    let y = sample(&net, (1, 5, 5), &endpoints, PixelDecoding::Argmax, &dev)?;

    assert_eq!(x.dims(), &[2, 1, 5, 5]);
    assert_eq!(
        x.flatten_all()?.to_vec1::<f32>()?,
        y.flatten_all()?.to_vec1::<f32>()?
    );
    Ok(())
}

#[test]
fn sampled_pixels_are_bin_centres() -> anyhow::Result<()> {
    let net = untrained(2, 5)?;
    let dev = Device::Cpu;
    let class = one_hot(&Tensor::new(&[0u32, 1, 1], &dev)?, 2, &dev)?;
    let decoding = PixelDecoding::Sample {
        temperature: 1.0,
        seed: 4,
    };

    let x = sample(&net, (1, 4, 6), &class, decoding, &dev)?;
    let again = sample(&net, (1, 4, 6), &class, decoding, &dev)?;
    let x = x.flatten_all()?.to_vec1::<f32>()?;
    assert_eq!(x, again.flatten_all()?.to_vec1::<f32>()?);

    for v in x {
        assert!((0. ..=1.).contains(&v));
        let k = v * 4.;
        approx::assert_abs_diff_eq!(k, k.round(), epsilon = 1e-5);
    }
    Ok(())
}

#[test]
fn non_positive_temperature_is_rejected() -> anyhow::Result<()> {
    let net = untrained(2, 4)?;
    let dev = Device::Cpu;
    let class = one_hot(&Tensor::new(&[0u32], &dev)?, 2, &dev)?;
    let decoding = PixelDecoding::Sample {
        temperature: 0.,
        seed: 0,
    };
    assert!(sample(&net, (1, 3, 3), &class, decoding, &dev).is_err());
    Ok(())
}

#[test]
fn between_class_strip_is_written() -> anyhow::Result<()> {
    let net = untrained(4, 4)?;
    let dir = tempfile::tempdir()?;
    let options = BetweenClassOptions {
        n_steps: 5,
        ..Default::default()
    };

    for file in ["1-3.png", "3-1.jpeg"] {
        let path = dir.path().join(file);
        let pair = if file.starts_with('1') { (1, 3) } else { (3, 1) };
        let images = generate_between_classes(&net, (6, 7), pair, &path, 4, &options)?;
        assert_eq!(images.dims(), &[5, 1, 6, 7]);

        let strip = image::open(&path)?;
        assert_eq!((strip.width(), strip.height()), (5 * 7, 6));
    }

    let png = image::open(dir.path().join("1-3.png"))?.to_luma8();
    let first = Tensor::new(&[1u32], &Device::Cpu)?;
    let expected = sample(
        &net,
        (1, 6, 7),
        &one_hot(&first, 4, &Device::Cpu)?,
        PixelDecoding::Argmax,
        &Device::Cpu,
    )?
    .flatten_all()?
    .to_vec1::<f32>()?;
    for r in 0..6 {
        for c in 0..7 {
            let want = (expected[r * 7 + c] * 255.).round() as u8;
            assert_eq!(png.get_pixel(c as u32, r as u32).0[0], want);
        }
    }
    Ok(())
}

#[test]
fn class_count_must_match_the_network() -> anyhow::Result<()> {
    let net = untrained(4, 4)?;
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("0-1.png");
    let err = generate_between_classes(&net, (4, 4), (0, 1), &path, 10, &Default::default())
        .unwrap_err();
    assert!(err.downcast_ref::<PixelCnnError>().is_some_and(|e| e.is_config()));
    assert!(!path.exists());
    Ok(())
}
