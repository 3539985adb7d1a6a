use candle_pixel::candle_core::{DType, Device, Tensor};
use candle_pixel::candle_data_loader::{ImageDataLoader, InMemoryImageData};
use candle_pixel::candle_image_datasets::*;
use candle_pixel::errors::PixelCnnError;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::io::Write;
use std::path::Path;

fn gzip(src: &Path, dst: &Path) -> anyhow::Result<()> {
    let bytes = std::fs::read(src)?;
    let mut enc = flate2::write::GzEncoder::new(
        std::fs::File::create(dst)?,
        flate2::Compression::default(),
    );
    enc.write_all(&bytes)?;
    enc.finish()?;
    std::fs::remove_file(src)?;
    Ok(())
}

#[test]
fn synthetic_set_reads_back_as_mnist_layout() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let args = SyntheticArgs {
        n_classes: 3,
        n_train_per_class: 5,
        n_val_per_class: 2,
        height: 6,
        width: 4,
        noise: 0.1,
        seed: 8,
    };
    let (train_x, train_y) = synthetic_images(&args, args.n_train_per_class, 0)?;
    let (val_x, val_y) = synthetic_images(&args, args.n_val_per_class, 1)?;

    write_idx_images(&dir.path().join(MNIST_TRAIN_IMAGES), &train_x)?;
    write_idx_labels(&dir.path().join(MNIST_TRAIN_LABELS), &train_y)?;
    write_idx_images(&dir.path().join(MNIST_TEST_IMAGES), &val_x)?;
    write_idx_labels(&dir.path().join(MNIST_TEST_LABELS), &val_y)?;

    // the test split is read through the gzip path
    for name in [MNIST_TEST_IMAGES, MNIST_TEST_LABELS] {
        gzip(
            &dir.path().join(name),
            &dir.path().join(format!("{}.gz", name)),
        )?;
    }

    let back_x = read_idx_images(&dir.path().join(MNIST_TRAIN_IMAGES))?;
    assert_eq!(back_x.dims(), &[15, 1, 6, 4]);
    assert_eq!(
        back_x.flatten_all()?.to_vec1::<f32>()?,
        train_x.flatten_all()?.to_vec1::<f32>()?
    );

    let data = load_dataset(&DatasetKind::Mnist {
        dir: dir.path().to_path_buf(),
    })?;
    assert_eq!(data.image_shape, (1, 6, 4));
    assert_eq!(data.n_classes, 10);
    assert_eq!(data.train.num_samples(), 15);
    assert_eq!(data.validation.num_samples(), 6);

    let mb = data.validation.samples(&[0, 1, 2, 3, 4, 5], &Device::Cpu)?;
    assert_eq!(mb.labels.to_vec1::<u32>()?, val_y.to_vec1::<u32>()?);
    Ok(())
}

#[test]
fn missing_idx_file_is_reported() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let err = load_dataset(&DatasetKind::Mnist {
        dir: dir.path().to_path_buf(),
    })
    .err()
    .expect("empty directory");
    assert!(err.to_string().contains(MNIST_TRAIN_IMAGES));
    Ok(())
}

#[test]
fn wrong_magic_number_is_rejected() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("labels");
    write_idx_labels(&path, &Tensor::new(&[1u32, 2, 3], &Device::Cpu)?)?;
    assert!(read_idx_images(&path).is_err());
    assert_eq!(read_idx_labels(&path)?.to_vec1::<u32>()?, vec![1, 2, 3]);
    Ok(())
}

#[test]
fn synthetic_classes_are_balanced_and_reproducible() -> anyhow::Result<()> {
    let args = SyntheticArgs::default();
    let (x1, y1) = synthetic_images(&args, 4, 0)?;
    let (x2, y2) = synthetic_images(&args, 4, 0)?;
    let (x3, _) = synthetic_images(&args, 4, 1)?;

    let labels = y1.to_vec1::<u32>()?;
    for k in 0..args.n_classes as u32 {
        assert_eq!(labels.iter().filter(|&&y| y == k).count(), 4);
    }
    assert_eq!(labels, y2.to_vec1::<u32>()?);

    let p1 = x1.flatten_all()?.to_vec1::<f32>()?;
    assert_eq!(p1, x2.flatten_all()?.to_vec1::<f32>()?);
    assert_ne!(p1, x3.flatten_all()?.to_vec1::<f32>()?);
    assert!(p1.iter().all(|&v| v == 0. || v == 1.));
    Ok(())
}

#[test]
fn one_hot_rows() -> anyhow::Result<()> {
    let dev = Device::Cpu;
    let v = one_hot(&Tensor::new(&[2u32, 0], &dev)?, 3, &dev)?.to_vec2::<f32>()?;
    assert_eq!(v, vec![vec![0., 0., 1.], vec![1., 0., 0.]]);

    // float labels in a column still index classes
    let v = one_hot(&Tensor::new(&[[1f32], [1.]], &dev)?, 2, &dev)?.to_vec2::<f32>()?;
    assert_eq!(v, vec![vec![0., 1.], vec![0., 1.]]);

    let none = one_hot(&Tensor::zeros(0, DType::U32, &dev)?, 4, &dev)?;
    assert_eq!(none.dims(), &[0, 4]);

    let err = one_hot(&Tensor::new(&[0u32, 3], &dev)?, 3, &dev).unwrap_err();
    assert!(err.downcast_ref::<PixelCnnError>().is_some_and(|e| e.is_config()));
    Ok(())
}

#[test]
fn every_sample_lands_in_one_shuffled_batch() -> anyhow::Result<()> {
    let n = 11;
    let images = Tensor::arange(0f32, (n * 4) as f32, &Device::Cpu)?.reshape((n, 2, 2))?;
    let labels = Tensor::arange(0u32, n as u32, &Device::Cpu)?;
    let mut data = InMemoryImageData::new(&images, &labels)?;
    assert_eq!(data.image_shape(), (1, 2, 2));

    data.shuffle_minibatch(4, &mut StdRng::seed_from_u64(1))?;
    assert_eq!(data.num_minibatch(), 3);

    let mut seen = vec![];
    for b in 0..data.num_minibatch() {
        let mb = data.minibatch_data(b, &Device::Cpu)?;
        let ys = mb.labels.to_vec1::<u32>()?;
        let xs = mb.images.flatten_all()?.to_vec1::<f32>()?;
        for (i, &y) in ys.iter().enumerate() {
            // image and label travel together
            assert_eq!(xs[i * 4], (y * 4) as f32);
        }
        seen.extend(ys);
    }
    seen.sort();
    assert_eq!(seen, (0..n as u32).collect::<Vec<_>>());
    assert!(data.minibatch_data(3, &Device::Cpu).is_err());

    let mismatched = InMemoryImageData::new(&images, &Tensor::new(&[0u32], &Device::Cpu)?);
    assert!(mismatched.is_err());
    Ok(())
}
