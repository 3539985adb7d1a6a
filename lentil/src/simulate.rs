use crate::common::*;

use candle_pixel::candle_image_datasets::*;
use candle_pixel::errors::PixelCnnError;
use candle_pixel::experiment_store::expand_home;

use clap::Args;
use log::info;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct SimulateArgs {
    #[arg(help = "Output directory for the IDX files")]
    out: Box<str>,

    #[arg(long, default_value_t = 10, help = "Number of classes")]
    n_classes: usize,

    #[arg(long, default_value_t = 100, help = "Training images per class")]
    n_train: usize,

    #[arg(long, default_value_t = 20, help = "Validation images per class")]
    n_val: usize,

    #[arg(long, default_value_t = 28, help = "Image height and width")]
    size: usize,

    #[arg(
        long,
        default_value_t = 0.05,
        help = "Pixel flip probability"
    )]
    noise: f32,

    #[arg(long, default_value_t = 42, help = "Random seed")]
    seed: u64,

    #[arg(long, short, help = "Verbosity")]
    verbose: bool,
}

pub fn simulate_dataset(args: &SimulateArgs) -> anyhow::Result<()> {
    init_logging(args.verbose);

    // `train --dataset mnist` reads these as ten-class data
    if args.n_classes > 10 {
        return Err(PixelCnnError::config(format!(
            "at most 10 classes fit the MNIST layout, got {}",
            args.n_classes
        ))
        .into());
    }

    let dir = expand_home(&PathBuf::from(&*args.out));
    std::fs::create_dir_all(&dir).map_err(|e| PixelCnnError::io("create", &dir, e))?;

    let sim = SyntheticArgs {
        n_classes: args.n_classes,
        n_train_per_class: args.n_train,
        n_val_per_class: args.n_val,
        height: args.size,
        width: args.size,
        noise: args.noise,
        seed: args.seed,
    };

    let (train_x, train_y) = synthetic_images(&sim, sim.n_train_per_class, 0)?;
    let (val_x, val_y) = synthetic_images(&sim, sim.n_val_per_class, 1)?;

    write_idx_images(&dir.join(MNIST_TRAIN_IMAGES), &train_x)?;
    write_idx_labels(&dir.join(MNIST_TRAIN_LABELS), &train_y)?;
    write_idx_images(&dir.join(MNIST_TEST_IMAGES), &val_x)?;
    write_idx_labels(&dir.join(MNIST_TEST_LABELS), &val_y)?;

    info!(
        "wrote {} training and {} validation images to {}",
        train_x.dim(0)?,
        val_x.dim(0)?,
        dir.display()
    );
    Ok(())
}

#[test]
fn unwritable_output_reports_the_path() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("file");
    std::fs::write(&blocker, b"x").unwrap();
    let out = blocker.join("idx");

    let args = SimulateArgs {
        out: out.display().to_string().into_boxed_str(),
        n_classes: 2,
        n_train: 1,
        n_val: 1,
        size: 4,
        noise: 0.,
        seed: 0,
        verbose: false,
    };
    let err = simulate_dataset(&args).unwrap_err();
    let err = err.downcast_ref::<PixelCnnError>().expect("typed error");
    assert!(matches!(err, PixelCnnError::Io { action: "create", .. }));
    assert!(err.to_string().contains("idx"));
}
