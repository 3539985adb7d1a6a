use crate::common::*;

use candle_pixel::candle_core::DType;
use candle_pixel::candle_image_datasets::*;
use candle_pixel::candle_nn::{VarBuilder, VarMap};
use candle_pixel::candle_optimizer::OptimizerKind;
use candle_pixel::candle_pixel_cnn::*;
use candle_pixel::candle_sampler::*;
use candle_pixel::candle_trainer::*;
use candle_pixel::errors::PixelCnnError;
use candle_pixel::experiment_store::*;

use clap::{Args, ValueEnum};
use log::{info, warn};
use std::path::PathBuf;

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq)]
#[clap(rename_all = "lowercase")]
pub enum DatasetChoice {
    Mnist,
    Synthetic,
}

#[derive(Args, Debug)]
pub struct TrainArgs {
    #[arg(
        long,
        value_enum,
        default_value = "mnist",
        help = "Dataset",
        long_help = "Labeled image dataset.\n\
		     `mnist` reads the four IDX files (plain or .gz) in `--data-dir`;\n\
		     `synthetic` draws noisy stripe images in memory."
    )]
    dataset: DatasetChoice,

    #[arg(
        long,
        default_value = "~/data/mnist",
        help = "Directory of the MNIST IDX files"
    )]
    data_dir: Box<str>,

    #[arg(
        long,
        default_value = "~/experiments/conditional-pixelcnn/",
        help = "Base directory of experiments",
        long_help = "Base directory of experiments.\n\
		     Results go to {exp_dir}/{exp_name}_{dataset}_{f}feat_{l}layers_{b}bins/:\n\
		     - params.json\n\
		     - stats.json\n\
		     - last_checkpoint.safetensors\n\
		     - best_checkpoint.safetensors\n\
		     - {a}-{b}.jpeg for each class pair"
    )]
    exp_dir: Box<str>,

    #[arg(long, default_value = "pixelCNN", help = "Experiment name prefix")]
    exp_name: Box<str>,

    #[arg(long, short, default_value_t = 64, help = "Minibatch size")]
    batch_size: usize,

    #[arg(
        long,
        default_value_t = 200,
        help = "Feature maps per hidden layer"
    )]
    n_features: usize,

    #[arg(long, default_value_t = 6, help = "Number of masked convolution layers")]
    n_layers: usize,

    #[arg(
        long,
        default_value_t = 4,
        help = "Intensity bins",
        long_help = "Number of intensity bins.\n\
		     Pixel values in [0, 1] are rounded to k / (bins - 1)."
    )]
    n_bins: usize,

    #[arg(long, value_enum, default_value = "adam", help = "Optimizer")]
    optimizer: OptimizerKind,

    #[arg(long, default_value_t = 1e-4, help = "Learning rate")]
    learning_rate: f64,

    #[arg(
        long,
        default_value_t = 0.5,
        help = "Dropout probability",
        long_help = "Probability of zeroing a hidden activation between layers.\n\
		     Only active while training."
    )]
    dropout: f32,

    #[arg(
        long,
        short = 'i',
        default_value_t = 50,
        help = "Total number of training epochs",
        long_help = "Total number of training epochs.\n\
		     A resumed run continues until this many epochs are recorded."
    )]
    epochs: usize,

    #[arg(long, default_value_t = 42, help = "Random seed")]
    seed: u64,

    #[arg(
        long,
        default_value_t = false,
        help = "Resume training",
        long_help = "Resume training from {exp}/last_checkpoint.safetensors.\n\
		     params.json, stats.json and the checkpoint must all exist;\n\
		     the stored hyper-parameters take precedence."
    )]
    resume: bool,

    #[arg(
        long,
        value_delimiter(','),
        value_parser = parse_class_pair,
        default_value = "1-7,3-8,4-9,5-6",
        help = "Class pairs for between-class generation"
    )]
    pairs: Vec<(usize, usize)>,

    #[arg(
        long,
        default_value_t = DEFAULT_INTERPOLATION_STEPS,
        help = "Images per between-class strip"
    )]
    n_steps: usize,

    #[arg(
        long,
        default_value_t = 2,
        help = "Classes of the synthetic dataset"
    )]
    synthetic_classes: usize,

    #[arg(
        long,
        default_value_t = 16,
        help = "Height and width of synthetic images"
    )]
    synthetic_size: usize,

    #[arg(
        long,
        default_value_t = 256,
        help = "Training images per class of the synthetic dataset"
    )]
    synthetic_train: usize,

    #[arg(
        long,
        value_enum,
        default_value = "cpu",
        help = "Candle device",
        long_help = "Choose compute device for candle training.\n\
		     Options: cpu, cuda, metal."
    )]
    device: ComputeDevice,

    #[arg(
        long,
        default_value_t = 0,
        help = "A device for cuda",
        long_help = "For cuda or metal, we may want to choose a different device."
    )]
    device_no: usize,

    #[arg(long, default_value_t = false, help = "Hide the progress bar")]
    no_progress: bool,

    #[arg(
        long,
        short,
        help = "Verbosity",
        long_help = "Enable verbose output.\n\
		     Logs the training and validation loss of every epoch."
    )]
    verbose: bool,
}

impl TrainArgs {
    fn dataset_kind(&self, seed: u64) -> DatasetKind {
        match self.dataset {
            DatasetChoice::Mnist => DatasetKind::Mnist {
                dir: expand_home(std::path::Path::new(&*self.data_dir)),
            },
            DatasetChoice::Synthetic => DatasetKind::Synthetic(SyntheticArgs {
                n_classes: self.synthetic_classes,
                n_train_per_class: self.synthetic_train,
                n_val_per_class: (self.synthetic_train / 8).max(1),
                height: self.synthetic_size,
                width: self.synthetic_size,
                seed,
                ..Default::default()
            }),
        }
    }
}

pub fn train_pixel_cnn(args: &TrainArgs) -> anyhow::Result<()> {
    init_logging(args.verbose);

    // 1. Experiment directory
    let dataset_name = match args.dataset {
        DatasetChoice::Mnist => "mnist",
        DatasetChoice::Synthetic => "synthetic",
    };
    let name = experiment_name(
        &args.exp_name,
        dataset_name,
        args.n_features,
        args.n_layers,
        args.n_bins,
    );
    let store = ExperimentStore::open(PathBuf::from(&*args.exp_dir), &name)?;

    if args.resume {
        store.validate_resume()?;
    }

    // 2. Data
    let mut data = load_dataset(&args.dataset_kind(args.seed))?;
    let (in_channels, height, width) = data.image_shape;

    // 3. Hyper-parameters, stored ones win on resume
    let params = if args.resume {
        let stored = store.read_params()?;
        if stored.n_classes != data.n_classes
            || (stored.in_channels, stored.height, stored.width) != data.image_shape
        {
            return Err(PixelCnnError::config(format!(
                "{} does not match the {} dataset",
                store.path(PARAMS_FILE).display(),
                dataset_name
            ))
            .into());
        }
        stored
    } else {
        let params = ExperimentParams {
            dataset: dataset_name.to_string(),
            batch_size: args.batch_size,
            n_features: args.n_features,
            n_layers: args.n_layers,
            n_bins: args.n_bins,
            optimizer: args.optimizer,
            learnrate: args.learning_rate,
            dropout: args.dropout,
            device: args.device.name().to_string(),
            in_channels,
            n_classes: data.n_classes,
            height,
            width,
            first_kernel: DEFAULT_FIRST_KERNEL,
            hidden_kernel: DEFAULT_HIDDEN_KERNEL,
            seed: args.seed,
        };
        store.write_params(&params)?;
        params
    };

    // 4. Network
    let dev = args.device.device(args.device_no)?;
    let mut parameters = VarMap::new();
    let param_builder = VarBuilder::from_varmap(&parameters, DType::F32, &dev);
    let net = PixelCnn::new(&params.network_config(), param_builder)?;
    PixelCnn::seed_parameters(&parameters, params.seed)?;

    info!(
        "PixelCNN: {} layers x {} features, {} bins, {} classes, {} parameter tensors",
        params.n_layers,
        params.n_features,
        params.n_bins,
        params.n_classes,
        parameters.all_vars().len()
    );

    // 5. Training
    let train_config = TrainConfig {
        learning_rate: params.learnrate,
        batch_size: params.batch_size,
        num_epochs: args.epochs,
        optimizer: params.optimizer,
        device: dev.clone(),
        seed: params.seed,
        show_progress: !args.no_progress,
        verbose: args.verbose,
    };

    let stats = fit(
        &net,
        &mut parameters,
        &mut data.train,
        &mut data.validation,
        &store,
        &train_config,
        args.resume,
    )?;

    if let (Some(epoch), Some(loss)) = (stats.best_epoch(), stats.best_val_loss()) {
        info!("best validation loss {:.5} at epoch {}", loss, epoch);
    }

    // 6. Between-class strips from the final network
    let options = BetweenClassOptions {
        n_steps: args.n_steps,
        decoding: PixelDecoding::Argmax,
        device: dev,
    };
    for &pair in args.pairs.iter() {
        if pair.0 >= params.n_classes || pair.1 >= params.n_classes {
            warn!(
                "skipping pair {}-{}: only {} classes",
                pair.0, pair.1, params.n_classes
            );
            continue;
        }
        let path = store.path(&strip_file_name(pair, "jpeg"));
        generate_between_classes(
            &net,
            (params.height, params.width),
            pair,
            &path,
            params.n_classes,
            &options,
        )?;
    }

    Ok(())
}
