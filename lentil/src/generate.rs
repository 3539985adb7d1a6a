use crate::common::*;

use candle_pixel::candle_core::DType;
use candle_pixel::candle_nn::{VarBuilder, VarMap};
use candle_pixel::candle_pixel_cnn::PixelCnn;
use candle_pixel::candle_sampler::*;
use candle_pixel::experiment_store::*;

use clap::Args;
use log::info;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct GenerateArgs {
    #[arg(
        help = "Experiment directory",
        long_help = "Experiment directory written by `lentil train`.\n\
		     Needs params.json and a checkpoint."
    )]
    exp: Box<str>,

    #[arg(
        long,
        short,
        value_delimiter(','),
        value_parser = parse_class_pair,
        required = true,
        help = "Class pairs, e.g. 1-7,3-8"
    )]
    pairs: Vec<(usize, usize)>,

    #[arg(
        long,
        default_value_t = DEFAULT_INTERPOLATION_STEPS,
        help = "Images per strip"
    )]
    n_steps: usize,

    #[arg(long, default_value_t = false, help = "Use the last checkpoint, not the best")]
    last: bool,

    #[arg(
        long,
        help = "Sampling temperature",
        long_help = "Draw every pixel from the predicted bin distribution\n\
		     sharpened by this temperature.\n\
		     Without it, the most probable bin is taken."
    )]
    temperature: Option<f32>,

    #[arg(long, default_value_t = 42, help = "Random seed for sampling")]
    seed: u64,

    #[arg(long, default_value = "jpeg", help = "Image file extension")]
    ext: Box<str>,

    #[arg(
        long,
        short,
        help = "Output directory",
        long_help = "Output directory for the strips {a}-{b}.{ext}.\n\
		     Defaults to the experiment directory."
    )]
    out: Option<Box<str>>,

    #[arg(
        long,
        value_enum,
        help = "Candle device",
        long_help = "Compute device for sampling.\n\
		     Defaults to the device recorded in params.json."
    )]
    device: Option<ComputeDevice>,

    #[arg(long, default_value_t = 0, help = "A device for cuda or metal")]
    device_no: usize,

    #[arg(long, short, help = "Verbosity")]
    verbose: bool,
}

pub fn generate_strips(args: &GenerateArgs) -> anyhow::Result<()> {
    init_logging(args.verbose);

    let store = ExperimentStore::at(PathBuf::from(&*args.exp))?;
    let params = store.read_params()?;

    let device = match args.device {
        Some(d) => d,
        None => ComputeDevice::from_name(&params.device)?,
    };
    let dev = device.device(args.device_no)?;

    let mut parameters = VarMap::new();
    let param_builder = VarBuilder::from_varmap(&parameters, DType::F32, &dev);
    let net = PixelCnn::new(&params.network_config(), param_builder)?;

    let kind = if args.last {
        CheckpointKind::Last
    } else {
        CheckpointKind::Best
    };
    store.load_checkpoint(&mut parameters, kind)?;

    let decoding = match args.temperature {
        Some(temperature) => PixelDecoding::Sample {
            temperature,
            seed: args.seed,
        },
        None => PixelDecoding::Argmax,
    };
    let options = BetweenClassOptions {
        n_steps: args.n_steps,
        decoding,
        device: dev,
    };

    let out_dir = match &args.out {
        Some(out) => ExperimentStore::at(PathBuf::from(&**out))?,
        None => store,
    };

    for &pair in args.pairs.iter() {
        let path = out_dir.path(&strip_file_name(pair, &args.ext));
        generate_between_classes(
            &net,
            (params.height, params.width),
            pair,
            &path,
            params.n_classes,
            &options,
        )?;
    }
    info!("wrote {} strips to {}", args.pairs.len(), out_dir.dir().display());
    Ok(())
}
