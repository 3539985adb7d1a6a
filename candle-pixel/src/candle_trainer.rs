use crate::candle_data_loader::ImageDataLoader;
use crate::candle_discretize::Discretizer;
use crate::candle_exec_context::ExecContext;
use crate::candle_image_datasets::one_hot;
use crate::candle_loss_functions::discretized_nll;
use crate::candle_model_traits::AutoregressiveModuleT;
use crate::candle_optimizer::{OptimizerKind, TrainOptimizer};
use crate::errors::PixelCnnError;
use crate::experiment_store::*;

use candle_core::Device;
use candle_nn::VarMap;
use indicatif::{ProgressBar, ProgressDrawTarget};
use log::info;
use rand::rngs::StdRng;
use rand::SeedableRng;

pub struct TrainConfig {
    pub learning_rate: f64,
    pub batch_size: usize,
    /// total number of epochs, counting those of a resumed run
    pub num_epochs: usize,
    pub optimizer: OptimizerKind,
    pub device: Device,
    pub seed: u64,
    pub show_progress: bool,
    pub verbose: bool,
}

/// Seeds for the shuffling and dropout of one epoch; tied to the epoch
/// number so a resumed run draws what an uninterrupted one would have
fn epoch_seeds(seed: u64, epoch: usize) -> (u64, u64) {
    let base = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15).wrapping_add(epoch as u64);
    (base, base ^ 0xD1B5_4A32_D192_ED03)
}

fn check_finite(stage: &'static str, epoch: usize, value: f32) -> anyhow::Result<f32> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(PixelCnnError::NonFinite {
            stage,
            epoch,
            value,
        }
        .into())
    }
}

/// Mean discretised NLL over all of `data` in evaluation mode
///
/// * `model` - network to evaluate
/// * `data` - batches are taken in order
/// * `batch_size` - minibatch size
/// * `device` - where the forward passes run
pub fn evaluate<M, DataL>(
    model: &M,
    data: &mut DataL,
    batch_size: usize,
    device: &Device,
) -> anyhow::Result<f32>
where
    M: AutoregressiveModuleT,
    DataL: ImageDataLoader,
{
    let discretizer = Discretizer::new(model.num_bins())?;
    let ctx = ExecContext::eval(device);

    data.ordered_minibatch(batch_size)?;

    let mut loss_tot = 0f64;
    let mut ntot = 0usize;
    for b in 0..data.num_minibatch() {
        let mb = data.minibatch_data(b, device)?;
        let nb = mb.images.dim(0)?;
        let class_bk = one_hot(&mb.labels, model.dim_classes(), device)?;
        let labels = discretizer.encode(&mb.images)?;
        let log_prob = model.forward_t(&mb.images, &class_bk, &ctx)?;
        let loss = discretized_nll(&log_prob, &labels)?.to_scalar::<f32>()?;
        loss_tot += loss as f64 * nb as f64;
        ntot += nb;
    }

    if ntot == 0 {
        return Err(PixelCnnError::config("validation set is empty").into());
    }
    Ok((loss_tot / ntot as f64) as f32)
}

/// Train `model` and keep the experiment record in `store` current
///
/// * `model` - network whose variables live in `parameters`
/// * `parameters` - variable map; overwritten from the last checkpoint on resume
/// * `train_data` - shuffled every epoch
/// * `val_data` - evaluated after every epoch
/// * `store` - where checkpoints and stats go
/// * `config` - training configuration
/// * `resume` - continue from the epoch recorded in `stats.json`
///
/// Returns the full statistics history.
pub fn fit<M, TrainD, ValD>(
    model: &M,
    parameters: &mut VarMap,
    train_data: &mut TrainD,
    val_data: &mut ValD,
    store: &ExperimentStore,
    config: &TrainConfig,
    resume: bool,
) -> anyhow::Result<TrainingStats>
where
    M: AutoregressiveModuleT,
    TrainD: ImageDataLoader,
    ValD: ImageDataLoader,
{
    let device = &config.device;
    let discretizer = Discretizer::new(model.num_bins())?;

    if config.batch_size == 0 {
        return Err(PixelCnnError::config("batch size must be positive").into());
    }

    let mut stats = if resume {
        store.validate_resume()?;
        store.load_checkpoint(parameters, CheckpointKind::Last)?;
        store.read_stats()?
    } else {
        TrainingStats::default()
    };

    let mut optimizer = TrainOptimizer::new(config.optimizer, parameters, config.learning_rate)?;
    if resume && store.optimizer_state_path().is_file() {
        optimizer.load_state(store.optimizer_state_path())?;
        info!("restored optimizer state");
    }

    let start_epoch = stats.len();
    if start_epoch > 0 {
        info!("resuming at epoch {}", start_epoch + 1);
    }

    let pb = ProgressBar::new(config.num_epochs.saturating_sub(start_epoch) as u64);

    if !config.show_progress || config.verbose {
        pb.set_draw_target(ProgressDrawTarget::hidden());
    }

    for epoch in start_epoch..config.num_epochs {
        let (shuffle_seed, dropout_seed) = epoch_seeds(config.seed, epoch);
        let mut rng = StdRng::seed_from_u64(shuffle_seed);
        let ctx = ExecContext::train(device, dropout_seed);

        train_data.shuffle_minibatch(config.batch_size, &mut rng)?;

        let mut loss_tot = 0f64;
        let mut ntot = 0usize;

        for b in 0..train_data.num_minibatch() {
            let mb = train_data.minibatch_data(b, device)?;
            let nb = mb.images.dim(0)?;
            let class_bk = one_hot(&mb.labels, model.dim_classes(), device)?;
            let labels = discretizer.encode(&mb.images)?;

            let log_prob = model.forward_t(&mb.images, &class_bk, &ctx)?;
            let loss = discretized_nll(&log_prob, &labels)?;
            let loss_val = check_finite("training", epoch, loss.to_scalar::<f32>()?)?;

            optimizer.backward_step(&loss)?;

            loss_tot += loss_val as f64 * nb as f64;
            ntot += nb;
        }

        if ntot == 0 {
            return Err(PixelCnnError::config("training set is empty").into());
        }

        let train_loss = check_finite("training", epoch, (loss_tot / ntot as f64) as f32)?;
        let val_loss = check_finite(
            "validation",
            epoch,
            evaluate(model, val_data, config.batch_size, device)?,
        )?;

        let best = stats.best_val_loss().map_or(true, |b| val_loss < b);

        store.save_checkpoint(parameters, CheckpointKind::Last)?;
        optimizer.save_state(store.optimizer_state_path())?;
        if best {
            store.save_checkpoint(parameters, CheckpointKind::Best)?;
        }

        stats.epochs.push(EpochStats {
            epoch: epoch + 1,
            train_loss,
            val_loss,
            best,
        });
        store.write_stats(&stats)?;

        pb.inc(1);

        if config.verbose {
            info!(
                "[{}] train: {:.5} val: {:.5}{}",
                epoch + 1,
                train_loss,
                val_loss,
                if best { " (best)" } else { "" }
            );
        }
    } // each epoch

    pb.finish_and_clear();
    info!("done model training");
    Ok(stats)
}

#[test]
fn epoch_seeds_differ_by_epoch() {
    assert_ne!(epoch_seeds(1, 0), epoch_seeds(1, 1));
    assert_eq!(epoch_seeds(7, 3), epoch_seeds(7, 3));
}
