//! Experiment directory bookkeeping: `params.json`, `stats.json` and
//! safetensors checkpoints. Checkpoints hold named parameter tensors
//! only; a network is rebuilt from `params.json` and the tensors are
//! loaded into it.

use crate::candle_optimizer::OptimizerKind;
use crate::candle_pixel_cnn::PixelCnnConfig;
use crate::errors::PixelCnnError;

use candle_nn::VarMap;
use log::info;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const PARAMS_FILE: &str = "params.json";
pub const STATS_FILE: &str = "stats.json";
pub const LAST_CHECKPOINT_FILE: &str = "last_checkpoint.safetensors";
pub const BEST_CHECKPOINT_FILE: &str = "best_checkpoint.safetensors";
pub const OPTIMIZER_STATE_FILE: &str = "optimizer_state.safetensors";

/// `{prefix}_{dataset}_{f}feat_{l}layers_{b}bins`
pub fn experiment_name(
    prefix: &str,
    dataset: &str,
    n_features: usize,
    n_layers: usize,
    n_bins: usize,
) -> String {
    format!(
        "{}_{}_{}feat_{}layers_{}bins",
        prefix, dataset, n_features, n_layers, n_bins
    )
}

/// Replace a leading `~` by `$HOME`
pub fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), std::env::var_os("HOME")) {
        (Ok(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => path.to_path_buf(),
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExperimentParams {
    pub dataset: String,
    pub batch_size: usize,
    pub n_features: usize,
    pub n_layers: usize,
    pub n_bins: usize,
    pub optimizer: OptimizerKind,
    pub learnrate: f64,
    pub dropout: f32,
    pub device: String,
    pub in_channels: usize,
    pub n_classes: usize,
    pub height: usize,
    pub width: usize,
    pub first_kernel: usize,
    pub hidden_kernel: usize,
    pub seed: u64,
}

impl ExperimentParams {
    pub fn network_config(&self) -> PixelCnnConfig {
        PixelCnnConfig {
            in_channels: self.in_channels,
            n_classes: self.n_classes,
            n_features: self.n_features,
            n_layers: self.n_layers,
            n_bins: self.n_bins,
            first_kernel: self.first_kernel,
            hidden_kernel: self.hidden_kernel,
            dropout: self.dropout,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EpochStats {
    pub epoch: usize,
    pub train_loss: f32,
    pub val_loss: f32,
    pub best: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingStats {
    pub epochs: Vec<EpochStats>,
}

impl TrainingStats {
    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    pub fn best_val_loss(&self) -> Option<f32> {
        self.epochs
            .iter()
            .map(|s| s.val_loss)
            .fold(None, |acc, v| match acc {
                Some(a) if a <= v => Some(a),
                _ => Some(v),
            })
    }

    pub fn best_epoch(&self) -> Option<usize> {
        self.epochs.iter().rev().find(|s| s.best).map(|s| s.epoch)
    }

    pub fn train_losses(&self) -> Vec<f32> {
        self.epochs.iter().map(|s| s.train_loss).collect()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CheckpointKind {
    Last,
    Best,
}

pub struct ExperimentStore {
    dir: PathBuf,
}

impl ExperimentStore {
    /// Create (if needed) `{base_dir}/{name}`
    pub fn open<P: AsRef<Path>>(base_dir: P, name: &str) -> anyhow::Result<Self> {
        let dir = expand_home(base_dir.as_ref()).join(name);
        Self::at(dir)
    }

    /// Use `dir` itself as the experiment directory
    pub fn at<P: AsRef<Path>>(dir: P) -> anyhow::Result<Self> {
        let dir = expand_home(dir.as_ref());
        if !dir.is_dir() {
            std::fs::create_dir_all(&dir).map_err(|e| PixelCnnError::io("create", &dir, e))?;
            info!("created experiment directory {}", dir.display());
        }
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, file: &str) -> PathBuf {
        self.dir.join(file)
    }

    pub fn checkpoint_path(&self, kind: CheckpointKind) -> PathBuf {
        match kind {
            CheckpointKind::Last => self.path(LAST_CHECKPOINT_FILE),
            CheckpointKind::Best => self.path(BEST_CHECKPOINT_FILE),
        }
    }

    pub fn optimizer_state_path(&self) -> PathBuf {
        self.path(OPTIMIZER_STATE_FILE)
    }

    /// Resuming needs params, stats and the last checkpoint together
    pub fn validate_resume(&self) -> anyhow::Result<()> {
        let missing: Vec<&str> = [PARAMS_FILE, STATS_FILE, LAST_CHECKPOINT_FILE]
            .into_iter()
            .filter(|f| !self.path(f).is_file())
            .collect();
        if !missing.is_empty() {
            return Err(PixelCnnError::config(format!(
                "missing {} in {} on resume",
                missing.join(", "),
                self.dir.display()
            ))
            .into());
        }
        Ok(())
    }

    pub fn write_params(&self, params: &ExperimentParams) -> anyhow::Result<()> {
        self.write_json(PARAMS_FILE, params)?;
        info!("Wrote parameters: {}", self.path(PARAMS_FILE).display());
        Ok(())
    }

    pub fn read_params(&self) -> anyhow::Result<ExperimentParams> {
        self.read_json(PARAMS_FILE)
    }

    /// Empty history when nothing has been written yet
    pub fn read_stats(&self) -> anyhow::Result<TrainingStats> {
        if self.path(STATS_FILE).is_file() {
            self.read_json(STATS_FILE)
        } else {
            Ok(TrainingStats::default())
        }
    }

    pub fn write_stats(&self, stats: &TrainingStats) -> anyhow::Result<()> {
        self.write_json(STATS_FILE, stats)
    }

    pub fn save_checkpoint(&self, parameters: &VarMap, kind: CheckpointKind) -> anyhow::Result<()> {
        let path = self.checkpoint_path(kind);
        let tmp = path.with_extension("tmp");
        parameters.save(&tmp)?;
        std::fs::rename(&tmp, &path).map_err(|e| PixelCnnError::io("write", &path, e))?;
        Ok(())
    }

    /// Overwrite the variables of a freshly built network
    pub fn load_checkpoint(&self, parameters: &mut VarMap, kind: CheckpointKind) -> anyhow::Result<()> {
        let path = self.checkpoint_path(kind);
        if !path.is_file() {
            return Err(PixelCnnError::config(format!("no checkpoint {}", path.display())).into());
        }
        parameters.load(&path)?;
        info!("loaded {}", path.display());
        Ok(())
    }

    fn write_json<T: Serialize>(&self, file: &str, value: &T) -> anyhow::Result<()> {
        let path = self.path(file);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(value)?)
            .map_err(|e| PixelCnnError::io("write", &tmp, e))?;
        std::fs::rename(&tmp, &path).map_err(|e| PixelCnnError::io("write", &path, e))?;
        Ok(())
    }

    fn read_json<T: for<'de> Deserialize<'de>>(&self, file: &str) -> anyhow::Result<T> {
        let path = self.path(file);
        let text = std::fs::read_to_string(&path).map_err(|e| PixelCnnError::io("read", &path, e))?;
        Ok(serde_json::from_str(&text)?)
    }
}
