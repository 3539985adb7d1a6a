//! Labeled image datasets delivered as normalised in-memory tensors.
//!
//! MNIST comes from the usual IDX files (optionally gzipped); the
//! synthetic set draws seeded per-class stripe patterns for smoke runs
//! and tests.

use crate::candle_data_loader::InMemoryImageData;
use crate::errors::PixelCnnError;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use candle_core::{DType, Device, Tensor};
use flate2::read::GzDecoder;
use log::info;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

const IDX_LABEL_MAGIC: u32 = 2049;
const IDX_IMAGE_MAGIC: u32 = 2051;

pub const MNIST_TRAIN_IMAGES: &str = "train-images-idx3-ubyte";
pub const MNIST_TRAIN_LABELS: &str = "train-labels-idx1-ubyte";
pub const MNIST_TEST_IMAGES: &str = "t10k-images-idx3-ubyte";
pub const MNIST_TEST_LABELS: &str = "t10k-labels-idx1-ubyte";

#[derive(Clone, Debug)]
pub struct SyntheticArgs {
    pub n_classes: usize,
    pub n_train_per_class: usize,
    pub n_val_per_class: usize,
    pub height: usize,
    pub width: usize,
    pub noise: f32,
    pub seed: u64,
}

impl Default for SyntheticArgs {
    fn default() -> Self {
        Self {
            n_classes: 2,
            n_train_per_class: 32,
            n_val_per_class: 8,
            height: 8,
            width: 8,
            noise: 0.05,
            seed: 42,
        }
    }
}

#[derive(Clone, Debug)]
pub enum DatasetKind {
    /// directory holding the four IDX files
    Mnist { dir: PathBuf },
    Synthetic(SyntheticArgs),
}

impl DatasetKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Mnist { .. } => "mnist",
            Self::Synthetic(_) => "synthetic",
        }
    }
}

pub struct ImageDataset {
    pub train: InMemoryImageData,
    pub validation: InMemoryImageData,
    pub n_classes: usize,
    /// `(channels, height, width)`
    pub image_shape: (usize, usize, usize),
}

/// Load the training and validation splits of `kind`
pub fn load_dataset(kind: &DatasetKind) -> anyhow::Result<ImageDataset> {
    let (train_x, train_y, val_x, val_y, n_classes) = match kind {
        DatasetKind::Mnist { dir } => {
            let train_x = read_idx_images(&idx_path(dir, MNIST_TRAIN_IMAGES)?)?;
            let train_y = read_idx_labels(&idx_path(dir, MNIST_TRAIN_LABELS)?)?;
            let val_x = read_idx_images(&idx_path(dir, MNIST_TEST_IMAGES)?)?;
            let val_y = read_idx_labels(&idx_path(dir, MNIST_TEST_LABELS)?)?;
            (train_x, train_y, val_x, val_y, 10)
        }
        DatasetKind::Synthetic(args) => {
            let (train_x, train_y) = synthetic_images(args, args.n_train_per_class, 0)?;
            let (val_x, val_y) = synthetic_images(args, args.n_val_per_class, 1)?;
            (train_x, train_y, val_x, val_y, args.n_classes)
        }
    };

    let train = InMemoryImageData::new(&train_x, &train_y)?;
    let validation = InMemoryImageData::new(&val_x, &val_y)?;
    let image_shape = crate::candle_data_loader::ImageDataLoader::image_shape(&train);

    info!(
        "{}: {} training, {} validation images of {:?}, {} classes",
        kind.name(),
        train_x.dim(0)?,
        val_x.dim(0)?,
        image_shape,
        n_classes
    );

    Ok(ImageDataset {
        train,
        validation,
        n_classes,
        image_shape,
    })
}

/// `[b]` class indexes to a dense `[b, n_classes]` one-hot matrix
///
/// `candle_nn::encoding::one_hot` changed its signature within 0.9, so
/// the matrix is built from `broadcast_eq` against the class range.
pub fn one_hot(labels: &Tensor, n_classes: usize, device: &Device) -> anyhow::Result<Tensor> {
    let labels_b = labels.flatten_all()?.to_dtype(DType::U32)?.to_device(device)?;
    if labels_b.dim(0)? > 0 {
        let k_max = labels_b.max(0)?.to_scalar::<u32>()? as usize;
        if k_max >= n_classes {
            return Err(PixelCnnError::config(format!(
                "class label {} out of range for {} classes",
                k_max, n_classes
            ))
            .into());
        }
    }
    let classes_1k = Tensor::arange(0u32, n_classes as u32, device)?.unsqueeze(0)?;
    Ok(labels_b
        .unsqueeze(1)?
        .broadcast_eq(&classes_1k)?
        .to_dtype(DType::F32)?)
}

////////////////////
// synthetic data //
////////////////////

/// Value of pixel `(r, c)` in the clean pattern of class `k`
///
/// Even classes are horizontal stripes, odd classes vertical ones; the
/// stripe width grows with `k / 2` so every class differs.
fn class_pattern(k: usize, r: usize, c: usize) -> f32 {
    let stripe = 1 + k / 2;
    let coord = if k % 2 == 0 { r } else { c };
    if (coord / stripe) % 2 == 0 {
        1.
    } else {
        0.
    }
}

/// Draw `n_per_class` noisy images of every class
///
/// * `split` - mixes into the seed so train and validation differ
pub fn synthetic_images(
    args: &SyntheticArgs,
    n_per_class: usize,
    split: u64,
) -> anyhow::Result<(Tensor, Tensor)> {
    if args.n_classes == 0 || args.height == 0 || args.width == 0 {
        return Err(PixelCnnError::config("synthetic dataset needs positive dimensions").into());
    }
    let (h, w) = (args.height, args.width);
    let ntot = args.n_classes * n_per_class;

    let samples: Vec<(Vec<f32>, u32)> = (0..ntot)
        .into_par_iter()
        .map(|i| {
            let k = i % args.n_classes;
            let mut rng = StdRng::seed_from_u64(
                args.seed
                    .wrapping_mul(1_000_003)
                    .wrapping_add(split.wrapping_mul(7_919))
                    .wrapping_add(i as u64),
            );
            let shift = rng.random_range(0..2);
            let pixels = (0..h * w)
                .map(|j| {
                    let (r, c) = (j / w, j % w);
                    let x = class_pattern(k, r + shift, c + shift);
                    if rng.random::<f32>() < args.noise {
                        1. - x
                    } else {
                        x
                    }
                })
                .collect();
            (pixels, k as u32)
        })
        .collect();

    let labels: Vec<u32> = samples.iter().map(|(_, k)| *k).collect();
    let pixels: Vec<f32> = samples.into_iter().flat_map(|(x, _)| x).collect();

    Ok((
        Tensor::from_vec(pixels, (ntot, 1, h, w), &Device::Cpu)?,
        Tensor::from_vec(labels, ntot, &Device::Cpu)?,
    ))
}

//////////////////
// IDX file I/O //
//////////////////

/// `{dir}/{name}` or `{dir}/{name}.gz`, whichever exists
fn idx_path(dir: &Path, name: &str) -> anyhow::Result<PathBuf> {
    let plain = dir.join(name);
    if plain.is_file() {
        return Ok(plain);
    }
    let gz = dir.join(format!("{}.gz", name));
    if gz.is_file() {
        return Ok(gz);
    }
    Err(PixelCnnError::config(format!("missing {} in {}", name, dir.display())).into())
}

fn open_idx(path: &Path) -> anyhow::Result<Box<dyn Read>> {
    let file = File::open(path).map_err(|e| PixelCnnError::io("open", path, e))?;
    let reader = BufReader::new(file);
    if path.extension().and_then(|x| x.to_str()) == Some("gz") {
        Ok(Box::new(GzDecoder::new(reader)))
    } else {
        Ok(Box::new(reader))
    }
}

fn check_magic_number<T: Read>(reader: &mut T, expected: u32, path: &Path) -> anyhow::Result<()> {
    let magic_number = reader.read_u32::<BigEndian>()?;
    if magic_number != expected {
        return Err(PixelCnnError::config(format!(
            "incorrect magic number {} != {} in {}",
            magic_number,
            expected,
            path.display()
        ))
        .into());
    }
    Ok(())
}

/// `[n]` u32 labels
pub fn read_idx_labels(path: &Path) -> anyhow::Result<Tensor> {
    let mut reader = open_idx(path)?;
    check_magic_number(&mut reader, IDX_LABEL_MAGIC, path)?;
    let samples = reader.read_u32::<BigEndian>()? as usize;
    let mut data = vec![0u8; samples];
    reader.read_exact(&mut data)?;
    Ok(Tensor::from_vec(data, samples, &Device::Cpu)?.to_dtype(DType::U32)?)
}

/// `[n, 1, rows, cols]` f32 images in [0, 1]
pub fn read_idx_images(path: &Path) -> anyhow::Result<Tensor> {
    let mut reader = open_idx(path)?;
    check_magic_number(&mut reader, IDX_IMAGE_MAGIC, path)?;
    let samples = reader.read_u32::<BigEndian>()? as usize;
    let rows = reader.read_u32::<BigEndian>()? as usize;
    let cols = reader.read_u32::<BigEndian>()? as usize;
    let mut data = vec![0u8; samples * rows * cols];
    reader.read_exact(&mut data)?;
    let images = Tensor::from_vec(data, (samples, 1, rows, cols), &Device::Cpu)?;
    Ok((images.to_dtype(DType::F32)? / 255.)?)
}

/// Write `[n]` labels in the IDX label format
pub fn write_idx_labels(path: &Path, labels: &Tensor) -> anyhow::Result<()> {
    let labels = labels.flatten_all()?.to_dtype(DType::U32)?.to_vec1::<u32>()?;
    let file = File::create(path).map_err(|e| PixelCnnError::io("create", path, e))?;
    let mut writer = BufWriter::new(file);
    writer.write_u32::<BigEndian>(IDX_LABEL_MAGIC)?;
    writer.write_u32::<BigEndian>(labels.len() as u32)?;
    let bytes: Vec<u8> = labels.iter().map(|&k| k.min(255) as u8).collect();
    writer.write_all(&bytes)?;
    writer.flush()?;
    Ok(())
}

/// Write `[n, 1, rows, cols]` images in [0, 1] in the IDX image format
pub fn write_idx_images(path: &Path, images: &Tensor) -> anyhow::Result<()> {
    let (n, c, rows, cols) = images.dims4()?;
    if c != 1 {
        return Err(PixelCnnError::config(format!("IDX images are single channel, got {}", c)).into());
    }
    let pixels = images.flatten_all()?.to_vec1::<f32>()?;
    let file = File::create(path).map_err(|e| PixelCnnError::io("create", path, e))?;
    let mut writer = BufWriter::new(file);
    writer.write_u32::<BigEndian>(IDX_IMAGE_MAGIC)?;
    for d in [n, rows, cols] {
        writer.write_u32::<BigEndian>(d as u32)?;
    }
    let bytes: Vec<u8> = pixels
        .iter()
        .map(|&x| (x.clamp(0., 1.) * 255.).round() as u8)
        .collect();
    writer.write_all(&bytes)?;
    writer.flush()?;
    Ok(())
}
