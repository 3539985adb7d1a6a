use crate::errors::PixelCnnError;

use anyhow::Context;
use candle_core::Tensor;
use image::{DynamicImage, GrayImage, RgbImage};
use std::path::Path;

/// Lay `[n, c, h, w]` images in [0, 1] side by side into one
/// `(n * w) x h` raster; `c` must be 1 (gray) or 3 (rgb)
pub fn compose_strip(images_nchw: &Tensor) -> anyhow::Result<DynamicImage> {
    let (n, c, h, w) = images_nchw.dims4()?;
    let pixels = images_nchw
        .to_device(&candle_core::Device::Cpu)?
        .flatten_all()?
        .to_vec1::<f32>()?;

    let strip_w = n * w;
    let mut data = vec![0u8; strip_w * h * c];
    for i in 0..n {
        for ch in 0..c {
            for r in 0..h {
                for col in 0..w {
                    let x = pixels[((i * c + ch) * h + r) * w + col];
                    let dst = (r * strip_w + i * w + col) * c + ch;
                    data[dst] = (x.clamp(0., 1.) * 255.).round() as u8;
                }
            }
        }
    }

    let (sw, sh) = (strip_w as u32, h as u32);
    match c {
        1 => GrayImage::from_raw(sw, sh, data)
            .map(DynamicImage::ImageLuma8)
            .ok_or_else(|| anyhow::anyhow!("failed to create GrayImage")),
        3 => RgbImage::from_raw(sw, sh, data)
            .map(DynamicImage::ImageRgb8)
            .ok_or_else(|| anyhow::anyhow!("failed to create RgbImage")),
        _ => Err(PixelCnnError::config(format!(
            "can only write 1 or 3 channel images, got {}",
            c
        ))
        .into()),
    }
}

/// Write the strip of `images_nchw`; the format follows the extension
pub fn save_strip(images_nchw: &Tensor, path: &Path) -> anyhow::Result<()> {
    let img = compose_strip(images_nchw)?;
    img.save(path)
        .with_context(|| format!("failed to save {}", path.display()))?;
    Ok(())
}
