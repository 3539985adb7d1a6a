use candle_pixel::candle_core::Device;
use candle_pixel::errors::PixelCnnError;

use clap::ValueEnum;

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq)]
#[clap(rename_all = "lowercase")]
pub enum ComputeDevice {
    Cpu,
    Cuda,
    Metal,
}

impl ComputeDevice {
    pub fn name(&self) -> &'static str {
        match self {
            ComputeDevice::Cpu => "cpu",
            ComputeDevice::Cuda => "cuda",
            ComputeDevice::Metal => "metal",
        }
    }

    pub fn from_name(name: &str) -> anyhow::Result<Self> {
        ComputeDevice::from_str(name, true)
            .map_err(|_| PixelCnnError::config(format!("unknown device {}", name)).into())
    }

    pub fn device(&self, device_no: usize) -> anyhow::Result<Device> {
        Ok(match self {
            ComputeDevice::Metal => Device::new_metal(device_no)?,
            ComputeDevice::Cuda => Device::new_cuda(device_no)?,
            _ => Device::Cpu,
        })
    }
}

/// Parse `a-b` into a class pair
pub fn parse_class_pair(s: &str) -> Result<(usize, usize), String> {
    let (a, b) = s
        .split_once('-')
        .ok_or_else(|| format!("expected a class pair like 1-7, got {}", s))?;
    let a = a.trim().parse::<usize>().map_err(|e| e.to_string())?;
    let b = b.trim().parse::<usize>().map_err(|e| e.to_string())?;
    Ok((a, b))
}

pub fn strip_file_name(pair: (usize, usize), ext: &str) -> String {
    format!("{}-{}.{}", pair.0, pair.1, ext)
}

pub fn init_logging(verbose: bool) {
    if verbose {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();
}

#[test]
fn class_pairs_parse() {
    assert_eq!(parse_class_pair("1-7"), Ok((1, 7)));
    assert_eq!(parse_class_pair(" 3 - 8"), Ok((3, 8)));
    assert!(parse_class_pair("3").is_err());
    assert!(parse_class_pair("a-1").is_err());
    assert_eq!(strip_file_name((4, 9), "jpeg"), "4-9.jpeg");
}
