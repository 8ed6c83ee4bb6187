//! Candle device selection.

use crate::core::errors::{OCRError, OcrResult};
use candle_core::Device;

/// Parses a device string and creates a candle [`Device`].
///
/// # Supported formats
///
/// - `"cpu"` -> CPU device
/// - `"cuda"` or `"gpu"` -> CUDA device 0
/// - `"cuda:N"` -> CUDA device N
pub fn parse_device(device_str: &str) -> OcrResult<Device> {
    let device_str = device_str.trim().to_lowercase();
    match device_str.as_str() {
        "cpu" => Ok(Device::Cpu),
        "cuda" | "gpu" => cuda_device(0),
        s if s.starts_with("cuda:") => {
            let ordinal: usize = s["cuda:".len()..].parse().map_err(|_| {
                OCRError::config_error(format!("invalid CUDA device ordinal in '{}'", s))
            })?;
            cuda_device(ordinal)
        }
        _ => Err(OCRError::config_error(format!(
            "unknown device: {}. Use 'cpu', 'cuda', or 'cuda:N'",
            device_str
        ))),
    }
}

#[cfg(feature = "cuda")]
fn cuda_device(ordinal: usize) -> OcrResult<Device> {
    Device::new_cuda(ordinal).map_err(|e| {
        OCRError::config_error(format!("cannot open CUDA device {}: {}", ordinal, e))
    })
}

#[cfg(not(feature = "cuda"))]
fn cuda_device(_ordinal: usize) -> OcrResult<Device> {
    Err(OCRError::config_error(
        "CUDA support not enabled. Compile with --features cuda",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cpu() {
        assert!(matches!(parse_device("CPU"), Ok(Device::Cpu)));
    }

    #[test]
    fn test_parse_unknown() {
        assert!(parse_device("tpu").is_err());
    }

    #[cfg(not(feature = "cuda"))]
    #[test]
    fn test_cuda_requires_feature() {
        assert!(parse_device("cuda:1").is_err());
    }
}
