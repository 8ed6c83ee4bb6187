//! Checkpoint restoration.
//!
//! A checkpoint is a safetensors file of parameter name → tensor. Restoring
//! is a filter-and-merge over that mapping: parameters of the lazily shaped
//! layer are filtered out by [`is_lazy_parameter`], every remaining name that
//! matches a model parameter of the same shape is copied in, and everything
//! else is reported. A missing or unreadable checkpoint leaves the model with
//! its random initialization.

use super::crnn::GlyphCrnn;
use crate::core::constants::LAZY_LAYER_PREFIX;
use crate::core::errors::{OCRError, OcrResult, ProcessingStage, SimpleError, candle_to_ocr_processing};
use candle_core::{Device, Tensor};
use candle_nn::VarMap;
use std::collections::HashMap;
use std::path::Path;

/// Prefix some training wrappers add to every parameter name.
const DATA_PARALLEL_PREFIX: &str = "module.";

/// Returns true if `name` belongs to the lazily shaped recurrent layer.
///
/// Such parameters are never restored: the layer does not exist when the
/// checkpoint is loaded and may later bind to a different input size.
pub fn is_lazy_parameter(name: &str) -> bool {
    name.strip_prefix(LAZY_LAYER_PREFIX)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('.'))
}

/// What a merge did with each checkpoint entry and model parameter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckpointReport {
    /// Copied into the model.
    pub restored: Vec<String>,
    /// Belonging to the lazily shaped layer.
    pub skipped_lazy: Vec<String>,
    /// Present in both, with incompatible shapes.
    pub shape_mismatch: Vec<String>,
    /// Present in the checkpoint only.
    pub unexpected: Vec<String>,
    /// Model parameters the checkpoint did not provide.
    pub missing: Vec<String>,
}

impl CheckpointReport {
    fn sort(&mut self) {
        self.restored.sort();
        self.skipped_lazy.sort();
        self.shape_mismatch.sort();
        self.unexpected.sort();
        self.missing.sort();
    }
}

/// Merges `checkpoint` into the parameters of `params`.
pub fn merge_checkpoint(
    params: &VarMap,
    checkpoint: HashMap<String, Tensor>,
) -> OcrResult<CheckpointReport> {
    let data = params.data().lock().map_err(|_| {
        OCRError::processing_error(
            ProcessingStage::Checkpoint,
            "lock parameter store",
            SimpleError::new("lock poisoned"),
        )
    })?;

    let mut report = CheckpointReport::default();
    let mut provided = std::collections::HashSet::new();

    for (raw_name, tensor) in checkpoint {
        let name = raw_name
            .strip_prefix(DATA_PARALLEL_PREFIX)
            .unwrap_or(&raw_name)
            .to_string();
        if is_lazy_parameter(&name) {
            report.skipped_lazy.push(name);
            continue;
        }
        let Some(var) = data.get(&name) else {
            report.unexpected.push(name);
            continue;
        };
        provided.insert(name.clone());
        if var.dims() != tensor.dims() {
            tracing::warn!(
                parameter = %name,
                expected = ?var.dims(),
                found = ?tensor.dims(),
                "checkpoint parameter has an incompatible shape"
            );
            report.shape_mismatch.push(name);
            continue;
        }
        tensor
            .to_device(var.device())
            .and_then(|t| t.to_dtype(var.dtype()))
            .and_then(|t| var.set(&t))
            .map_err(|e| {
                candle_to_ocr_processing(
                    ProcessingStage::Checkpoint,
                    format!("restore parameter '{}'", name),
                    e,
                )
            })?;
        report.restored.push(name);
    }

    report.missing = data
        .keys()
        .filter(|name| !provided.contains(*name) && !is_lazy_parameter(name))
        .cloned()
        .collect();
    report.sort();
    Ok(report)
}

/// Loads checkpoints into a [`GlyphCrnn`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CheckpointLoader;

impl CheckpointLoader {
    /// Restores `path` into `model`.
    ///
    /// Returns `Ok(None)` when the file is missing or cannot be read; the
    /// model then keeps its random weights and a warning is logged.
    pub fn load_into(&self, path: &Path, model: &GlyphCrnn) -> OcrResult<Option<CheckpointReport>> {
        if !path.exists() {
            tracing::warn!(
                path = %path.display(),
                "checkpoint not found, continuing with randomly initialized weights"
            );
            return Ok(None);
        }
        let tensors = match candle_core::safetensors::load(path, &Device::Cpu) {
            Ok(tensors) => tensors,
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "checkpoint unreadable, continuing with randomly initialized weights"
                );
                return Ok(None);
            }
        };

        let report = merge_checkpoint(model.varmap(), tensors)?;
        tracing::info!(
            path = %path.display(),
            restored = report.restored.len(),
            skipped_lazy = report.skipped_lazy.len(),
            "restored checkpoint"
        );
        if !report.missing.is_empty() || !report.shape_mismatch.is_empty() {
            tracing::warn!(
                missing = ?report.missing,
                shape_mismatch = ?report.shape_mismatch,
                "checkpoint restored partially, remaining parameters keep random weights"
            );
        }
        if !report.unexpected.is_empty() {
            tracing::debug!(unexpected = ?report.unexpected, "ignored unknown checkpoint entries");
        }
        Ok(Some(report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::crnn::tests::small_config;
    use candle_core::DType;
    use tempfile::TempDir;

    fn param(model: &GlyphCrnn, name: &str) -> Vec<f32> {
        let data = model.varmap().data().lock().unwrap();
        data[name].flatten_all().unwrap().to_vec1::<f32>().unwrap()
    }

    fn glyph() -> Tensor {
        Tensor::ones((1, 1, 32, 32), DType::F32, &Device::Cpu).unwrap()
    }

    #[test]
    fn test_lazy_predicate() {
        assert!(is_lazy_parameter("lstm1.weight_ih_l0"));
        assert!(is_lazy_parameter("lstm1.bias_hh_l0_reverse"));
        assert!(is_lazy_parameter("lstm1"));
        assert!(!is_lazy_parameter("lstm10.weight_ih_l0"));
        assert!(!is_lazy_parameter("lstm2.weight_ih_l0"));
        assert!(!is_lazy_parameter("cnn.0.weight"));
    }

    #[test]
    fn test_restores_everything_but_lazy_layer() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("crnn.safetensors");

        let trained = GlyphCrnn::new(&small_config(), 10, Device::Cpu).unwrap();
        trained.forward(&glyph()).unwrap();
        trained.varmap().save(&path).unwrap();

        let fresh = GlyphCrnn::new(&small_config(), 10, Device::Cpu).unwrap();
        assert_ne!(param(&fresh, "cnn.0.weight"), param(&trained, "cnn.0.weight"));

        let report = CheckpointLoader.load_into(&path, &fresh).unwrap().unwrap();
        assert!(report.skipped_lazy.contains(&"lstm1.weight_ih_l0".to_string()));
        assert!(report.restored.contains(&"fc.weight".to_string()));
        assert!(report.missing.is_empty());
        assert!(report.shape_mismatch.is_empty());
        assert!(!fresh.lazy_layer().is_bound());

        for name in ["cnn.0.weight", "cnn.19.running_var", "lstm2.weight_hh_l0", "fc.bias"] {
            assert_eq!(param(&fresh, name), param(&trained, name), "{name}");
        }
    }

    #[test]
    fn test_checkpoint_without_lazy_weights() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("unbound.safetensors");

        // Saved before any forward pass: no lstm1 entries at all.
        let trained = GlyphCrnn::new(&small_config(), 10, Device::Cpu).unwrap();
        trained.varmap().save(&path).unwrap();

        let fresh = GlyphCrnn::new(&small_config(), 10, Device::Cpu).unwrap();
        let report = CheckpointLoader.load_into(&path, &fresh).unwrap().unwrap();
        assert!(report.skipped_lazy.is_empty());
        assert!(report.missing.is_empty());
        assert_eq!(param(&fresh, "lstm2.bias_ih_l0"), param(&trained, "lstm2.bias_ih_l0"));

        assert!(!fresh.lazy_layer().is_bound());
        fresh.forward(&glyph()).unwrap();
        assert_eq!(fresh.lazy_layer().instantiations(), 1);
    }

    #[test]
    fn test_shape_mismatch_and_unknown_entries() {
        let model = GlyphCrnn::new(&small_config(), 10, Device::Cpu).unwrap();
        let mut checkpoint = HashMap::new();
        checkpoint.insert(
            "module.fc.bias".to_string(),
            Tensor::zeros(3, DType::F32, &Device::Cpu).unwrap(),
        );
        checkpoint.insert(
            "cnn.7.num_batches_tracked".to_string(),
            Tensor::zeros(1, DType::F32, &Device::Cpu).unwrap(),
        );
        let report = merge_checkpoint(model.varmap(), checkpoint).unwrap();
        assert_eq!(report.shape_mismatch, vec!["fc.bias".to_string()]);
        assert_eq!(report.unexpected, vec!["cnn.7.num_batches_tracked".to_string()]);
        assert!(report.missing.contains(&"cnn.0.weight".to_string()));
        assert!(!report.missing.contains(&"fc.bias".to_string()));
    }

    #[test]
    fn test_missing_file_is_not_fatal() {
        let model = GlyphCrnn::new(&small_config(), 10, Device::Cpu).unwrap();
        let outcome = CheckpointLoader
            .load_into(Path::new("/nonexistent/crnn.safetensors"), &model)
            .unwrap();
        assert!(outcome.is_none());
    }
}
