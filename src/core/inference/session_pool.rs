//! A round-robin pool of ONNX Runtime sessions over one model file.

use crate::core::config::OrtSessionConfig;
use crate::core::errors::{OCRError, SimpleError};
use ndarray::ArrayView3;
use ort::logging::LogLevel;
use ort::session::Session;
use ort::session::builder::SessionBuilder;
use ort::value::{TensorRef, ValueType};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{Tensor3D, Tensor4D};

/// Sessions are locked one at a time, so up to `len()` calls run at once.
pub struct SessionPool {
    sessions: Vec<Mutex<Session>>,
    cursor: AtomicUsize,
    input_name: String,
    output_name: String,
    model_path: PathBuf,
    model_name: String,
}

impl std::fmt::Debug for SessionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionPool")
            .field("sessions", &self.sessions.len())
            .field("input_name", &self.input_name)
            .field("output_name", &self.output_name)
            .field("model_path", &self.model_path)
            .finish()
    }
}

fn configure(builder: SessionBuilder, cfg: Option<&OrtSessionConfig>) -> ort::Result<SessionBuilder> {
    // Keep ORT quiet unless tracing asks otherwise.
    let builder = builder.with_log_level(LogLevel::Error)?;
    match cfg {
        Some(cfg) => cfg.apply(builder),
        None => Ok(builder),
    }
}

impl SessionPool {
    /// Opens `size` sessions (at least one) on the model at `path`.
    ///
    /// Input and output names are taken from the model's first input and
    /// output.
    pub fn open(
        path: impl AsRef<Path>,
        size: usize,
        cfg: Option<&OrtSessionConfig>,
    ) -> Result<Self, OCRError> {
        let path = path.as_ref();
        let load_error = |e: ort::Error| {
            OCRError::model_load_error(
                path,
                "failed to create ONNX session",
                Some("verify the model path and that it is an ONNX file"),
                Some(e),
            )
        };

        let sessions = (0..size.max(1))
            .map(|_| {
                Session::builder()
                    .and_then(|b| configure(b, cfg))
                    .and_then(|b| b.commit_from_file(path))
                    .map(Mutex::new)
                    .map_err(load_error)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let (input_name, output_name) = {
            let first = sessions[0]
                .lock()
                .map_err(|_| OCRError::invalid_input("session lock poisoned"))?;
            let input = first.inputs.first().map(|i| i.name.clone());
            let output = first.outputs.first().map(|o| o.name.clone());
            match (input, output) {
                (Some(input), Some(output)) => (input, output),
                _ => {
                    return Err(OCRError::model_load_error(
                        path,
                        "model declares no inputs or no outputs",
                        None,
                        None::<SimpleError>,
                    ));
                }
            }
        };

        Ok(Self {
            sessions,
            cursor: AtomicUsize::new(0),
            input_name,
            output_name,
            model_path: path.to_path_buf(),
            model_name: path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("onnx_model")
                .to_string(),
        })
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    /// Dimensions of the first input. Dynamic axes are reported as `-1`.
    pub fn input_dims(&self) -> Option<Vec<i64>> {
        let session = self.sessions.first()?.lock().ok()?;
        match &session.inputs.first()?.input_type {
            ValueType::Tensor { shape, .. } => Some(shape.iter().copied().collect()),
            _ => None,
        }
    }

    /// Runs an image batch and reads the output as `(batch, steps, classes)`.
    pub fn run_sequence(&self, input: &Tensor4D) -> Result<Tensor3D, OCRError> {
        let tensor = TensorRef::from_array_view(input.view()).map_err(|e| {
            OCRError::inference_error(
                &self.model_name,
                format!("cannot wrap input of shape {:?}", input.shape()),
                e,
            )
        })?;

        let slot = self.cursor.fetch_add(1, Ordering::Relaxed) % self.sessions.len();
        let mut session = self.sessions[slot].lock().map_err(|_| {
            OCRError::inference_error(
                &self.model_name,
                format!("session {} lock poisoned", slot),
                SimpleError::new("poisoned mutex"),
            )
        })?;
        let outputs = session
            .run(ort::inputs![self.input_name.as_str() => tensor])
            .map_err(|e| OCRError::inference_error(&self.model_name, "session run", e))?;
        let (shape, data) = outputs[self.output_name.as_str()]
            .try_extract_tensor::<f32>()
            .map_err(|e| {
                OCRError::inference_error(
                    &self.model_name,
                    format!("output '{}' is not an f32 tensor", self.output_name),
                    e,
                )
            })?;

        let dims: &[i64] = shape;
        let &[batch, steps, classes] = dims else {
            return Err(OCRError::tensor_operation(
                format!("model '{}' returned shape {:?}", self.model_name, shape),
                SimpleError::new("expected a 3D output"),
            ));
        };
        let view = ArrayView3::from_shape((batch as usize, steps as usize, classes as usize), data)?;
        Ok(view.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_model_reports_path() {
        let err = SessionPool::open("missing_rec.onnx", 1, None).unwrap_err();
        assert!(matches!(err, OCRError::ModelLoad { .. }));
        assert!(err.to_string().contains("missing_rec.onnx"));
    }

    #[test]
    fn test_missing_model_with_session_config() {
        let cfg = OrtSessionConfig::new().with_intra_threads(1);
        assert!(SessionPool::open("missing_rec.onnx", 3, Some(&cfg)).is_err());
    }
}
