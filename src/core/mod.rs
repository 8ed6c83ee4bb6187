//! The core module of the recognition engine.
//!
//! This module contains the fundamental components shared by every other
//! module:
//! - Configuration documents and validation
//! - Constants used throughout the engine
//! - Error handling
//! - ONNX Runtime inference for the alternate text engine
//! - Candle device selection
//!
//! It also provides re-exports of commonly used types and functions for convenience.

pub mod config;
pub mod constants;
pub mod device;
pub mod errors;
pub mod inference;

pub use config::{ConfigError, ConfigValidator, PredictorConfig};
pub use constants::*;
pub use device::parse_device;
pub use errors::{OCRError, OcrResult, ProcessingStage};
pub use inference::{SessionPool, Tensor3D, Tensor4D};

/// Initializes the tracing subscriber for logging.
///
/// This function sets up the tracing subscriber with environment filter and formatting layer.
/// It's typically called at the start of an application to enable logging.
pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();
}
