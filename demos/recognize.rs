//! Glyph Recognition Example
//!
//! Recognizes single handwritten characters and prints one JSON result per
//! image. Every image gets an answer: when the CRNN fails the alternate text
//! engine is tried, and after that a substitute from the fallback vocabulary.
//!
//! # Usage
//!
//! ```bash
//! cargo run --example recognize -- [OPTIONS] <IMAGES>...
//! ```
//!
//! # Arguments
//!
//! * `-c, --config` - JSON configuration file; flags below override it
//! * `-v, --vocabulary` - Class vocabulary (`.json` map or one glyph per line)
//! * `-k, --checkpoint` - Safetensors checkpoint for the CRNN
//! * `--engine-model` - ONNX text recognition model used as the alternate engine
//! * `--engine-dict` - Character dictionary of the alternate engine
//! * `--device` - Device for the CRNN (e.g., 'cpu', 'cuda', 'cuda:0')
//! * `--batch` - Run all images through one batched model pass
//! * `<IMAGES>...` - Paths to input images to process
//!
//! # Example
//!
//! ```bash
//! RUST_LOG=info cargo run --example recognize -- -v char_dict.json -k crnn.safetensors glyph.png
//! ```

use clap::Parser;
use handwrite_ocr::core::config::EngineConfig;
use handwrite_ocr::core::init_tracing;
use handwrite_ocr::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// Command-line arguments for the glyph recognition example
#[derive(Parser)]
#[command(name = "recognize")]
#[command(about = "Glyph Recognition Example - recognizes single handwritten characters")]
struct Args {
    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Class vocabulary file
    #[arg(short, long)]
    vocabulary: Option<PathBuf>,

    /// CRNN checkpoint file
    #[arg(short = 'k', long)]
    checkpoint: Option<PathBuf>,

    /// ONNX model of the alternate text engine
    #[arg(long, requires = "engine_dict")]
    engine_model: Option<PathBuf>,

    /// Character dictionary of the alternate text engine
    #[arg(long, requires = "engine_model")]
    engine_dict: Option<PathBuf>,

    /// Device to use for the CRNN (e.g., 'cpu', 'cuda', 'cuda:0')
    #[arg(long)]
    device: Option<String>,

    /// Predict all images in one batch
    #[arg(long)]
    batch: bool,

    /// Paths to input images to process
    #[arg(required = true)]
    images: Vec<PathBuf>,
}

/// Builds the predictor configuration from the optional file and the flags.
fn build_config(args: &Args) -> Result<PredictorConfig, Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => PredictorConfig::from_json_file(path)?,
        None => PredictorConfig::default(),
    };
    if let Some(vocabulary) = &args.vocabulary {
        config.recognizer.vocabulary_path = vocabulary.clone();
    }
    if let Some(checkpoint) = &args.checkpoint {
        config.recognizer.checkpoint_path = Some(checkpoint.clone());
    }
    if let Some(device) = &args.device {
        config.recognizer.device = device.clone();
    }
    if let (Some(model), Some(dict)) = (&args.engine_model, &args.engine_dict) {
        config.engine = Some(EngineConfig::new(model, dict));
    }
    config.validate()?;
    Ok(config)
}

fn print_outcome(path: &Path, outcome: &RecognitionOutcome) -> Result<(), Box<dyn std::error::Error>> {
    let json = serde_json::json!({
        "image": path.display().to_string(),
        "tier": outcome.tier,
        "prediction": outcome.prediction,
        "trail": outcome.trail,
    });
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let args = Args::parse();
    info!("Glyph Recognition Example");

    let config = build_config(&args)?;
    let predictor = HandwritingPredictor::from_config(&config)?;

    // Unreadable images are reported and skipped.
    let mut paths = Vec::new();
    let mut images = Vec::new();
    for path in &args.images {
        match load_image(path) {
            Ok(image) => {
                paths.push(path.clone());
                images.push(image);
            }
            Err(e) => error!("Failed to load {}: {}", path.display(), e),
        }
    }
    if images.is_empty() {
        error!("No valid image files found");
        return Err("No valid image files found".into());
    }

    let outcomes = if args.batch {
        predictor.predict_batch(&images)
    } else {
        images.iter().map(|image| predictor.predict(image)).collect()
    };
    for (path, outcome) in paths.iter().zip(&outcomes) {
        print_outcome(path, outcome)?;
    }

    let fallbacks = outcomes
        .iter()
        .filter(|o| o.tier != StrategyKind::Model)
        .count();
    info!(
        "Recognized {} image(s), {} answered by a fallback tier",
        outcomes.len(),
        fallbacks
    );
    Ok(())
}
