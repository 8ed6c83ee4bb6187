//! Recognition models.
//!
//! The CRNN glyph classifier is assembled from three parts that mirror the
//! checkpoint layout: a convolutional [`extractor`], a recurrent [`encoder`]
//! whose first layer is shaped lazily, and a linear [`head`]. [`checkpoint`]
//! restores serialized weights into it, and [`text_engine`] wraps the ONNX
//! text recognizer used as the alternate strategy.

pub mod checkpoint;
pub mod crnn;
pub mod encoder;
pub mod extractor;
pub mod head;
pub mod text_engine;

pub use checkpoint::{CheckpointLoader, CheckpointReport, is_lazy_parameter, merge_checkpoint};
pub use crnn::GlyphCrnn;
pub use encoder::{BiLstm, LazyRecurrentLayer, SequenceEncoder};
pub use extractor::{FeatureGeometry, SpatialFeatureExtractor};
pub use head::ClassificationHead;
pub use text_engine::{OrtTextEngine, TextDetection, TextEngine};
