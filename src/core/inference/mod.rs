//! ONNX Runtime inference for the alternate text engine.

pub mod session_pool;

pub use session_pool::SessionPool;

/// `f32` tensor laid out as (batch, steps, classes).
pub type Tensor3D = ndarray::Array3<f32>;

/// `f32` tensor laid out as (batch, channels, height, width).
pub type Tensor4D = ndarray::Array4<f32>;
