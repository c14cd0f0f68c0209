//! # qflash-core
//!
//! Core data model for the qflash INT8 attention engine.
//!
//! Provides:
//! - `Shape`, the `(rows, cols)` extent of every operand
//! - `Tensor`, a dense row-major f32 matrix
//! - `QuantizedTensor`, an INT8 matrix with one symmetric scale per row
//! - `QFlashError`, the single error type shared by every qflash crate

pub mod error;
pub mod quantized;
pub mod shape;
pub mod tensor;

pub use error::QFlashError;
pub use quantized::{dequantize, QuantizedTensor, QMAX};
pub use shape::Shape;
pub use tensor::Tensor;

pub type Result<T> = std::result::Result<T, QFlashError>;
