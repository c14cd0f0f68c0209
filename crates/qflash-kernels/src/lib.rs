//! # qflash-kernels
//!
//! CPU building blocks of the blocked INT8 attention engine.
//!
//! Provides:
//! - Per-row symmetric INT8 quantization (`quantize`)
//! - The operand abstraction shared by INT8 and f32 inputs (`operand`)
//! - Integer-accumulated score tiles (`score`)
//! - The online softmax recurrence (`softmax`)
//! - Rescaled output accumulation and final normalization (`accumulate`, `normalize`)

pub mod accumulate;
pub mod normalize;
pub mod operand;
pub mod quantize;
pub mod score;
pub mod softmax;

pub use accumulate::{accumulate_row, ValueBlock};
pub use normalize::normalize_row;
pub use operand::AttentionOperand;
pub use quantize::{quantize_row, quantize_rows};
pub use score::{dot_i8, max_exact_dk, ScoreBlock};
pub use softmax::{SoftmaxState, SoftmaxStep};
