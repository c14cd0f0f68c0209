//! Operands the blocked engine can consume.
//!
//! The engine is written once against [`AttentionOperand`]. `QuantizedTensor`
//! is the INT8 path (exact integer dot product, one float rescale);
//! `Tensor` is the unquantized f32 baseline.

use qflash_core::{QuantizedTensor, Shape, Tensor};

use crate::score::dot_i8;

/// A read-only row-major matrix usable as Q, K or V.
pub trait AttentionOperand: Sync {
    /// Short label for logs.
    const KIND: &'static str;

    fn shape(&self) -> Shape;

    /// Real-valued dot product of row `row` of `self` with row `other_row` of `other`.
    ///
    /// No logit scaling is applied here.
    fn row_dot(&self, row: usize, other: &Self, other_row: usize) -> f32;

    /// Write the real values of row `row` into `out`.
    fn dequantize_row_into(&self, row: usize, out: &mut [f32]);

    /// Materialize the operand as f32.
    fn to_dense(&self) -> Tensor {
        let shape = self.shape();
        let mut out = Tensor::zeros(shape.rows(), shape.cols());
        for r in 0..shape.rows() {
            self.dequantize_row_into(r, out.row_mut(r));
        }
        out
    }
}

impl AttentionOperand for QuantizedTensor {
    const KIND: &'static str = "int8";

    fn shape(&self) -> Shape {
        QuantizedTensor::shape(self)
    }

    #[inline]
    fn row_dot(&self, row: usize, other: &Self, other_row: usize) -> f32 {
        let int_sum = dot_i8(self.row(row), other.row(other_row));
        int_sum as f32 * self.scale(row) * other.scale(other_row)
    }

    fn dequantize_row_into(&self, row: usize, out: &mut [f32]) {
        QuantizedTensor::dequantize_row_into(self, row, out)
    }
}

impl AttentionOperand for Tensor {
    const KIND: &'static str = "f32";

    fn shape(&self) -> Shape {
        Tensor::shape(self)
    }

    #[inline]
    fn row_dot(&self, row: usize, other: &Self, other_row: usize) -> f32 {
        self.row(row)
            .iter()
            .zip(other.row(other_row))
            .map(|(a, b)| a * b)
            .sum()
    }

    fn dequantize_row_into(&self, row: usize, out: &mut [f32]) {
        out.copy_from_slice(self.row(row));
    }

    fn to_dense(&self) -> Tensor {
        self.clone()
    }
}
