//! Per-row symmetric INT8 tensors.
//!
//! Each row `i` carries one scale `s_i > 0`; an element is recovered as
//! `q * s_i`. Quantization itself lives in `qflash_kernels::quantize`.

use crate::error::QFlashError;
use crate::shape::Shape;
use crate::tensor::Tensor;
use crate::Result;

/// Largest quantized magnitude. The range is symmetric, so -128 is never produced.
pub const QMAX: i8 = 127;

/// Recover an approximate real value from a quantized integer and its row scale.
#[inline]
pub fn dequantize(q: i8, scale: f32) -> f32 {
    q as f32 * scale
}

/// An INT8 matrix with one positive scale per row.
///
/// Invariant: `scales.len() == rows` and every scale is finite and `> 0`.
/// Quantized tensors are immutable once built and are shared read-only by
/// every concurrent reader of an attention computation.
#[derive(Debug, Clone, PartialEq)]
pub struct QuantizedTensor {
    data: Vec<i8>,
    scales: Vec<f32>,
    shape: Shape,
}

impl QuantizedTensor {
    /// Assemble a quantized tensor from raw parts, checking every invariant.
    pub fn new(data: Vec<i8>, scales: Vec<f32>, rows: usize, cols: usize) -> Result<Self> {
        let shape = Shape::new(rows, cols);
        if data.len() != shape.numel() {
            return Err(QFlashError::ShapeMismatch {
                expected: shape,
                got: Shape::new(1, data.len()),
            });
        }
        if scales.len() != rows {
            return Err(QFlashError::ScaleLength {
                expected: rows,
                got: scales.len(),
            });
        }
        if let Some((row, &scale)) = scales
            .iter()
            .enumerate()
            .find(|(_, s)| !(s.is_finite() && **s > 0.0))
        {
            return Err(QFlashError::InvalidScale { row, scale });
        }
        Ok(Self { data, scales, shape })
    }

    /// Copying variant of [`QuantizedTensor::new`].
    pub fn from_slices(data: &[i8], scales: &[f32], rows: usize, cols: usize) -> Result<Self> {
        Self::new(data.to_vec(), scales.to_vec(), rows, cols)
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn rows(&self) -> usize {
        self.shape.rows()
    }

    pub fn cols(&self) -> usize {
        self.shape.cols()
    }

    /// Flat row-major INT8 data.
    pub fn data(&self) -> &[i8] {
        &self.data
    }

    pub fn scales(&self) -> &[f32] {
        &self.scales
    }

    #[inline]
    pub fn row(&self, row: usize) -> &[i8] {
        &self.data[self.shape.row_range(row)]
    }

    #[inline]
    pub fn scale(&self, row: usize) -> f32 {
        self.scales[row]
    }

    /// Dequantize row `row` into `out` (`out.len() == cols`).
    pub fn dequantize_row_into(&self, row: usize, out: &mut [f32]) {
        let scale = self.scales[row];
        for (o, &q) in out.iter_mut().zip(self.row(row)) {
            *o = dequantize(q, scale);
        }
    }

    /// Dequantize the whole matrix.
    pub fn dequantize(&self) -> Tensor {
        let mut out = Tensor::zeros(self.rows(), self.cols());
        for r in 0..self.rows() {
            self.dequantize_row_into(r, out.row_mut(r));
        }
        out
    }
}
