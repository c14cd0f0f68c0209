//! Rescaled output accumulation: `O_new[d] = O_prev[d] * correction + sum_c P[c] * V[c][d]`.

use std::ops::Range;

use crate::operand::AttentionOperand;

/// A dequantized `Bc x dv` block of values, loaded once per key/value tile.
#[derive(Debug, Clone)]
pub struct ValueBlock {
    data: Vec<f32>,
    rows: usize,
    cols: usize,
}

impl ValueBlock {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            data: vec![0.0; rows * cols],
            rows,
            cols,
        }
    }

    /// Allocate and fill a block from rows `rows` of `v`.
    pub fn load<T: AttentionOperand>(v: &T, rows: Range<usize>) -> Self {
        let mut block = Self::new(rows.len(), v.shape().cols());
        block.fill(v, rows);
        block
    }

    /// Dequantize rows `rows` of `v` into this block (`v_real[c][d] = q * scale_v[c]`).
    pub fn fill<T: AttentionOperand>(&mut self, v: &T, rows: Range<usize>) {
        assert_eq!(rows.len(), self.rows, "value range does not match block rows");
        assert_eq!(v.shape().cols(), self.cols, "value width does not match block cols");
        for (c, vr) in rows.enumerate() {
            v.dequantize_row_into(vr, &mut self.data[c * self.cols..(c + 1) * self.cols]);
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.data[row * self.cols + col]
    }
}

/// Fold one block into a row's running output.
///
/// `correction` must be the value the softmax step produced for the same
/// row and block; it rescales every output dimension alike.
pub fn accumulate_row(acc: &mut [f32], probs: &[f32], correction: f32, values: &ValueBlock) {
    debug_assert_eq!(acc.len(), values.cols());
    debug_assert_eq!(probs.len(), values.rows());

    for (d, o) in acc.iter_mut().enumerate() {
        let mut weighted_sum = 0.0f32;
        for (c, &p) in probs.iter().enumerate() {
            weighted_sum += p * values.get(c, d);
        }
        *o = *o * correction + weighted_sum;
    }
}
