//! Score tiles: `S[r][c] = dot(Q[r], K[c]) * logit_scale`.
//!
//! On the INT8 path the dot product is an exact `i32` multiply-accumulate;
//! it is converted to float once and rescaled by `scale_q * scale_k`.

use std::ops::Range;

use qflash_core::{QFlashError, Result};

use crate::operand::AttentionOperand;

/// Largest magnitude of one INT8 x INT8 product. Quantization never emits
/// -128, but raw input files may.
const MAX_PRODUCT: usize = 128 * 128;

/// Largest `d_k` whose worst-case dot product (`d_k * 128 * 128`) fits in `i32`.
pub const fn max_exact_dk() -> usize {
    i32::MAX as usize / MAX_PRODUCT
}

/// Exact INT8 dot product with 32-bit accumulation.
///
/// Exact for any `a.len() <= max_exact_dk()`; the engine rejects wider rows
/// before computing.
#[inline]
pub fn dot_i8(a: &[i8], b: &[i8]) -> i32 {
    debug_assert_eq!(a.len(), b.len());
    a.iter()
        .zip(b)
        .fold(0i32, |acc, (&x, &y)| acc + (x as i16 * y as i16) as i32)
}

/// One `Br x Bc` tile of scaled attention logits with per-row maxima.
///
/// Reused across key/value blocks; never outlives one query tile.
#[derive(Debug, Clone)]
pub struct ScoreBlock {
    scores: Vec<f32>,
    row_max: Vec<f32>,
    rows: usize,
    cols: usize,
}

impl ScoreBlock {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            scores: vec![0.0; rows * cols],
            row_max: vec![f32::NEG_INFINITY; rows],
            rows,
            cols,
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Scores of query row `r` against every key of the block.
    #[inline]
    pub fn row(&self, r: usize) -> &[f32] {
        &self.scores[r * self.cols..(r + 1) * self.cols]
    }

    /// Block-local maximum of row `r`.
    #[inline]
    pub fn row_max(&self, r: usize) -> f32 {
        self.row_max[r]
    }

    /// Fill the tile from query rows `q_rows` of `q` and key rows `k_rows` of `k`.
    ///
    /// Fails with `NonFiniteScore` if a rescaled dot product leaves the f32
    /// range; the online softmax cannot recover from an infinite or NaN score.
    /// Panics if the ranges do not match the tile's extent.
    pub fn compute<T: AttentionOperand>(
        &mut self,
        q: &T,
        q_rows: Range<usize>,
        k: &T,
        k_rows: Range<usize>,
        logit_scale: f32,
    ) -> Result<()> {
        assert_eq!(q_rows.len(), self.rows, "query range does not match tile rows");
        assert_eq!(k_rows.len(), self.cols, "key range does not match tile cols");

        for (r, qi) in q_rows.enumerate() {
            let out = &mut self.scores[r * self.cols..(r + 1) * self.cols];
            let mut max = f32::NEG_INFINITY;
            for (s, kj) in out.iter_mut().zip(k_rows.clone()) {
                *s = q.row_dot(qi, k, kj) * logit_scale;
                if !s.is_finite() {
                    return Err(QFlashError::NonFiniteScore { row: qi, key: kj, score: *s });
                }
                if *s > max {
                    max = *s;
                }
            }
            self.row_max[r] = max;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qflash_core::{QuantizedTensor, Tensor};

    #[test]
    fn test_dot_i8_extremes() {
        let a = vec![-127i8; 64];
        let b = vec![-127i8; 64];
        assert_eq!(dot_i8(&a, &b), 64 * 127 * 127);

        let c = vec![127i8; 64];
        assert_eq!(dot_i8(&a, &c), -(64 * 127 * 127));
    }

    #[test]
    fn test_max_exact_dk() {
        let dk = max_exact_dk();
        assert!((dk * MAX_PRODUCT) as i64 <= i32::MAX as i64);
        assert!(((dk + 1) * MAX_PRODUCT) as i64 > i32::MAX as i64);
        assert!(dk > 4096);
    }

    #[test]
    fn test_compute_quantized_tile() {
        let q = QuantizedTensor::new(vec![100, 0, 0, 100], vec![0.01, 0.01], 2, 2).unwrap();
        let inv_sqrt = 1.0 / 2.0f32.sqrt();
        let mut block = ScoreBlock::new(2, 2);
        block.compute(&q, 0..2, &q, 0..2, inv_sqrt).unwrap();

        assert!((block.row(0)[0] - inv_sqrt).abs() < 1e-6);
        assert_eq!(block.row(0)[1], 0.0);
        assert_eq!(block.row(1)[0], 0.0);
        assert!((block.row_max(1) - inv_sqrt).abs() < 1e-6);
    }

    #[test]
    fn test_compute_sub_range() {
        // keys 2..4 of a 4-row tensor
        let t = Tensor::from_fn(4, 3, |r, c| (r + c) as f32);
        let mut block = ScoreBlock::new(1, 2);
        block.compute(&t, 1..2, &t, 2..4, 0.5).unwrap();

        // q = [1,2,3]; k2 = [2,3,4] -> 20; k3 = [3,4,5] -> 26
        assert_eq!(block.row(0), &[10.0, 13.0]);
        assert_eq!(block.row_max(0), 13.0);
    }

    #[test]
    fn test_negative_scores_track_max() {
        let t = Tensor::from_f32(&[1.0, -1.0, -2.0], &[3, 1]);
        let mut block = ScoreBlock::new(1, 2);
        block.compute(&t, 0..1, &t, 1..3, 1.0).unwrap();
        assert_eq!(block.row_max(0), -1.0);
    }

    #[test]
    fn test_overflowing_score_rejected() {
        // Finite rows near 1e20 quantize fine, but their rescaled dot
        // product exceeds f32::MAX.
        let big = Tensor::from_fn(2, 4, |r, c| if (r + c) % 2 == 0 { 1e20 } else { -3e19 });
        let q = crate::quantize::quantize_rows(&big);
        assert!(q.scales().iter().all(|s| s.is_finite()));

        let mut block = ScoreBlock::new(2, 2);
        let err = block.compute(&q, 0..2, &q, 0..2, 0.5).unwrap_err();
        match err {
            QFlashError::NonFiniteScore { row, key, score } => {
                assert_eq!((row, key), (0, 0));
                assert_eq!(score, f32::INFINITY);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
