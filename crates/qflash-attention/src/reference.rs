//! Full-precision reference attention.
//!
//! Attention(Q, K, V) = softmax(Q_real @ K_real^T * scale) @ V_real
//!
//! Materializes the whole `N x N` score matrix over dequantized operands.
//! Used only to validate the blocked engine.

use qflash_core::{QFlashError, Result, Shape, Tensor};
use qflash_kernels::AttentionOperand;

/// Reference attention over the real values of `q`, `k`, `v`.
///
/// # Arguments
/// * `query`       - [seq_q, d_k]
/// * `key`         - [seq_k, d_k]
/// * `value`       - [seq_k, d_v]
/// * `logit_scale` - multiplier on every dot product (usually `1/sqrt(d_k)`)
///
/// # Returns
/// * `output` - [seq_q, d_v]
pub fn reference_attention<T: AttentionOperand>(
    query: &T,
    key: &T,
    value: &T,
    logit_scale: f32,
) -> Result<Tensor> {
    let q = query.to_dense();
    let k = key.to_dense();
    let v = value.to_dense();

    let seq_q = q.rows();
    let d_k = q.cols();
    let seq_k = k.rows();
    let d_v = v.cols();

    if k.cols() != d_k {
        return Err(QFlashError::ShapeMismatch {
            expected: Shape::new(seq_k, d_k),
            got: k.shape(),
        });
    }
    if v.rows() != seq_k {
        return Err(QFlashError::ShapeMismatch {
            expected: Shape::new(seq_k, d_v),
            got: v.shape(),
        });
    }
    if seq_k == 0 {
        return Err(QFlashError::InvalidConfig("reference attention needs at least one key".into()));
    }

    // scores = Q @ K^T * scale  [seq_q, seq_k]
    let mut scores = vec![0.0f32; seq_q * seq_k];
    for i in 0..seq_q {
        for j in 0..seq_k {
            let dot: f32 = q.row(i).iter().zip(k.row(j)).map(|(a, b)| a * b).sum();
            scores[i * seq_k + j] = dot * logit_scale;
        }
    }

    // Softmax over seq_k
    for row in scores.chunks_exact_mut(seq_k) {
        let max_val = row.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        let mut sum = 0.0f32;
        for s in row.iter_mut() {
            *s = (*s - max_val).exp();
            sum += *s;
        }
        for s in row.iter_mut() {
            *s /= sum;
        }
    }

    // output = P @ V  [seq_q, d_v]
    let mut output = Tensor::zeros(seq_q, d_v);
    for i in 0..seq_q {
        let p = &scores[i * seq_k..(i + 1) * seq_k];
        let out = output.row_mut(i);
        for (d, o) in out.iter_mut().enumerate() {
            *o = p.iter().enumerate().map(|(j, &pj)| pj * v.get(j, d)).sum();
        }
    }

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_are_convex_combinations() {
        let q = Tensor::from_fn(3, 2, |r, c| (r + c) as f32 * 0.5);
        let k = Tensor::from_fn(4, 2, |r, c| (r * c) as f32 * 0.25);
        let v = Tensor::from_fn(4, 2, |r, _| r as f32);
        let out = reference_attention(&q, &k, &v, 1.0).unwrap();

        assert_eq!(out.shape().dims(), [3, 2]);
        for r in 0..3 {
            let x = out.get(r, 0);
            assert!((0.0..=3.0).contains(&x));
            assert!((x - out.get(r, 1)).abs() < 1e-6);
        }
    }

    #[test]
    fn test_identical_keys_average() {
        let q = Tensor::from_f32(&[1.0, 2.0], &[1, 2]);
        let k = Tensor::from_f32(&[0.3, 0.3, 0.3, 0.3], &[2, 2]);
        let v = Tensor::from_f32(&[2.0, 4.0], &[2, 1]);
        let out = reference_attention(&q, &k, &v, 0.7).unwrap();
        assert!((out.get(0, 0) - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_shape_checks() {
        let q = Tensor::zeros(2, 2);
        assert!(reference_attention(&q, &Tensor::zeros(2, 3), &Tensor::zeros(2, 2), 1.0).is_err());
        assert!(reference_attention(&q, &Tensor::zeros(2, 2), &Tensor::zeros(3, 2), 1.0).is_err());
    }
}
