//! Blocked INT8 attention: memory-bounded tiled attention with online softmax.
//!
//! For each query tile of `Br` rows the engine walks the key/value tiles of
//! `Bc` rows in increasing order, computing a `Br x Bc` score tile, folding
//! it into the running `(m, l)` of each row, and rescaling the running
//! output by the same correction. After the last key/value tile every row
//! is divided by its final `l`. Working memory per tile is
//! `O(Br * Bc + Br * d_v + Bc * d_v)`; the `N x N` score matrix is never
//! materialized.
//!
//! Reference: Dao et al., "FlashAttention-2: Faster Attention with Better
//! Parallelism and Work Partitioning" (2023).

use std::time::Instant;

use rayon::prelude::*;
use tracing::{debug, warn};

use qflash_core::{QFlashError, QuantizedTensor, Result, Shape, Tensor};
use qflash_kernels::AttentionOperand;

use crate::config::{AttentionConfig, LogitScaling, Schedule};
use crate::{pipeline, tile};

/// Orchestrates query tiles x key/value tiles over read-only Q, K, V.
#[derive(Debug, Clone)]
pub struct BlockedAttentionEngine {
    config: AttentionConfig,
    logit_scale: f32,
}

impl BlockedAttentionEngine {
    /// Validate `config` and build an engine for it.
    pub fn new(config: AttentionConfig) -> Result<Self> {
        config.validate()?;
        let logit_scale = config.logit_scale();

        if let LogitScaling::RightShift(shift) = config.logit_scaling {
            let principled = LogitScaling::InvSqrtDk.factor(config.d_k);
            if logit_scale != principled {
                warn!(
                    shift,
                    factor = logit_scale,
                    inv_sqrt_dk = principled,
                    "right-shift logit scaling differs from 1/sqrt(d_k); softmax temperature changes"
                );
            }
        }

        debug!(
            seq_len = config.seq_len,
            d_k = config.d_k,
            d_v = config.d_v,
            block_q = config.block_q,
            block_kv = config.block_kv,
            logit_scale,
            schedule = ?config.schedule,
            "attention engine configured"
        );

        Ok(Self { config, logit_scale })
    }

    pub fn config(&self) -> &AttentionConfig {
        &self.config
    }

    /// The multiplier applied to every dot product.
    pub fn logit_scale(&self) -> f32 {
        self.logit_scale
    }

    /// Compute `softmax(Q K^T * scale) V` for one `N x d_k` / `N x d_v` problem.
    ///
    /// # Arguments
    /// * `q` - [N, d_k]
    /// * `k` - [N, d_k]
    /// * `v` - [N, d_v]
    ///
    /// # Returns
    /// * `output` - [N, d_v]
    pub fn compute<T: AttentionOperand>(&self, q: &T, k: &T, v: &T) -> Result<Tensor> {
        let cfg = &self.config;
        check_shape(cfg.query_shape(), q.shape())?;
        check_shape(cfg.key_shape(), k.shape())?;
        check_shape(cfg.value_shape(), v.shape())?;

        let start = Instant::now();
        let mut output = vec![0.0f32; cfg.seq_len * cfg.d_v];
        let tile_len = cfg.block_q * cfg.d_v;
        let scale = self.logit_scale;

        match cfg.schedule {
            Schedule::Sequential => {
                for (t, out) in output.chunks_mut(tile_len).enumerate() {
                    tile::run_query_tile(cfg, scale, q, k, v, t, out)?;
                    debug!(tile = t, of = cfg.num_q_tiles(), "query tile done");
                }
            }
            Schedule::Parallel => {
                // Query tiles are independent; each owns its output slice.
                output
                    .par_chunks_mut(tile_len)
                    .enumerate()
                    .try_for_each(|(t, out)| tile::run_query_tile(cfg, scale, q, k, v, t, out))?;
            }
            Schedule::Pipelined { depth } => {
                for (t, out) in output.chunks_mut(tile_len).enumerate() {
                    pipeline::run_query_tile(cfg, scale, q, k, v, t, depth, out)?;
                    debug!(tile = t, of = cfg.num_q_tiles(), "query tile done");
                }
            }
        }

        debug!(
            operand = T::KIND,
            q_tiles = cfg.num_q_tiles(),
            kv_tiles = cfg.num_kv_tiles(),
            elapsed_ms = start.elapsed().as_secs_f64() * 1e3,
            "attention computed"
        );

        Tensor::from_vec(output, cfg.seq_len, cfg.d_v)
    }
}

/// Attention over raw INT8 buffers and per-row scales.
///
/// `q_int8`/`k_int8` are `N x d_k`, `v_int8` is `N x d_v`, all row-major;
/// each scale vector has `N` entries. Returns the `N x d_v` output.
pub fn compute_attention(
    config: &AttentionConfig,
    q_int8: &[i8],
    q_scale: &[f32],
    k_int8: &[i8],
    k_scale: &[f32],
    v_int8: &[i8],
    v_scale: &[f32],
) -> Result<Tensor> {
    let engine = BlockedAttentionEngine::new(*config)?;
    let n = config.seq_len;
    let q = QuantizedTensor::from_slices(q_int8, q_scale, n, config.d_k)?;
    let k = QuantizedTensor::from_slices(k_int8, k_scale, n, config.d_k)?;
    let v = QuantizedTensor::from_slices(v_int8, v_scale, n, config.d_v)?;
    engine.compute(&q, &k, &v)
}

fn check_shape(expected: Shape, got: Shape) -> Result<()> {
    if expected != got {
        return Err(QFlashError::ShapeMismatch { expected, got });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::reference_attention;

    fn pattern(rows: usize, cols: usize, mul: usize, add: usize) -> Tensor {
        Tensor::from_fn(rows, cols, |r, c| ((r * cols + c) * mul + add) as f32 % 13.0 * 0.1 - 0.6)
    }

    #[test]
    fn test_engine_matches_reference_f32() {
        let n = 16;
        let d = 8;
        let q = pattern(n, d, 7, 3);
        let k = pattern(n, d, 11, 5);
        let v = pattern(n, d, 5, 1);

        let engine = BlockedAttentionEngine::new(AttentionConfig::new(n, d, d).with_blocks(4, 4)).unwrap();
        let out = engine.compute(&q, &k, &v).unwrap();
        let expected = reference_attention(&q, &k, &v, engine.logit_scale()).unwrap();

        assert!(out.max_abs_diff(&expected).unwrap() < 1e-4);
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let engine = BlockedAttentionEngine::new(AttentionConfig::new(4, 2, 2)).unwrap();
        let q = Tensor::zeros(4, 2);
        let v_bad = Tensor::zeros(4, 3);
        let err = engine.compute(&q, &q, &v_bad).unwrap_err();
        assert!(matches!(err, QFlashError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_invalid_config_rejected_before_compute() {
        let err = BlockedAttentionEngine::new(AttentionConfig::new(6, 2, 2).with_blocks(4, 2)).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_compute_attention_raw_buffers() {
        let cfg = AttentionConfig::new(2, 2, 2).with_blocks(2, 2);
        let out = compute_attention(
            &cfg,
            &[100, 0, 0, 100],
            &[0.01, 0.01],
            &[100, 0, 0, 100],
            &[0.01, 0.01],
            &[127, 0, 0, 127],
            &[0.1, 0.1],
        )
        .unwrap();
        assert_eq!(out.shape().dims(), [2, 2]);
        assert!(out.get(0, 0) > out.get(0, 1));

        let err = compute_attention(&cfg, &[0; 4], &[1.0], &[0; 4], &[1.0; 2], &[0; 4], &[1.0; 2]).unwrap_err();
        assert!(matches!(err, QFlashError::ScaleLength { .. }));
    }

    #[test]
    fn test_schedules_agree() {
        let n = 32;
        let q = pattern(n, 8, 7, 3);
        let k = pattern(n, 8, 3, 2);
        let v = pattern(n, 4, 5, 1);
        let base = AttentionConfig::new(n, 8, 4).with_blocks(8, 4);

        let seq = BlockedAttentionEngine::new(base).unwrap().compute(&q, &k, &v).unwrap();
        for schedule in [Schedule::Parallel, Schedule::Pipelined { depth: 2 }] {
            let out = BlockedAttentionEngine::new(base.with_schedule(schedule))
                .unwrap()
                .compute(&q, &k, &v)
                .unwrap();
            assert_eq!(out, seq, "{:?} differs from sequential", schedule);
        }
    }
}
