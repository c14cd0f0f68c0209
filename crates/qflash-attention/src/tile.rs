//! Per-query-tile running state.
//!
//! `(m, l)` and `O` for the `Br` rows of one query tile live here and are
//! dropped when the tile is finished. They are split in two so the pipeline
//! can hand the softmax half and the output half to different stages.

use std::ops::Range;

use tracing::trace;

use qflash_core::Result;
use qflash_kernels::{
    accumulate_row, normalize_row, AttentionOperand, ScoreBlock, SoftmaxState, SoftmaxStep,
    ValueBlock,
};

use crate::config::AttentionConfig;

/// Absolute row range of tile `index` for tiles of `size` rows.
pub(crate) fn tile_rows(index: usize, size: usize) -> Range<usize> {
    index * size..(index + 1) * size
}

/// Running `(m, l)` of every row in a query tile.
pub(crate) struct SoftmaxRows {
    states: Vec<SoftmaxState>,
}

impl SoftmaxRows {
    pub(crate) fn new(rows: usize) -> Self {
        Self {
            states: vec![SoftmaxState::new(); rows],
        }
    }

    /// Fold row `r` of a score block, writing that row's probabilities.
    pub(crate) fn update(&mut self, r: usize, scores: &ScoreBlock, probs: &mut [f32]) -> SoftmaxStep {
        self.states[r].update(scores.row(r), scores.row_max(r), probs)
    }

    pub(crate) fn denominator(&self, r: usize) -> f32 {
        self.states[r].sum()
    }
}

/// Running output accumulator `O` (`Br x d_v`) of a query tile.
pub(crate) struct OutputRows {
    acc: Vec<f32>,
    d_v: usize,
}

impl OutputRows {
    pub(crate) fn new(rows: usize, d_v: usize) -> Self {
        Self {
            acc: vec![0.0; rows * d_v],
            d_v,
        }
    }

    pub(crate) fn accumulate(&mut self, r: usize, probs: &[f32], correction: f32, values: &ValueBlock) {
        let row = &mut self.acc[r * self.d_v..(r + 1) * self.d_v];
        accumulate_row(row, probs, correction, values);
    }

    /// Divide every row by its final `l` and write the `Br x d_v` tile to `out`.
    pub(crate) fn normalize_into(
        &self,
        stats: &SoftmaxRows,
        first_row: usize,
        out: &mut [f32],
    ) -> Result<()> {
        for (r, (acc, dst)) in self
            .acc
            .chunks_exact(self.d_v)
            .zip(out.chunks_exact_mut(self.d_v))
            .enumerate()
        {
            normalize_row(acc, stats.denominator(r), dst, first_row + r)?;
        }
        Ok(())
    }
}

/// Run one query tile on the calling thread, key/value tiles in order.
///
/// `out` is the tile's `Br x d_v` slice of the output.
pub(crate) fn run_query_tile<T: AttentionOperand>(
    config: &AttentionConfig,
    logit_scale: f32,
    q: &T,
    k: &T,
    v: &T,
    tile: usize,
    out: &mut [f32],
) -> Result<()> {
    let br = config.block_q;
    let bc = config.block_kv;
    let q_rows = tile_rows(tile, br);

    let mut stats = SoftmaxRows::new(br);
    let mut output = OutputRows::new(br, config.d_v);
    let mut scores = ScoreBlock::new(br, bc);
    let mut values = ValueBlock::new(bc, config.d_v);
    let mut probs = vec![0.0f32; bc];

    for j in 0..config.num_kv_tiles() {
        let kv_rows = tile_rows(j, bc);
        scores.compute(q, q_rows.clone(), k, kv_rows.clone(), logit_scale)?;
        values.fill(v, kv_rows);

        for r in 0..br {
            let step = stats.update(r, &scores, &mut probs);
            output.accumulate(r, &probs, step.correction, &values);
        }
        trace!(tile, block = j, "folded key/value block");
    }

    output.normalize_into(&stats, q_rows.start, out)
}
