//! Engine configuration.
//!
//! All constraints are checked by [`AttentionConfig::validate`] before any
//! computation starts.

use serde::{Deserialize, Serialize};

use qflash_core::{QFlashError, Result, Shape};
use qflash_kernels::max_exact_dk;

/// Tile size of the reference hardware kernel.
pub const DEFAULT_BLOCK: usize = 16;

/// Bounded queue capacity between pipeline stages.
pub const DEFAULT_PIPELINE_DEPTH: usize = 4;

/// How raw dot products are turned into attention logits.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogitScaling {
    /// Multiply by `1 / sqrt(d_k)`.
    InvSqrtDk,
    /// Multiply by an explicit factor.
    Factor(f32),
    /// Multiply by `2^-shift`, matching kernels that right-shift the
    /// dequantized dot product instead of scaling by `1 / sqrt(d_k)`.
    /// Changes the softmax temperature unless `2^-shift == 1 / sqrt(d_k)`.
    RightShift(u32),
}

impl Default for LogitScaling {
    fn default() -> Self {
        LogitScaling::InvSqrtDk
    }
}

impl LogitScaling {
    /// The multiplier applied to every dot product.
    pub fn factor(&self, d_k: usize) -> f32 {
        match *self {
            LogitScaling::InvSqrtDk => 1.0 / (d_k as f32).sqrt(),
            LogitScaling::Factor(f) => f,
            LogitScaling::RightShift(shift) => 1.0 / (1u64 << shift.min(63)) as f32,
        }
    }
}

/// How query tiles are scheduled. Every schedule yields the same output up
/// to floating-point rounding order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Schedule {
    /// Nested loops on the calling thread.
    Sequential,
    /// Query tiles spread over the rayon pool.
    Parallel,
    /// One staged pipeline per query tile, stages joined by bounded queues.
    Pipelined { depth: usize },
}

impl Default for Schedule {
    fn default() -> Self {
        Schedule::Sequential
    }
}

/// Problem size and tiling of one attention call.
///
/// `N` = `seq_len`, `Br` = `block_q`, `Bc` = `block_kv`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AttentionConfig {
    pub seq_len: usize,
    pub d_k: usize,
    pub d_v: usize,
    pub block_q: usize,
    pub block_kv: usize,
    #[serde(default)]
    pub logit_scaling: LogitScaling,
    #[serde(default)]
    pub schedule: Schedule,
}

impl AttentionConfig {
    /// Config with default tiles (`gcd(N, 16)`), `1/sqrt(d_k)` scaling and
    /// the sequential schedule.
    pub fn new(seq_len: usize, d_k: usize, d_v: usize) -> Self {
        let block = gcd(seq_len, DEFAULT_BLOCK);
        Self {
            seq_len,
            d_k,
            d_v,
            block_q: block,
            block_kv: block,
            logit_scaling: LogitScaling::default(),
            schedule: Schedule::default(),
        }
    }

    pub fn with_blocks(mut self, block_q: usize, block_kv: usize) -> Self {
        self.block_q = block_q;
        self.block_kv = block_kv;
        self
    }

    pub fn with_logit_scaling(mut self, scaling: LogitScaling) -> Self {
        self.logit_scaling = scaling;
        self
    }

    pub fn with_schedule(mut self, schedule: Schedule) -> Self {
        self.schedule = schedule;
        self
    }

    /// Reject every configuration error up front.
    pub fn validate(&self) -> Result<()> {
        if self.seq_len == 0 {
            return Err(QFlashError::InvalidConfig("seq_len must be > 0".into()));
        }
        if self.d_k == 0 || self.d_v == 0 {
            return Err(QFlashError::InvalidConfig(format!(
                "head dimensions must be > 0 (d_k = {}, d_v = {})",
                self.d_k, self.d_v
            )));
        }
        for (name, tile) in [("block_q", self.block_q), ("block_kv", self.block_kv)] {
            if tile == 0 || self.seq_len % tile != 0 {
                return Err(QFlashError::TileSize { name, tile, n: self.seq_len });
            }
        }
        if self.d_k > max_exact_dk() {
            return Err(QFlashError::AccumulatorOverflow { dk: self.d_k });
        }
        if let LogitScaling::Factor(f) = self.logit_scaling {
            if !(f.is_finite() && f > 0.0) {
                return Err(QFlashError::InvalidConfig(format!(
                    "logit scale factor must be finite and positive, got {f}"
                )));
            }
        }
        if let LogitScaling::RightShift(shift) = self.logit_scaling {
            if shift > 31 {
                return Err(QFlashError::InvalidConfig(format!(
                    "logit right-shift must be <= 31, got {shift}"
                )));
            }
        }
        if let Schedule::Pipelined { depth } = self.schedule {
            if depth == 0 {
                return Err(QFlashError::InvalidConfig("pipeline depth must be > 0".into()));
            }
        }
        Ok(())
    }

    /// Multiplier applied to every dot product.
    pub fn logit_scale(&self) -> f32 {
        self.logit_scaling.factor(self.d_k)
    }

    pub fn num_q_tiles(&self) -> usize {
        self.seq_len / self.block_q
    }

    pub fn num_kv_tiles(&self) -> usize {
        self.seq_len / self.block_kv
    }

    pub fn query_shape(&self) -> Shape {
        Shape::new(self.seq_len, self.d_k)
    }

    pub fn key_shape(&self) -> Shape {
        Shape::new(self.seq_len, self.d_k)
    }

    pub fn value_shape(&self) -> Shape {
        Shape::new(self.seq_len, self.d_v)
    }

    pub fn output_shape(&self) -> Shape {
        Shape::new(self.seq_len, self.d_v)
    }
}

fn gcd(a: usize, b: usize) -> usize {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}
