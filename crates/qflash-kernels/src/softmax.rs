//! Online (streaming) softmax over key/value blocks.
//!
//! Per query row the recurrence keeps a running max `m` and a running
//! denominator `l`. For every block, in key/value tile order:
//!
//! ```text
//! m_new      = max(m_prev, rowmax(S))
//! correction = exp(m_prev - m_new)          in (0, 1], 0 for the first block
//! P[c]       = exp(S[c] - m_new)            in (0, 1]
//! l_new      = l_prev * correction + sum(P)
//! ```
//!
//! The same `correction` must rescale the output accumulator of that row.

/// Initial running max. Below every finite score, so the first block's
/// correction is exactly zero.
pub const M_INIT: f32 = f32::NEG_INFINITY;

/// Running softmax statistics of one query row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SoftmaxState {
    m: f32,
    l: f32,
}

/// Result of folding one block into a [`SoftmaxState`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SoftmaxStep {
    pub m_new: f32,
    pub l_new: f32,
    /// Factor to apply to everything accumulated before this block.
    pub correction: f32,
    /// Sum of this block's unnormalized probabilities.
    pub p_sum: f32,
}

impl Default for SoftmaxState {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftmaxState {
    pub const fn new() -> Self {
        Self { m: M_INIT, l: 0.0 }
    }

    /// Running max `m`.
    pub fn max(&self) -> f32 {
        self.m
    }

    /// Running denominator `l`.
    pub fn sum(&self) -> f32 {
        self.l
    }

    /// Whether no block with a finite score has been folded yet.
    pub fn is_empty(&self) -> bool {
        self.m == M_INIT
    }

    /// Fold one block of scores, writing its probabilities into `probs`.
    ///
    /// `row_max` must be the maximum of `scores`. Blocks must arrive in
    /// key/value tile order: each step depends on the previous `(m, l)`.
    pub fn update(&mut self, scores: &[f32], row_max: f32, probs: &mut [f32]) -> SoftmaxStep {
        debug_assert_eq!(scores.len(), probs.len());

        let m_prev = self.m;
        let m_new = m_prev.max(row_max);

        if m_new == M_INIT {
            // Every score so far is -inf: nothing contributes yet.
            probs.iter_mut().for_each(|p| *p = 0.0);
            return SoftmaxStep {
                m_new,
                l_new: self.l,
                correction: 1.0,
                p_sum: 0.0,
            };
        }

        let correction = (m_prev - m_new).exp();

        let mut p_sum = 0.0f32;
        for (p, &s) in probs.iter_mut().zip(scores) {
            *p = (s - m_new).exp();
            p_sum += *p;
        }

        self.l = self.l * correction + p_sum;
        self.m = m_new;

        SoftmaxStep {
            m_new,
            l_new: self.l,
            correction,
            p_sum,
        }
    }
}
