use std::path::PathBuf;

use crate::shape::Shape;

/// Errors raised by qflash.
///
/// Every error is fatal for the computation that raised it: nothing is
/// retried and no partial output is returned.
#[derive(Debug, thiserror::Error)]
pub enum QFlashError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{name} = {tile} does not evenly divide sequence length {n}")]
    TileSize {
        name: &'static str,
        tile: usize,
        n: usize,
    },

    #[error("shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch { expected: Shape, got: Shape },

    #[error("scale vector has {got} entries, expected one per row ({expected})")]
    ScaleLength { expected: usize, got: usize },

    #[error("scale for row {row} must be finite and positive, got {scale}")]
    InvalidScale { row: usize, scale: f32 },

    #[error("d_k = {dk} can overflow the i32 dot-product accumulator (|sum| <= d_k * 128 * 128)")]
    AccumulatorOverflow { dk: usize },

    #[error("score of query row {row} against key row {key} is {score}; rescaled dot product left the f32 range")]
    NonFiniteScore { row: usize, key: usize, score: f32 },

    #[error("softmax denominator for row {row} is zero; no key/value blocks were folded")]
    ZeroDenominator { row: usize },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{} holds {got} bytes, expected at least {expected}", path.display())]
    ShortRead {
        path: PathBuf,
        expected: usize,
        got: usize,
    },

    #[error("pipeline stage failed: {0}")]
    Pipeline(String),

    /// A pipeline stage stopped because a neighbour exited. The neighbour's
    /// own error is the cause.
    #[error("pipeline {stage} stage: neighbouring stage hung up")]
    StageDisconnected { stage: &'static str },
}

impl QFlashError {
    /// Attach a path to an `std::io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        QFlashError::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error stems from a rejected configuration rather than data or I/O.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            QFlashError::InvalidConfig(_)
                | QFlashError::TileSize { .. }
                | QFlashError::ShapeMismatch { .. }
                | QFlashError::AccumulatorOverflow { .. }
        )
    }
}
