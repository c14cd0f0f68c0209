//! # qflash-attention
//!
//! Blocked ("flash") scaled dot-product attention over INT8 Q/K/V.
//!
//! Provides:
//! - `AttentionConfig` with explicit tile sizes, logit scaling and schedule
//! - `BlockedAttentionEngine`: query tiles x key/value tiles with online softmax
//! - Sequential, rayon-parallel and staged-pipeline schedules (numerically equivalent)
//! - A full-precision reference and error metrics for acceptance testing

pub mod config;
pub mod engine;
pub mod metrics;
pub mod pipeline;
pub mod reference;
mod tile;

pub use config::{AttentionConfig, LogitScaling, Schedule};
pub use engine::{compute_attention, BlockedAttentionEngine};
pub use metrics::{compare, ErrorReport, Verdict};
pub use reference::reference_attention;
