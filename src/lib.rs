//! # qflash
//!
//! INT8 blocked ("flash") attention with online softmax.
//!
//! ```no_run
//! use qflash::attention::{AttentionConfig, BlockedAttentionEngine};
//! use qflash::data::generate_fixture;
//!
//! let fixture = generate_fixture(64, 32, 32, 7);
//! let engine = BlockedAttentionEngine::new(AttentionConfig::new(64, 32, 32)).unwrap();
//! let out = engine.compute(&fixture.q, &fixture.k, &fixture.v).unwrap();
//! assert_eq!(out.shape().dims(), [64, 32]);
//! ```

pub use qflash_attention as attention;
pub use qflash_core as core;
pub use qflash_data as data;
pub use qflash_kernels as kernels;

pub use qflash_attention::{compute_attention, AttentionConfig, BlockedAttentionEngine};
pub use qflash_core::{QFlashError, QuantizedTensor, Result, Tensor};
