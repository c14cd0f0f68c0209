//! Seeded Q/K/V fixtures and their on-disk layout.

use std::path::Path;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

use qflash_core::{QFlashError, QuantizedTensor, Result, Tensor};
use qflash_kernels::quantize_rows;

use crate::io::{read_quantized, write_quantized};

pub const Q_DATA_FILE: &str = "Q_int8.bin";
pub const K_DATA_FILE: &str = "K_int8.bin";
pub const V_DATA_FILE: &str = "V_int8.bin";
pub const Q_SCALE_FILE: &str = "Q_scales.bin";
pub const K_SCALE_FILE: &str = "K_scales.bin";
pub const V_SCALE_FILE: &str = "V_scales.bin";
pub const OUTPUT_FILE: &str = "Output_tensor.bin";

/// Quantized Q, K and V for one attention problem.
#[derive(Debug, Clone, PartialEq)]
pub struct Fixture {
    pub q: QuantizedTensor,
    pub k: QuantizedTensor,
    pub v: QuantizedTensor,
}

impl Fixture {
    pub fn seq_len(&self) -> usize {
        self.q.rows()
    }

    pub fn d_k(&self) -> usize {
        self.q.cols()
    }

    pub fn d_v(&self) -> usize {
        self.v.cols()
    }

    /// Write the six input files into `dir`, creating it if needed.
    pub fn save(&self, dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir).map_err(|e| QFlashError::io(dir, e))?;
        write_quantized(dir.join(Q_DATA_FILE), dir.join(Q_SCALE_FILE), &self.q)?;
        write_quantized(dir.join(K_DATA_FILE), dir.join(K_SCALE_FILE), &self.k)?;
        write_quantized(dir.join(V_DATA_FILE), dir.join(V_SCALE_FILE), &self.v)?;
        info!(dir = %dir.display(), n = self.seq_len(), d_k = self.d_k(), d_v = self.d_v(), "fixture saved");
        Ok(())
    }

    /// Load the six input files from `dir` for the given shape.
    pub fn load(dir: impl AsRef<Path>, n: usize, d_k: usize, d_v: usize) -> Result<Self> {
        let dir = dir.as_ref();
        Ok(Self {
            q: read_quantized(dir.join(Q_DATA_FILE), dir.join(Q_SCALE_FILE), n, d_k)?,
            k: read_quantized(dir.join(K_DATA_FILE), dir.join(K_SCALE_FILE), n, d_k)?,
            v: read_quantized(dir.join(V_DATA_FILE), dir.join(V_SCALE_FILE), n, d_v)?,
        })
    }
}

fn uniform(rng: &mut StdRng, rows: usize, cols: usize) -> Tensor {
    Tensor::from_fn(rows, cols, |_, _| rng.gen_range(-1.0f32..1.0))
}

/// Uniform `[-1, 1)` Q, K, V quantized row by row. Deterministic per `seed`.
pub fn generate_fixture(n: usize, d_k: usize, d_v: usize, seed: u64) -> Fixture {
    let mut rng = StdRng::seed_from_u64(seed);
    let q = uniform(&mut rng, n, d_k);
    let k = uniform(&mut rng, n, d_k);
    let v = uniform(&mut rng, n, d_v);
    Fixture {
        q: quantize_rows(&q),
        k: quantize_rows(&k),
        v: quantize_rows(&v),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_is_deterministic() {
        let a = generate_fixture(8, 4, 6, 42);
        let b = generate_fixture(8, 4, 6, 42);
        let c = generate_fixture(8, 4, 6, 43);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!((a.seq_len(), a.d_k(), a.d_v()), (8, 4, 6));
    }

    #[test]
    fn test_rows_use_full_range() {
        let f = generate_fixture(16, 32, 32, 7);
        for r in 0..16 {
            assert!(f.q.row(r).iter().any(|&x| x.unsigned_abs() == 127));
            assert!(f.q.scale(r) > 0.0 && f.q.scale(r) <= 1.0 / 127.0 + 1e-6);
        }
    }

    #[test]
    fn test_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("fixture");
        let f = generate_fixture(4, 3, 2, 1);
        f.save(&target).unwrap();
        for name in [Q_DATA_FILE, K_DATA_FILE, V_DATA_FILE, Q_SCALE_FILE, K_SCALE_FILE, V_SCALE_FILE] {
            assert!(target.join(name).exists(), "{name} missing");
        }
        assert_eq!(Fixture::load(&target, 4, 3, 2).unwrap(), f);
    }
}
