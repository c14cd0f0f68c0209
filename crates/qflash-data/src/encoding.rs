//! Output encodings.
//!
//! `Fixed16` is a signed 16-bit fixed-point format with 5 integer bits
//! (sign included) and 11 fractional bits, covering `[-16, 16)` in steps of
//! `2^-11`. Encoding truncates toward negative infinity and saturates.

use std::path::Path;

use serde::{Deserialize, Serialize};

use qflash_core::{QFlashError, Result, Tensor};

use crate::io::write_f32_tensor;

/// Fractional bits of [`OutputEncoding::Fixed16`].
pub const FIXED16_FRAC_BITS: u32 = 11;

const FIXED16_ONE: f32 = (1u32 << FIXED16_FRAC_BITS) as f32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputEncoding {
    #[default]
    F32,
    Fixed16,
}

impl OutputEncoding {
    /// Bytes per element on disk.
    pub fn width(&self) -> usize {
        match self {
            OutputEncoding::F32 => 4,
            OutputEncoding::Fixed16 => 2,
        }
    }

    /// Write `tensor` to `path` in this encoding.
    pub fn write(&self, path: impl AsRef<Path>, tensor: &Tensor) -> Result<()> {
        let path = path.as_ref();
        match self {
            OutputEncoding::F32 => write_f32_tensor(path, tensor),
            OutputEncoding::Fixed16 => {
                let encoded: Vec<i16> = tensor.as_f32_slice().iter().map(|&x| encode_fixed16(x)).collect();
                std::fs::write(path, bytemuck::cast_slice::<i16, u8>(&encoded))
                    .map_err(|e| QFlashError::io(path, e))
            }
        }
    }
}

/// `floor(x * 2^11)`, saturated to the `i16` range. NaN encodes as 0.
pub fn encode_fixed16(x: f32) -> i16 {
    if x.is_nan() {
        return 0;
    }
    // `as` saturates float-to-int conversions.
    (x * FIXED16_ONE).floor() as i16
}

pub fn decode_fixed16(v: i16) -> f32 {
    v as f32 / FIXED16_ONE
}
