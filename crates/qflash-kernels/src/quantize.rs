//! Per-row symmetric INT8 quantization.
//!
//! For each row: `scale = max|x| / 127` (or `1.0` for an all-zero row) and
//! `q = clamp(round(x / scale), -127, 127)`. Dequantization is `q * scale`,
//! so every element satisfies `|x - q * scale| <= scale / 2`.

use rayon::prelude::*;

use qflash_core::{QuantizedTensor, Tensor, QMAX};

/// Minimum rows before quantization fans out over rayon.
const PAR_ROW_THRESHOLD: usize = 64;

/// Quantize one row into `out`, returning its scale.
///
/// Non-finite inputs do not poison the scale: the maximum is taken over
/// finite values only, NaN quantizes to 0 and ±inf saturates to ±127.
pub fn quantize_row(row: &[f32], out: &mut [i8]) -> f32 {
    debug_assert_eq!(row.len(), out.len());

    let max_abs = row
        .iter()
        .filter(|x| x.is_finite())
        .map(|x| x.abs())
        .fold(0.0f32, f32::max);
    let scale = if max_abs > 0.0 { max_abs / QMAX as f32 } else { 1.0 };

    let qmax = QMAX as f32;
    for (o, &x) in out.iter_mut().zip(row) {
        // `as i8` maps NaN to 0 after the clamp leaves it untouched.
        *o = (x / scale).round().clamp(-qmax, qmax) as i8;
    }
    scale
}

/// Quantize every row of `src` with its own scale.
pub fn quantize_rows(src: &Tensor) -> QuantizedTensor {
    let rows = src.rows();
    let cols = src.cols();
    let mut data = vec![0i8; rows * cols];
    let mut scales = vec![1.0f32; rows];

    if cols > 0 {
        if rows >= PAR_ROW_THRESHOLD {
            data.par_chunks_mut(cols)
                .zip(scales.par_iter_mut())
                .enumerate()
                .for_each(|(r, (q_row, scale))| {
                    *scale = quantize_row(src.row(r), q_row);
                });
        } else {
            for (r, (q_row, scale)) in data.chunks_mut(cols).zip(scales.iter_mut()).enumerate() {
                *scale = quantize_row(src.row(r), q_row);
            }
        }
    }

    // Scales are finite and positive by construction, and the lengths match.
    match QuantizedTensor::new(data, scales, rows, cols) {
        Ok(q) => q,
        Err(e) => unreachable!("quantize_rows produced an invalid tensor: {e}"),
    }
}
