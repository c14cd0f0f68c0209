//! Final normalization: `out[d] = O[d] / l`.

use qflash_core::{QFlashError, Result};

/// Divide a row's accumulated output by its softmax denominator.
///
/// `row` is the absolute query row, used only for error reporting. A zero
/// (or non-finite) denominator means no key/value block was folded for the row.
pub fn normalize_row(acc: &[f32], l: f32, out: &mut [f32], row: usize) -> Result<()> {
    debug_assert_eq!(acc.len(), out.len());
    if !(l > 0.0 && l.is_finite()) {
        return Err(QFlashError::ZeroDenominator { row });
    }
    for (o, &a) in out.iter_mut().zip(acc) {
        *o = a / l;
    }
    Ok(())
}
