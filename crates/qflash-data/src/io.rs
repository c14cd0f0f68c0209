//! Raw tensor files.
//!
//! Every file is a flat, headerless, row-major array in native byte order:
//! `i8` for quantized data and `f32` for scales and float tensors. No shape
//! is stored; callers supply it.

use std::fs;
use std::path::Path;

use bytemuck::Pod;
use tracing::{debug, warn};

use qflash_core::{QFlashError, QuantizedTensor, Result, Tensor};

/// Read exactly `count` elements of `T` from the front of `path`.
fn read_elements<T: Pod>(path: &Path, count: usize) -> Result<Vec<T>> {
    let bytes = fs::read(path).map_err(|e| QFlashError::io(path, e))?;
    let width = std::mem::size_of::<T>();
    let needed = count * width;

    if bytes.len() < needed {
        return Err(QFlashError::ShortRead {
            path: path.to_path_buf(),
            expected: needed,
            got: bytes.len(),
        });
    }
    if bytes.len() > needed {
        warn!(
            path = %path.display(),
            expected = needed,
            actual = bytes.len(),
            "ignoring trailing bytes"
        );
    }

    // Copy into a properly aligned buffer.
    let mut out = vec![T::zeroed(); count];
    bytemuck::cast_slice_mut::<T, u8>(&mut out).copy_from_slice(&bytes[..needed]);
    debug!(path = %path.display(), elements = count, "read tensor file");
    Ok(out)
}

fn write_elements<T: Pod>(path: &Path, data: &[T]) -> Result<()> {
    fs::write(path, bytemuck::cast_slice::<T, u8>(data)).map_err(|e| QFlashError::io(path, e))?;
    debug!(path = %path.display(), elements = data.len(), "wrote tensor file");
    Ok(())
}

/// Read a `rows x cols` INT8 matrix.
pub fn read_i8_tensor(path: impl AsRef<Path>, rows: usize, cols: usize) -> Result<Vec<i8>> {
    read_elements(path.as_ref(), rows * cols)
}

/// Read `rows` per-row scale factors.
pub fn read_scales(path: impl AsRef<Path>, rows: usize) -> Result<Vec<f32>> {
    read_elements(path.as_ref(), rows)
}

/// Read a `rows x cols` f32 matrix.
pub fn read_f32_tensor(path: impl AsRef<Path>, rows: usize, cols: usize) -> Result<Tensor> {
    let data = read_elements(path.as_ref(), rows * cols)?;
    Tensor::from_vec(data, rows, cols)
}

/// Read an INT8 matrix and its scale file into a validated [`QuantizedTensor`].
pub fn read_quantized(
    data_path: impl AsRef<Path>,
    scale_path: impl AsRef<Path>,
    rows: usize,
    cols: usize,
) -> Result<QuantizedTensor> {
    let data = read_i8_tensor(data_path, rows, cols)?;
    let scales = read_scales(scale_path, rows)?;
    QuantizedTensor::new(data, scales, rows, cols)
}

pub fn write_i8_tensor(path: impl AsRef<Path>, data: &[i8]) -> Result<()> {
    write_elements(path.as_ref(), data)
}

pub fn write_scales(path: impl AsRef<Path>, scales: &[f32]) -> Result<()> {
    write_elements(path.as_ref(), scales)
}

pub fn write_f32_tensor(path: impl AsRef<Path>, tensor: &Tensor) -> Result<()> {
    write_elements(path.as_ref(), tensor.as_f32_slice())
}

/// Write the data and scale files of `tensor`.
pub fn write_quantized(
    data_path: impl AsRef<Path>,
    scale_path: impl AsRef<Path>,
    tensor: &QuantizedTensor,
) -> Result<()> {
    write_i8_tensor(data_path, tensor.data())?;
    write_scales(scale_path, tensor.scales())
}
