use std::fmt;

use crate::error::QFlashError;
use crate::shape::Shape;
use crate::Result;

/// A dense row-major f32 matrix.
///
/// Used for full-precision inputs before quantization, for the engine's
/// output, and for the unquantized baseline operands.
///
/// # Examples
///
/// ```
/// use qflash_core::Tensor;
///
/// let t = Tensor::from_f32(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]);
/// assert_eq!(t.shape().dims(), [2, 3]);
/// assert_eq!(t.row(1), &[4.0, 5.0, 6.0]);
/// ```
#[derive(Clone, PartialEq)]
pub struct Tensor {
    data: Vec<f32>,
    shape: Shape,
}

impl Tensor {
    /// Create a tensor from f32 data with the given `[rows, cols]` shape.
    ///
    /// Panics if `data.len()` does not match the shape; use
    /// [`Tensor::from_vec`] for fallible construction.
    pub fn from_f32(data: &[f32], shape: &[usize; 2]) -> Self {
        let s = Shape::from(*shape);
        assert_eq!(
            s.numel(),
            data.len(),
            "Shape {} requires {} elements, got {}",
            s,
            s.numel(),
            data.len()
        );
        Self {
            data: data.to_vec(),
            shape: s,
        }
    }

    /// Take ownership of `data` as a `rows x cols` matrix.
    pub fn from_vec(data: Vec<f32>, rows: usize, cols: usize) -> Result<Self> {
        let shape = Shape::new(rows, cols);
        if data.len() != shape.numel() {
            return Err(QFlashError::ShapeMismatch {
                expected: shape,
                got: Shape::new(1, data.len()),
            });
        }
        Ok(Self { data, shape })
    }

    /// Create a `rows x cols` matrix of zeros.
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            data: vec![0.0; rows * cols],
            shape: Shape::new(rows, cols),
        }
    }

    /// Build a matrix element by element.
    pub fn from_fn(rows: usize, cols: usize, mut f: impl FnMut(usize, usize) -> f32) -> Self {
        let mut data = Vec::with_capacity(rows * cols);
        for r in 0..rows {
            for c in 0..cols {
                data.push(f(r, c));
            }
        }
        Self {
            data,
            shape: Shape::new(rows, cols),
        }
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn rows(&self) -> usize {
        self.shape.rows()
    }

    pub fn cols(&self) -> usize {
        self.shape.cols()
    }

    pub fn numel(&self) -> usize {
        self.data.len()
    }

    /// Flat row-major view of the data.
    pub fn as_f32_slice(&self) -> &[f32] {
        &self.data
    }

    /// Row `row` as a slice of `cols` elements.
    #[inline]
    pub fn row(&self, row: usize) -> &[f32] {
        &self.data[self.shape.row_range(row)]
    }

    #[inline]
    pub fn row_mut(&mut self, row: usize) -> &mut [f32] {
        let range = self.shape.row_range(row);
        &mut self.data[range]
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.data[self.shape.offset(row, col)]
    }

    /// Largest element-wise absolute difference to `other`.
    pub fn max_abs_diff(&self, other: &Tensor) -> Result<f32> {
        if self.shape != other.shape {
            return Err(QFlashError::ShapeMismatch {
                expected: self.shape,
                got: other.shape,
            });
        }
        Ok(self
            .data
            .iter()
            .zip(&other.data)
            .map(|(a, b)| (a - b).abs())
            .fold(0.0f32, f32::max))
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tensor(shape={}", self.shape)?;
        if self.data.len() <= 16 {
            write!(f, ", data={:?}", self.data)?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_f32() {
        let t = Tensor::from_f32(&[1.0, 2.0, 3.0, 4.0], &[2, 2]);
        assert_eq!(t.rows(), 2);
        assert_eq!(t.cols(), 2);
        assert_eq!(t.numel(), 4);
        assert_eq!(t.get(1, 0), 3.0);
    }

    #[test]
    #[should_panic(expected = "requires 6 elements")]
    fn test_from_f32_wrong_len() {
        let _ = Tensor::from_f32(&[1.0, 2.0], &[2, 3]);
    }

    #[test]
    fn test_from_vec_checks_len() {
        assert!(Tensor::from_vec(vec![0.0; 6], 2, 3).is_ok());
        let err = Tensor::from_vec(vec![0.0; 5], 2, 3).unwrap_err();
        assert!(matches!(err, QFlashError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_rows() {
        let mut t = Tensor::from_fn(3, 2, |r, c| (r * 10 + c) as f32);
        assert_eq!(t.row(2), &[20.0, 21.0]);
        t.row_mut(0)[1] = -1.0;
        assert_eq!(&t.as_f32_slice()[..2], &[0.0, -1.0]);
    }

    #[test]
    fn test_max_abs_diff() {
        let a = Tensor::from_f32(&[1.0, 2.0, 3.0, 4.0], &[2, 2]);
        let b = Tensor::from_f32(&[1.0, 2.5, 2.0, 4.0], &[2, 2]);
        assert_eq!(a.max_abs_diff(&b).unwrap(), 1.0);
        assert!(a.max_abs_diff(&Tensor::zeros(4, 1)).is_err());
    }
}
