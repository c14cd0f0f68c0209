//! Error metrics between the engine output and the reference.

use std::fmt;

use serde::Serialize;

use qflash_core::{QFlashError, Result, Tensor};

/// RMSE below which a run passes.
pub const PASS_RMSE: f64 = 0.1;
/// RMSE below which a run is marginal rather than failed.
pub const MARGINAL_RMSE: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Verdict {
    Pass,
    Marginal,
    Fail,
}

impl Verdict {
    pub fn from_rmse(rmse: f64) -> Self {
        if rmse < PASS_RMSE {
            Verdict::Pass
        } else if rmse < MARGINAL_RMSE {
            Verdict::Marginal
        } else {
            Verdict::Fail
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Pass => write!(f, "PASSED (RMSE < {PASS_RMSE})"),
            Verdict::Marginal => write!(f, "MARGINAL ({PASS_RMSE} <= RMSE < {MARGINAL_RMSE})"),
            Verdict::Fail => write!(f, "FAILED (RMSE >= {MARGINAL_RMSE})"),
        }
    }
}

/// Element-wise comparison of an output against a reference.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ErrorReport {
    pub mse: f64,
    pub rmse: f64,
    pub max_abs_error: f64,
    /// `(row, col)` of the largest absolute error.
    pub max_error_at: (usize, usize),
    pub engine_value: f32,
    pub reference_value: f32,
}

impl ErrorReport {
    pub fn verdict(&self) -> Verdict {
        Verdict::from_rmse(self.rmse)
    }
}

/// Compare `engine` against `reference`, accumulating in f64.
pub fn compare(engine: &Tensor, reference: &Tensor) -> Result<ErrorReport> {
    if engine.shape() != reference.shape() {
        return Err(QFlashError::ShapeMismatch {
            expected: reference.shape(),
            got: engine.shape(),
        });
    }
    let n = engine.numel();
    if n == 0 {
        return Err(QFlashError::InvalidConfig("cannot compare empty tensors".into()));
    }

    let cols = engine.cols();
    let mut sq_sum = 0.0f64;
    let mut max_abs_error = 0.0f64;
    let mut max_idx = 0usize;
    for (i, (&e, &r)) in engine.as_f32_slice().iter().zip(reference.as_f32_slice()).enumerate() {
        let err = e as f64 - r as f64;
        sq_sum += err * err;
        if err.abs() > max_abs_error {
            max_abs_error = err.abs();
            max_idx = i;
        }
    }

    let mse = sq_sum / n as f64;
    Ok(ErrorReport {
        mse,
        rmse: mse.sqrt(),
        max_abs_error,
        max_error_at: (max_idx / cols, max_idx % cols),
        engine_value: engine.as_f32_slice()[max_idx],
        reference_value: reference.as_f32_slice()[max_idx],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compare() {
        let a = Tensor::from_f32(&[1.0, 2.0, 3.0, 4.0], &[2, 2]);
        let b = Tensor::from_f32(&[1.0, 2.0, 3.0, 2.0], &[2, 2]);
        let report = compare(&a, &b).unwrap();
        assert!((report.mse - 1.0).abs() < 1e-12);
        assert!((report.rmse - 1.0).abs() < 1e-12);
        assert_eq!(report.max_abs_error, 2.0);
        assert_eq!(report.max_error_at, (1, 1));
        assert_eq!(report.engine_value, 4.0);
        assert_eq!(report.reference_value, 2.0);
        assert_eq!(report.verdict(), Verdict::Fail);
    }

    #[test]
    fn test_identical_pass() {
        let a = Tensor::from_fn(3, 3, |r, c| (r * c) as f32);
        let report = compare(&a, &a).unwrap();
        assert_eq!(report.rmse, 0.0);
        assert_eq!(report.verdict(), Verdict::Pass);
    }

    #[test]
    fn test_verdict_thresholds() {
        assert_eq!(Verdict::from_rmse(0.099), Verdict::Pass);
        assert_eq!(Verdict::from_rmse(0.1), Verdict::Marginal);
        assert_eq!(Verdict::from_rmse(0.5), Verdict::Fail);
    }

    #[test]
    fn test_shape_mismatch() {
        assert!(compare(&Tensor::zeros(2, 2), &Tensor::zeros(2, 3)).is_err());
    }
}
