use nalgebra::{DMatrix, DVector};
use tracing::trace;

use crate::error::ValidationError;

/// Lower bound applied to every precision-matrix element.
pub const MIN_PRECISION: f64 = 0.01;
/// Upper bound applied to every precision-matrix element.
pub const MAX_PRECISION: f64 = 100.0;

const PSEUDO_INVERSE_EPS: f64 = 1e-10;

/// Gaussian belief parameterised by a mean and a precision (inverse
/// covariance) matrix.
///
/// A `BeliefState` is immutable once built. Entropy and covariance are
/// derived on demand.
///
/// # Examples
///
/// ```
/// use ponder::BeliefState;
///
/// let belief = BeliefState::new(vec![0.0], vec![vec![1.0]]).unwrap();
/// let expected = 0.5 * (2.0 * std::f64::consts::PI * std::f64::consts::E).ln();
/// assert!((belief.entropy() - expected).abs() < 1e-9);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct BeliefState {
    mean: DVector<f64>,
    precision: DMatrix<f64>,
}

impl BeliefState {
    /// Build a belief from a mean vector and a row-major precision matrix.
    ///
    /// # Errors
    ///
    /// Fails when the matrix is not square or its size differs from the mean.
    /// Out-of-range precision values are clamped rather than rejected.
    pub fn new(mean: Vec<f64>, precision: Vec<Vec<f64>>) -> Result<Self, ValidationError> {
        let rows = precision.len();
        if let Some(cols) = precision.iter().map(Vec::len).find(|len| *len != rows) {
            return Err(ValidationError::NonSquarePrecision { rows, cols });
        }
        let matrix = DMatrix::from_fn(rows, rows, |i, j| precision[i][j]);
        Self::from_parts(DVector::from_vec(mean), matrix)
    }

    /// Build a belief from `nalgebra` parts, applying the same validation as
    /// [`BeliefState::new`].
    pub fn from_parts(
        mean: DVector<f64>,
        precision: DMatrix<f64>,
    ) -> Result<Self, ValidationError> {
        if !precision.is_square() {
            return Err(ValidationError::NonSquarePrecision {
                rows: precision.nrows(),
                cols: precision.ncols(),
            });
        }
        if precision.nrows() != mean.len() {
            return Err(ValidationError::DimensionMismatch {
                mean: mean.len(),
                rows: precision.nrows(),
                cols: precision.ncols(),
            });
        }
        let precision = precision.map(clamp_precision);
        Ok(Self { mean, precision })
    }

    /// Belief with `precision` on the diagonal. Off-diagonal entries take the
    /// minimum precision bound.
    pub fn isotropic(mean: Vec<f64>, precision: f64) -> Self {
        let n = mean.len();
        let matrix = DMatrix::from_fn(n, n, |i, j| if i == j { precision } else { 0.0 });
        Self {
            mean: DVector::from_vec(mean),
            precision: matrix.map(clamp_precision),
        }
    }

    pub fn dimension(&self) -> usize {
        self.mean.len()
    }

    pub fn mean(&self) -> &DVector<f64> {
        &self.mean
    }

    pub fn precision(&self) -> &DMatrix<f64> {
        &self.precision
    }

    /// Sum of the diagonal precision entries.
    pub fn precision_trace(&self) -> f64 {
        self.precision.trace()
    }

    /// Covariance matrix. Falls back to the pseudo-inverse when the precision
    /// matrix is singular.
    pub fn covariance(&self) -> DMatrix<f64> {
        if let Some(inv) = self.precision.clone().try_inverse() {
            return inv;
        }
        trace!(dim = self.dimension(), "singular precision; using pseudo-inverse");
        let n = self.dimension();
        self.precision
            .clone()
            .pseudo_inverse(PSEUDO_INVERSE_EPS)
            .unwrap_or_else(|_| DMatrix::zeros(n, n))
    }

    /// Natural log of the precision determinant, or `None` when the
    /// determinant is not positive.
    pub fn log_det_precision(&self) -> Option<f64> {
        let det = self.precision.determinant();
        (det.is_finite() && det > 0.0).then(|| det.ln())
    }

    /// Differential entropy in nats.
    ///
    /// Returns `f64::INFINITY` when the precision determinant is not positive,
    /// meaning the belief is maximally uncertain.
    pub fn entropy(&self) -> f64 {
        let Some(log_det) = self.log_det_precision() else {
            return f64::INFINITY;
        };
        let k = self.dimension() as f64;
        0.5 * (k * (2.0 * std::f64::consts::PI * std::f64::consts::E).ln() - log_det)
    }

    /// KL divergence `KL(self || other)` between two Gaussian beliefs.
    ///
    /// Uses the closed form with trace, quadratic and log-determinant terms.
    /// Degenerate beliefs give `0.0`; the result is never negative.
    ///
    /// # Errors
    ///
    /// Fails when the dimensions differ.
    pub fn kl_divergence(&self, other: &BeliefState) -> Result<f64, ValidationError> {
        if self.dimension() != other.dimension() {
            return Err(ValidationError::DimensionMismatch {
                mean: self.dimension(),
                rows: other.dimension(),
                cols: other.dimension(),
            });
        }
        let (Some(log_det_self), Some(log_det_other)) =
            (self.log_det_precision(), other.log_det_precision())
        else {
            return Ok(0.0);
        };
        let k = self.dimension() as f64;
        let trace_term = (&other.precision * self.covariance()).trace();
        let diff = &other.mean - &self.mean;
        let quadratic = diff.dot(&(&other.precision * &diff));
        let kl = 0.5 * (trace_term + quadratic - k + log_det_self - log_det_other);
        Ok(if kl.is_finite() { kl.max(0.0) } else { 0.0 })
    }
}

fn clamp_precision(value: f64) -> f64 {
    if value.is_nan() {
        MIN_PRECISION
    } else {
        value.clamp(MIN_PRECISION, MAX_PRECISION)
    }
}
