//! # Covariance Matrix Calculations
//!
//! This module provides functions for calculating covariance matrices from
//! Jacobian matrices in nonlinear least-squares optimization, and for turning
//! them into standard errors.

use crate::error::{EddError, Result};
use crate::utils::matrix_convert::{nalgebra_to_ndarray, ndarray_to_nalgebra};
use ndarray::{Array1, Array2};

/// Calculate covariance matrix from Jacobian matrix.
///
/// For nonlinear least-squares problems, the covariance matrix is estimated as:
///   covar = redchi * inv(J^T * J)
/// where:
///   - J is the Jacobian matrix
///   - redchi is the reduced chi-square (chi^2 / dof)
///
/// # Errors
///
/// [`EddError::SingularMatrix`] when `J` is numerically rank-deficient: a
/// singular value at or below `max(m, n) * eps * s_max`, fewer rows than
/// columns, or a `J^T J` that Cholesky cannot factor. Such parameters are
/// not identified by the data.
pub fn calculate_covariance(jacobian: &Array2<f64>, redchi: f64) -> Result<Array2<f64>> {
    let (rows, cols) = jacobian.dim();
    if rows < cols {
        return Err(EddError::SingularMatrix);
    }
    let j = ndarray_to_nalgebra(jacobian);

    let singular = j.singular_values();
    let largest = singular.amax();
    let tolerance = rows.max(cols) as f64 * f64::EPSILON * largest;
    if !largest.is_finite() || singular.iter().any(|&s| s <= tolerance) {
        return Err(EddError::SingularMatrix);
    }

    let inverse = (j.transpose() * &j)
        .cholesky()
        .ok_or(EddError::SingularMatrix)?
        .inverse();
    if inverse.iter().any(|v| !v.is_finite()) {
        return Err(EddError::SingularMatrix);
    }

    Ok(nalgebra_to_ndarray(&inverse) * redchi)
}

/// Extract standard errors from the covariance matrix.
///
/// Standard errors are the square roots of the diagonal elements
/// of the covariance matrix.
pub fn standard_errors_from_covariance(covar: &Array2<f64>) -> Array1<f64> {
    covar
        .diag()
        .mapv(|v| if v > 0.0 { v.sqrt() } else { 0.0 })
}

/// First-order propagation of the covariance into a derived scalar.
///
/// `gradient` holds the partial derivatives of the derived quantity with
/// respect to each fitted parameter: `σ² = gᵀ C g`.
pub fn propagate_linear(gradient: &Array1<f64>, covar: &Array2<f64>) -> Result<f64> {
    if gradient.len() != covar.nrows() || covar.nrows() != covar.ncols() {
        return Err(EddError::DimensionMismatch(format!(
            "gradient of length {} against a {}x{} covariance",
            gradient.len(),
            covar.nrows(),
            covar.ncols()
        )));
    }
    let variance = gradient.dot(&covar.dot(gradient));
    Ok(if variance > 0.0 { variance.sqrt() } else { 0.0 })
}
