//! Finite difference methods for numerical differentiation.
//!
//! This module provides functions for computing derivatives and Jacobians
//! using finite difference approximations.

use crate::error::{EddError, Result};
use crate::problem::Problem;
use ndarray::{Array1, Array2};

/// Default step size for finite differences.
const DEFAULT_EPSILON: f64 = 1e-8;

/// Default relative step for central differences of smooth scalar functions.
const CENTRAL_EPSILON: f64 = 1e-6;

/// Scale a step size to the magnitude of the value being perturbed.
fn scaled_step(value: f64, eps: f64) -> f64 {
    if value.abs() > 1.0 {
        value.abs() * eps
    } else {
        eps
    }
}

/// Compute the Jacobian matrix using forward finite differences.
///
/// The Jacobian is the matrix of partial derivatives of the residuals with
/// respect to the parameters: J[i,j] = ∂residual[i]/∂param[j].
///
/// # Arguments
///
/// * `problem` - The problem to evaluate
/// * `params` - The parameter values at which to evaluate the Jacobian
/// * `epsilon` - The step size for finite differences (optional)
pub fn jacobian(
    problem: &dyn Problem,
    params: &Array1<f64>,
    epsilon: Option<f64>,
) -> Result<Array2<f64>> {
    let eps = epsilon.unwrap_or(DEFAULT_EPSILON);
    let n_params = params.len();
    let n_residuals = problem.residual_count();

    let residuals = problem.eval(params)?;
    if residuals.len() != n_residuals {
        return Err(EddError::DimensionMismatch(format!(
            "Expected {} residuals, got {}",
            n_residuals,
            residuals.len()
        )));
    }

    let mut jac = Array2::zeros((n_residuals, n_params));

    for j in 0..n_params {
        let mut params_perturbed = params.clone();
        let eps_j = scaled_step(params[j], eps);
        params_perturbed[j] += eps_j;

        let residuals_perturbed = problem.eval(&params_perturbed)?;

        for i in 0..n_residuals {
            jac[[i, j]] = (residuals_perturbed[i] - residuals[i]) / eps_j;
        }
    }

    Ok(jac)
}

/// Derivative of a scalar function of one variable by central differences.
///
/// Used for first-order propagation of an uncertainty through a closed-form
/// transform.
pub fn derivative<F>(f: F, x: f64, epsilon: Option<f64>) -> f64
where
    F: Fn(f64) -> f64,
{
    let h = scaled_step(x, epsilon.unwrap_or(CENTRAL_EPSILON));
    (f(x + h) - f(x - h)) / (2.0 * h)
}
