//! Implementation of the Levenberg-Marquardt algorithm.
//!
//! The damped normal equations `(JᵀJ + λ·diag(JᵀJ)) δ = −Jᵀr` are solved by
//! Cholesky decomposition. The damping term is scaled by the diagonal of `JᵀJ`
//! since peak parameters span very different magnitudes (intensities in the
//! thousands, shape factors below one).

use nalgebra::{DMatrix, DVector};
use ndarray::{Array1, Array2};
use std::fmt;

use crate::error::{EddError, Result};
use crate::problem::Problem;
use crate::utils::matrix_convert::{
    nalgebra_vec_to_ndarray, ndarray_to_nalgebra, ndarray_vec_to_nalgebra,
};

use super::config::LmConfig;

/// Floor applied to the diagonal scaling so that parameters with a vanishing
/// column in the Jacobian still receive damping.
const MIN_DIAGONAL: f64 = 1e-12;

/// Result of the Levenberg-Marquardt optimization.
#[derive(Debug, Clone)]
pub struct LmResult {
    /// Optimized parameter values
    pub params: Array1<f64>,

    /// Residuals at the solution
    pub residuals: Array1<f64>,

    /// Sum of squared residuals
    pub cost: f64,

    /// Number of accepted iterations
    pub iterations: usize,

    /// Number of residual evaluations
    pub func_evals: usize,

    /// Whether the optimization converged
    pub success: bool,

    /// A message describing the result
    pub message: String,

    /// The Jacobian matrix at the solution
    pub jacobian: Array2<f64>,
}

impl fmt::Display for LmResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Optimization Result:")?;
        writeln!(f, "  Success: {}", self.success)?;
        writeln!(f, "  Message: {}", self.message)?;
        writeln!(f, "  Cost: {:.6e}", self.cost)?;
        writeln!(f, "  Iterations: {}", self.iterations)?;
        writeln!(f, "  Function evaluations: {}", self.func_evals)?;
        writeln!(f, "  Parameters: {:?}", self.params)?;
        Ok(())
    }
}

/// Status of the iteration.
enum IterationStatus {
    /// Continue iteration
    Continue,

    /// Converged successfully
    Converged(String),

    /// Failed to converge
    Failed(String),
}

/// The Levenberg-Marquardt optimizer.
#[derive(Debug, Clone, Default)]
pub struct LevenbergMarquardt {
    config: LmConfig,
}

impl LevenbergMarquardt {
    /// Create a new Levenberg-Marquardt optimizer with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new Levenberg-Marquardt optimizer with the given configuration.
    pub fn with_config(config: LmConfig) -> Self {
        Self { config }
    }

    /// Minimize the sum of squared residuals for the given problem.
    ///
    /// Returns `Ok` with `success == false` when the iteration budget is
    /// exhausted. A non-finite cost at the initial guess is an error; non-finite
    /// trial steps are rejected like any other uphill step.
    pub fn minimize<P: Problem>(&self, problem: &P, initial_params: Array1<f64>) -> Result<LmResult> {
        let n_params = problem.parameter_count();
        if initial_params.len() != n_params {
            return Err(EddError::DimensionMismatch(format!(
                "Expected {} parameters, got {}",
                n_params,
                initial_params.len()
            )));
        }

        let mut params = initial_params;
        problem.project(&mut params);
        let mut lambda = self.config.initial_lambda;

        let mut residuals = problem.eval(&params)?;
        let mut cost: f64 = residuals.iter().map(|r| r.powi(2)).sum();
        let mut func_evals = 1;
        if !cost.is_finite() {
            return Err(EddError::FitConvergence(
                "non-finite cost at the initial guess".to_string(),
            ));
        }

        let mut iterations = 0;

        loop {
            let jacobian = problem.jacobian(&params)?;
            if !problem.has_custom_jacobian() {
                func_evals += n_params;
            }
            let j = ndarray_to_nalgebra(&jacobian);
            let r = ndarray_vec_to_nalgebra(&residuals);

            let jtj = j.transpose() * &j;
            let g = j.transpose() * &r;

            // Check gradient convergence
            let gradient_norm = g.amax();
            if cost == 0.0 || gradient_norm <= self.config.gtol {
                return Ok(self.finish(
                    params,
                    residuals,
                    cost,
                    iterations,
                    func_evals,
                    true,
                    format!(
                        "Gradient convergence: ||g|| = {:.2e} <= {:.2e}",
                        gradient_norm, self.config.gtol
                    ),
                    jacobian,
                ));
            }

            if iterations >= self.config.max_iterations {
                return Ok(self.finish(
                    params,
                    residuals,
                    cost,
                    iterations,
                    func_evals,
                    false,
                    format!("Maximum iterations ({}) reached", self.config.max_iterations),
                    jacobian,
                ));
            }

            // Inner loop: raise lambda until a step decreases the cost
            let status = loop {
                let step = match self.calculate_step(&jtj, &g, lambda) {
                    Some(step) => step,
                    None => {
                        lambda *= self.config.lambda_up_factor;
                        if lambda > self.config.max_lambda {
                            break IterationStatus::Failed(
                                "Damped normal equations are singular".to_string(),
                            );
                        }
                        continue;
                    }
                };

                let mut new_params = &params + &nalgebra_vec_to_ndarray(&step);
                problem.project(&mut new_params);

                let new_residuals = problem.eval(&new_params)?;
                func_evals += 1;
                let new_cost: f64 = new_residuals.iter().map(|r| r.powi(2)).sum();

                if new_cost.is_finite() && new_cost < cost {
                    let param_converged = new_params
                        .iter()
                        .zip(params.iter())
                        .all(|(new, old)| {
                            (new - old).abs() <= self.config.xtol * (old.abs() + self.config.xtol)
                        });
                    let cost_change = (cost - new_cost) / cost;

                    params = new_params;
                    residuals = new_residuals;
                    cost = new_cost;
                    lambda = (lambda * self.config.lambda_down_factor).max(self.config.min_lambda);
                    iterations += 1;

                    break if param_converged {
                        IterationStatus::Converged("Parameter convergence".to_string())
                    } else if cost_change < self.config.ftol {
                        IterationStatus::Converged(format!(
                            "Cost convergence: |df|/|f| = {:.2e} < {:.2e}",
                            cost_change, self.config.ftol
                        ))
                    } else {
                        IterationStatus::Continue
                    };
                }

                // Step rejected - increase lambda and try again
                lambda *= self.config.lambda_up_factor;
                if lambda > self.config.max_lambda {
                    // Even a vanishing gradient step cannot lower the cost: the
                    // current point is a minimum to working precision.
                    break IterationStatus::Converged(
                        "Cost cannot be decreased further".to_string(),
                    );
                }
            };

            match status {
                IterationStatus::Continue => (),
                IterationStatus::Converged(message) => {
                    let jacobian = problem.jacobian(&params)?;
                    return Ok(self.finish(
                        params, residuals, cost, iterations, func_evals, true, message, jacobian,
                    ));
                }
                IterationStatus::Failed(message) => {
                    let jacobian = problem.jacobian(&params)?;
                    return Ok(self.finish(
                        params, residuals, cost, iterations, func_evals, false, message, jacobian,
                    ));
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        params: Array1<f64>,
        residuals: Array1<f64>,
        cost: f64,
        iterations: usize,
        func_evals: usize,
        success: bool,
        message: String,
        jacobian: Array2<f64>,
    ) -> LmResult {
        LmResult {
            params,
            residuals,
            cost,
            iterations,
            func_evals,
            success,
            message,
            jacobian,
        }
    }

    /// Calculate the Levenberg-Marquardt step.
    ///
    /// Solves `(JᵀJ + λ·D) δ = −Jᵀr` with `D = diag(JᵀJ)`.
    /// Returns `None` if the damped matrix is not positive definite.
    fn calculate_step(&self, jtj: &DMatrix<f64>, g: &DVector<f64>, lambda: f64) -> Option<DVector<f64>> {
        let mut a = jtj.clone();
        for i in 0..a.nrows() {
            a[(i, i)] += lambda * jtj[(i, i)].max(MIN_DIAGONAL);
        }

        let rhs = -g.clone();
        let step = a.cholesky()?.solve(&rhs);
        if step.iter().all(|s| s.is_finite()) {
            Some(step)
        } else {
            None
        }
    }
}
