//! # Uncertainty Calculation
//!
//! Standard errors of fitted parameters from the covariance estimate of a
//! nonlinear least-squares fit, and first-order propagation into derived
//! quantities.

mod covariance;

pub use covariance::{calculate_covariance, propagate_linear, standard_errors_from_covariance};

use crate::error::Result;
use ndarray::{Array1, Array2};

/// Calculator for parameter uncertainties.
#[derive(Debug, Clone)]
pub struct UncertaintyCalculator {
    /// Degrees of freedom (n_points - n_parameters)
    pub nfree: usize,
    /// Chi-square value at minimum
    pub chisqr: f64,
    /// Reduced chi-square (chi^2 / nfree)
    pub redchi: f64,
}

impl UncertaintyCalculator {
    /// Create a new UncertaintyCalculator
    pub fn new(ndata: usize, nvarys: usize, chisqr: f64) -> Self {
        let nfree = if ndata > nvarys { ndata - nvarys } else { 1 };
        let redchi = chisqr / nfree as f64;

        Self {
            nfree,
            chisqr,
            redchi,
        }
    }

    /// Calculate the covariance matrix from the Jacobian
    pub fn calculate_covariance(&self, jacobian: &Array2<f64>) -> Result<Array2<f64>> {
        covariance::calculate_covariance(jacobian, self.redchi)
    }

    /// Standard errors of all parameters
    pub fn standard_errors(&self, covar: &Array2<f64>) -> Array1<f64> {
        covariance::standard_errors_from_covariance(covar)
    }
}
