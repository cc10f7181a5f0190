//! Least-squares problem for a background plus several pseudo-Voigt peaks.

use ndarray::{Array1, Array2};

use crate::error::{EddError, Result};
use crate::models::{PolynomialBackground, PseudoVoigt, PEAK_PARAMETER_COUNT};
use crate::problem::Problem;

/// Smallest width a peak may take during the fit, in channels.
pub(crate) const MIN_FWHM: f64 = 1e-3;

/// Background plus `nb_peaks` pseudo-Voigt peaks over one fit window.
///
/// Parameter layout: the background coefficients first, then
/// `[position, intensity, fwhm, eta]` for every peak.
pub struct MultiPeakProblem {
    x_data: Array1<f64>,
    y_data: Array1<f64>,
    origin: f64,
    background_terms: usize,
    nb_peaks: usize,
}

impl MultiPeakProblem {
    pub fn new(
        x_data: Array1<f64>,
        y_data: Array1<f64>,
        background_terms: usize,
        nb_peaks: usize,
    ) -> Result<Self> {
        if x_data.len() != y_data.len() {
            return Err(EddError::DimensionMismatch(format!(
                "{} channels for {} counts",
                x_data.len(),
                y_data.len()
            )));
        }
        let origin = x_data.first().copied().unwrap_or(0.0);
        Ok(Self {
            x_data,
            y_data,
            origin,
            background_terms,
            nb_peaks,
        })
    }

    /// Index of the first parameter of peak `k`.
    pub fn peak_offset(&self, k: usize) -> usize {
        self.background_terms + k * PEAK_PARAMETER_COUNT
    }

    pub fn background(&self, params: &Array1<f64>) -> PolynomialBackground {
        let coefficients = params.as_slice().map_or_else(
            || params.iter().take(self.background_terms).copied().collect::<Vec<_>>(),
            |s| s[..self.background_terms].to_vec(),
        );
        PolynomialBackground::new(self.origin, &coefficients)
    }

    pub fn peak(&self, params: &Array1<f64>, k: usize) -> PseudoVoigt {
        let offset = self.peak_offset(k);
        PseudoVoigt::new(
            params[offset],
            params[offset + 1],
            params[offset + 2],
            params[offset + 3],
        )
    }

    fn peaks(&self, params: &Array1<f64>) -> Vec<PseudoVoigt> {
        (0..self.nb_peaks).map(|k| self.peak(params, k)).collect()
    }

    /// Background curve over the window.
    pub fn background_curve(&self, params: &Array1<f64>) -> Array1<f64> {
        let background = self.background(params);
        self.x_data.mapv(|x| background.eval(x))
    }

    /// Background plus every peak over the window.
    pub fn model_curve(&self, params: &Array1<f64>) -> Array1<f64> {
        let background = self.background(params);
        let peaks = self.peaks(params);
        self.x_data
            .mapv(|x| background.eval(x) + peaks.iter().map(|p| p.eval(x)).sum::<f64>())
    }
}

impl Problem for MultiPeakProblem {
    fn eval(&self, params: &Array1<f64>) -> Result<Array1<f64>> {
        if params.len() != self.parameter_count() {
            return Err(EddError::DimensionMismatch(format!(
                "Expected {} parameters, got {}",
                self.parameter_count(),
                params.len()
            )));
        }
        Ok(self.model_curve(params) - &self.y_data)
    }

    fn parameter_count(&self) -> usize {
        self.background_terms + self.nb_peaks * PEAK_PARAMETER_COUNT
    }

    fn residual_count(&self) -> usize {
        self.x_data.len()
    }

    fn jacobian(&self, params: &Array1<f64>) -> Result<Array2<f64>> {
        let background = self.background(params);
        let peaks = self.peaks(params);
        let mut jac = Array2::zeros((self.x_data.len(), self.parameter_count()));

        for (i, &x) in self.x_data.iter().enumerate() {
            for (k, b) in background.basis(x).into_iter().enumerate() {
                jac[[i, k]] = b;
            }
            for (k, peak) in peaks.iter().enumerate() {
                let offset = self.peak_offset(k);
                for (m, d) in peak.gradient(x).into_iter().enumerate() {
                    jac[[i, offset + m]] = d;
                }
            }
        }

        Ok(jac)
    }

    fn has_custom_jacobian(&self) -> bool {
        true
    }

    fn project(&self, params: &mut Array1<f64>) {
        for k in 0..self.nb_peaks {
            let offset = self.peak_offset(k);
            params[offset + 2] = params[offset + 2].abs().max(MIN_FWHM);
            params[offset + 3] = params[offset + 3].clamp(0.0, 1.0);
        }
    }
}
