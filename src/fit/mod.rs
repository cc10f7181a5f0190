//! # Box fitting
//!
//! [`PeakFitter`] fits a polynomial background plus `nb_peaks` pseudo-Voigt
//! peaks to one channel window with the Levenberg-Marquardt optimizer, then
//! derives per-peak parameters and standard errors from the covariance
//! estimate of the fit.
//!
//! ```
//! use edd_fit::fit::PeakFitter;
//! use edd_fit::models::PseudoVoigt;
//!
//! let channels: Vec<usize> = (200..260).collect();
//! let peak = PseudoVoigt::new(228.0, 500.0, 5.0, 0.4);
//! let counts: Vec<f64> = channels.iter().map(|&c| 20.0 + peak.eval(c as f64)).collect();
//!
//! let fit = PeakFitter::default().fit(&channels, &counts, 1).unwrap();
//! assert_eq!(fit.params.len(), 6);
//! assert!((fit.peak(0).position - 228.0).abs() < 1e-4);
//! ```

mod guess;
mod problem;

pub use problem::MultiPeakProblem;

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::error::{EddError, Result};
use crate::lm::{LevenbergMarquardt, LmConfig};
use crate::models::{PolynomialBackground, PEAK_PARAMETER_COUNT};
use crate::problem::Problem;
use crate::uncertainty::{propagate_linear, UncertaintyCalculator};

/// Number of values reported per peak.
pub const PARAMS_PER_PEAK: usize = 6;

/// Number of standard errors reported per peak (the goodness figure has none).
pub const UNCERTAINTIES_PER_PEAK: usize = 5;

/// Settings of the box fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitterConfig {
    /// Order of the background polynomial (0 = constant)
    pub background_order: usize,
    /// Samples required per free parameter
    pub min_samples_per_parameter: usize,
    /// Minimum distance between two starting peak positions, in channels
    pub min_peak_separation: usize,
    /// Starting Lorentzian fraction
    pub initial_eta: f64,
    /// Optimizer settings
    pub lm: LmConfig,
}

impl Default for FitterConfig {
    fn default() -> Self {
        Self {
            background_order: 1,
            min_samples_per_parameter: 2,
            min_peak_separation: 2,
            initial_eta: 0.5,
            lm: LmConfig::default(),
        }
    }
}

impl FitterConfig {
    /// Reject settings under which a fit cannot be trusted.
    pub fn validate(&self) -> Result<()> {
        if self.min_samples_per_parameter == 0 {
            return Err(EddError::Config(
                "fitter.min_samples_per_parameter must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.initial_eta) {
            return Err(EddError::Config(format!(
                "fitter.initial_eta must lie in [0, 1], got {}",
                self.initial_eta
            )));
        }
        Ok(())
    }
}

/// Fitted values of one peak.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeakParameters {
    pub position: f64,
    pub intensity: f64,
    pub fwhm: f64,
    pub eta: f64,
    /// Reduced chi-square of the box fit the peak belongs to
    pub goodness: f64,
    pub area: f64,
}

impl PeakParameters {
    pub fn from_slice(values: &[f64]) -> Self {
        Self {
            position: values[0],
            intensity: values[1],
            fwhm: values[2],
            eta: values[3],
            goodness: values[4],
            area: values[5],
        }
    }

    pub fn to_array(&self) -> [f64; PARAMS_PER_PEAK] {
        [
            self.position,
            self.intensity,
            self.fwhm,
            self.eta,
            self.goodness,
            self.area,
        ]
    }
}

/// Standard errors of one peak, in the order position, intensity, fwhm, eta, area.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeakUncertainty {
    pub position: f64,
    pub intensity: f64,
    pub fwhm: f64,
    pub eta: f64,
    pub area: f64,
}

impl PeakUncertainty {
    pub fn from_slice(values: &[f64]) -> Self {
        Self {
            position: values[0],
            intensity: values[1],
            fwhm: values[2],
            eta: values[3],
            area: values[4],
        }
    }

    pub fn to_array(&self) -> [f64; UNCERTAINTIES_PER_PEAK] {
        [self.position, self.intensity, self.fwhm, self.eta, self.area]
    }
}

/// Result of fitting one box on one detector.
#[derive(Debug, Clone)]
pub struct BoxFit {
    pub channels: Vec<usize>,
    pub raw_data: Vec<f64>,
    /// Fitted background over the window
    pub background: Vec<f64>,
    /// Background plus peaks over the window
    pub fitted_curve: Vec<f64>,
    /// Peak-major, [`PARAMS_PER_PEAK`] values per peak
    pub params: Vec<f64>,
    /// Peak-major, [`UNCERTAINTIES_PER_PEAK`] values per peak
    pub uncertainties: Vec<f64>,
    pub nb_peaks: usize,
    pub redchi: f64,
    pub iterations: usize,
}

impl BoxFit {
    pub fn peak(&self, k: usize) -> PeakParameters {
        PeakParameters::from_slice(&self.params[k * PARAMS_PER_PEAK..(k + 1) * PARAMS_PER_PEAK])
    }

    pub fn peak_uncertainty(&self, k: usize) -> PeakUncertainty {
        PeakUncertainty::from_slice(
            &self.uncertainties[k * UNCERTAINTIES_PER_PEAK..(k + 1) * UNCERTAINTIES_PER_PEAK],
        )
    }
}

/// Multi-peak fitter for one channel window.
#[derive(Debug, Clone, Default)]
pub struct PeakFitter {
    config: FitterConfig,
}

impl PeakFitter {
    pub fn new(config: FitterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FitterConfig {
        &self.config
    }

    /// Number of free parameters for `nb_peaks` peaks.
    pub fn parameter_count(&self, nb_peaks: usize) -> usize {
        PolynomialBackground::term_count(self.config.background_order)
            + PEAK_PARAMETER_COUNT * nb_peaks
    }

    /// Smallest window that can constrain `nb_peaks` peaks. Never fewer
    /// than one sample more than there are parameters.
    pub fn min_samples(&self, nb_peaks: usize) -> usize {
        let parameters = self.parameter_count(nb_peaks);
        (self.config.min_samples_per_parameter * parameters).max(parameters + 1)
    }

    /// Fit `nb_peaks` peaks and the background to `raw_data` over `channels`.
    ///
    /// # Errors
    ///
    /// * [`EddError::DimensionMismatch`] if the two inputs differ in length.
    /// * [`EddError::InsufficientData`] if `nb_peaks` is zero or the window is
    ///   shorter than [`min_samples`](Self::min_samples).
    /// * [`EddError::FitConvergence`] if the optimizer stops without
    ///   converging, the solution is not finite, a peak ends with no positive
    ///   intensity, or the parameters are not identified by the data (no
    ///   covariance).
    pub fn fit(&self, channels: &[usize], raw_data: &[f64], nb_peaks: usize) -> Result<BoxFit> {
        if channels.len() != raw_data.len() {
            return Err(EddError::DimensionMismatch(format!(
                "{} channels for {} counts",
                channels.len(),
                raw_data.len()
            )));
        }
        let required = self.min_samples(nb_peaks.max(1));
        if nb_peaks == 0 || channels.len() < required {
            return Err(EddError::InsufficientData {
                samples: channels.len(),
                required,
                nb_peaks,
            });
        }

        let x: Vec<f64> = channels.iter().map(|&c| c as f64).collect();
        let background_terms = PolynomialBackground::term_count(self.config.background_order);
        let start = guess::initial_parameters(
            &x,
            raw_data,
            self.config.background_order,
            nb_peaks,
            self.config.min_peak_separation,
            self.config.initial_eta,
        );

        let problem = MultiPeakProblem::new(
            Array1::from_vec(x),
            Array1::from_vec(raw_data.to_vec()),
            background_terms,
            nb_peaks,
        )?;

        let optimizer = LevenbergMarquardt::with_config(self.config.lm.clone());
        let result = optimizer.minimize(&problem, Array1::from_vec(start))?;
        if !result.success {
            return Err(EddError::FitConvergence(result.message));
        }
        if result.params.iter().any(|p| !p.is_finite()) {
            return Err(EddError::FitConvergence(
                "non-finite parameters at the solution".to_string(),
            ));
        }
        for k in 0..nb_peaks {
            let intensity = problem.peak(&result.params, k).intensity;
            if intensity <= 0.0 {
                return Err(EddError::FitConvergence(format!(
                    "peak {} has intensity {:e}",
                    k, intensity
                )));
            }
        }

        let calculator = UncertaintyCalculator::new(
            problem.residual_count(),
            problem.parameter_count(),
            result.cost,
        );
        let covariance = calculator
            .calculate_covariance(&result.jacobian)
            .map_err(|e| EddError::FitConvergence(format!("no parameter covariance: {}", e)))?;
        let errors = calculator.standard_errors(&covariance);

        let mut params = Vec::with_capacity(PARAMS_PER_PEAK * nb_peaks);
        let mut uncertainties = Vec::with_capacity(UNCERTAINTIES_PER_PEAK * nb_peaks);
        for k in 0..nb_peaks {
            let offset = problem.peak_offset(k);
            let peak = problem.peak(&result.params, k);

            let mut area_gradient = Array1::zeros(problem.parameter_count());
            for (m, d) in peak.area_gradient().into_iter().enumerate() {
                area_gradient[offset + m] = d;
            }
            let area_error = propagate_linear(&area_gradient, &covariance)
                .map_err(|e| EddError::FitConvergence(format!("peak {} area: {}", k, e)))?;

            params.extend(
                PeakParameters {
                    position: peak.position,
                    intensity: peak.intensity,
                    fwhm: peak.fwhm,
                    eta: peak.eta,
                    goodness: calculator.redchi,
                    area: peak.area(),
                }
                .to_array(),
            );
            uncertainties.extend(
                PeakUncertainty {
                    position: errors[offset],
                    intensity: errors[offset + 1],
                    fwhm: errors[offset + 2],
                    eta: errors[offset + 3],
                    area: area_error,
                }
                .to_array(),
            );
        }

        Ok(BoxFit {
            channels: channels.to_vec(),
            raw_data: raw_data.to_vec(),
            background: problem.background_curve(&result.params).to_vec(),
            fitted_curve: problem.model_curve(&result.params).to_vec(),
            params,
            uncertainties,
            nb_peaks,
            redchi: calculator.redchi,
            iterations: result.iterations,
        })
    }
}
