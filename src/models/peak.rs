//! Peak profile used for diffraction lines.
//!
//! The pseudo-Voigt profile is a linear mix of a Lorentzian and a Gaussian
//! sharing one position and one full width at half maximum:
//!
//! f(x) = intensity * (eta * L(u) + (1 - eta) * G(u)),  u = (x - position) / fwhm
//!
//! with L(u) = 1 / (1 + 4u²) and G(u) = exp(-4 ln2 u²). Both components equal
//! 1/2 at u = ±1/2, so `fwhm` is the width of the mix for every `eta`.

use std::f64::consts::{LN_2, PI};

/// Number of free parameters of one peak: position, intensity, fwhm, eta.
pub const PEAK_PARAMETER_COUNT: usize = 4;

/// Integral of the unit-height Gaussian component over u.
fn gaussian_integral() -> f64 {
    (PI / (4.0 * LN_2)).sqrt()
}

/// Integral of the unit-height Lorentzian component over u.
const LORENTZIAN_INTEGRAL: f64 = PI / 2.0;

/// A pseudo-Voigt peak.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PseudoVoigt {
    /// Peak centre, in channels
    pub position: f64,
    /// Peak height
    pub intensity: f64,
    /// Full width at half maximum, in channels
    pub fwhm: f64,
    /// Lorentzian fraction, between 0 (pure Gaussian) and 1 (pure Lorentzian)
    pub eta: f64,
}

impl PseudoVoigt {
    pub fn new(position: f64, intensity: f64, fwhm: f64, eta: f64) -> Self {
        Self {
            position,
            intensity,
            fwhm,
            eta,
        }
    }

    /// Build a peak from a slice `[position, intensity, fwhm, eta]`.
    pub fn from_slice(params: &[f64]) -> Self {
        Self::new(params[0], params[1], params[2], params[3])
    }

    fn components(&self, x: f64) -> (f64, f64, f64) {
        let u = (x - self.position) / self.fwhm;
        let lorentzian = 1.0 / (1.0 + 4.0 * u * u);
        let gaussian = (-4.0 * LN_2 * u * u).exp();
        (u, lorentzian, gaussian)
    }

    /// Profile value at channel `x`.
    pub fn eval(&self, x: f64) -> f64 {
        let (_, l, g) = self.components(x);
        self.intensity * (self.eta * l + (1.0 - self.eta) * g)
    }

    /// Partial derivatives at `x` in the order position, intensity, fwhm, eta.
    pub fn gradient(&self, x: f64) -> [f64; PEAK_PARAMETER_COUNT] {
        let (u, l, g) = self.components(x);
        let shape = self.eta * l + (1.0 - self.eta) * g;
        // common factor of d/du of the mix, up to the sign of du
        let slope = 8.0 * self.intensity * (self.eta * l * l + (1.0 - self.eta) * LN_2 * g);

        [
            slope * u / self.fwhm,
            shape,
            slope * u * u / self.fwhm,
            self.intensity * (l - g),
        ]
    }

    /// Integrated area under the profile.
    pub fn area(&self) -> f64 {
        self.intensity * self.fwhm * self.area_factor()
    }

    /// Partial derivatives of the area in the order position, intensity, fwhm, eta.
    pub fn area_gradient(&self) -> [f64; PEAK_PARAMETER_COUNT] {
        [
            0.0,
            self.fwhm * self.area_factor(),
            self.intensity * self.area_factor(),
            self.intensity * self.fwhm * (LORENTZIAN_INTEGRAL - gaussian_integral()),
        ]
    }

    fn area_factor(&self) -> f64 {
        self.eta * LORENTZIAN_INTEGRAL + (1.0 - self.eta) * gaussian_integral()
    }
}
