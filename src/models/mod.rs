//! Model functions for energy-dispersive diffraction traces: a pseudo-Voigt
//! line profile and a polynomial background.

mod peak;
mod polynomial;

pub use peak::{PseudoVoigt, PEAK_PARAMETER_COUNT};
pub use polynomial::PolynomialBackground;
