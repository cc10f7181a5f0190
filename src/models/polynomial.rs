//! Polynomial background.

/// A polynomial background evaluated in `(x - origin)`.
///
/// The origin is the first channel of the fit window so that the
/// coefficients stay of comparable magnitude whatever the absolute channel.
#[derive(Debug, Clone, PartialEq)]
pub struct PolynomialBackground {
    origin: f64,
    coefficients: Vec<f64>,
}

impl PolynomialBackground {
    pub fn new(origin: f64, coefficients: &[f64]) -> Self {
        Self {
            origin,
            coefficients: coefficients.to_vec(),
        }
    }

    /// Number of coefficients of a polynomial of the given order.
    pub fn term_count(order: usize) -> usize {
        order + 1
    }

    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    /// Value at channel `x` (Horner scheme).
    pub fn eval(&self, x: f64) -> f64 {
        let t = x - self.origin;
        self.coefficients
            .iter()
            .rev()
            .fold(0.0, |acc, c| acc * t + c)
    }

    /// Derivatives with respect to each coefficient, i.e. the monomials `t^k`.
    pub fn basis(&self, x: f64) -> Vec<f64> {
        let t = x - self.origin;
        let mut value = 1.0;
        (0..self.coefficients.len())
            .map(|_| {
                let current = value;
                value *= t;
                current
            })
            .collect()
    }
}
