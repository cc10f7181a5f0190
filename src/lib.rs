//! # edd-fit
//!
//! `edd-fit` reduces energy-dispersive diffraction scans recorded with two
//! linear detectors into fitted peak parameters and laboratory scattering
//! angles.
//!
//! The library provides:
//! - A Levenberg-Marquardt optimizer with covariance-based standard errors
//! - A multi-peak fitter (pseudo-Voigt peaks on a polynomial background)
//! - The goniometer geometry mapping a peak channel to `(delta, two-theta)`
//! - Scan-level accumulation into per-peak angle records
//!
//! ## Basic Usage
//!
//! ```
//! use edd_fit::{AngleReconstructor, Detector, PeakFitter, PositionerVector};
//! use edd_fit::models::PseudoVoigt;
//!
//! let channels: Vec<usize> = (0..64).collect();
//! let peak = PseudoVoigt::new(31.0, 400.0, 4.0, 0.5);
//! let counts: Vec<f64> = channels.iter().map(|&c| 12.0 + peak.eval(c as f64)).collect();
//!
//! let fit = PeakFitter::default().fit(&channels, &counts, 1).unwrap();
//! let params = fit.peak(0).to_array();
//!
//! let angles = PositionerVector::default();
//! let row = AngleReconstructor::default().reconstruct(&angles, &params, Detector::Vertical);
//! assert_eq!(row.len(), 13);
//! ```

pub mod accumulator;
pub mod config;
pub mod error;
pub mod fit;
pub mod geometry;
pub mod lm;
pub mod models;
pub mod pipeline;
pub mod problem;
pub mod store;
pub mod uncertainty;
pub mod utils;

// Re-exports for convenience
pub use accumulator::{AccumulatorState, PointAccumulator};
pub use config::{Config, ConfigWarning, FitBox, ScanSelector};
pub use error::{EddError, Result};
pub use fit::{BoxFit, FitterConfig, PeakFitter};
pub use geometry::{AngleReconstructor, Detector, GeometryConfig, PositionerVector};
pub use lm::LevenbergMarquardt;
#[cfg(feature = "hdf5")]
pub use pipeline::process;
pub use pipeline::{Pipeline, RunReport, ScanReport};
pub use problem::Problem;
#[cfg(feature = "hdf5")]
pub use store::Hdf5Tree;
pub use store::{DataTree, MemoryTree, PeakRecords};

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
