//! Levenberg-Marquardt algorithm implementation.
//!
//! This module provides the nonlinear least-squares optimizer used by the
//! peak fitter.

pub mod algorithm;
pub mod config;

pub use algorithm::{LevenbergMarquardt, LmResult};
pub use config::LmConfig;
