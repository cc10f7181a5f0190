//! # Scattering angles
//!
//! [`AngleReconstructor`] turns a fitted peak position (in channels) and the
//! six goniometer readings of a scan point into the azimuthal angle `delta`
//! and the scattering angle `two-theta` in the laboratory frame.
//!
//! The detector frame has the beam along `+z`. A channel is first mapped to a
//! detector scattering angle through the linear [`DetectorCalibration`], giving
//! the unit vector
//!
//! k_det = (sin 2θ cos φ, sin 2θ sin φ, cos 2θ)
//!
//! where φ is the azimuthal placement of the detector ([`Detector::azimuthal_offset`]).
//! The lab direction is `R0 · R1 · … · R5 · k_det`, `Ri` being the rotation by
//! positioner `i` about its configured axis, and
//! `two-theta = acos(k_z)`, `delta = atan2(k_y, k_x)`.
//! All angles are in degrees.

use std::fmt;

use nalgebra::{Rotation3, Unit, Vector3};
use serde::{Deserialize, Serialize};

use crate::fit::{PARAMS_PER_PEAK, UNCERTAINTIES_PER_PEAK};
use crate::utils::finite_difference;

/// Number of goniometer angles that enter the geometry.
pub const POSITIONER_COUNT: usize = 6;

/// Width of one row of a peak record.
pub const RECORD_WIDTH: usize = POSITIONER_COUNT + 7;

/// Transverse norm below which the lab direction is taken as on-axis.
const ON_AXIS_TOLERANCE: f64 = 1e-12;

/// The two linear detectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Detector {
    Horizontal,
    Vertical,
}

impl Detector {
    /// Both detectors, in output row order.
    pub const ALL: [Detector; 2] = [Detector::Horizontal, Detector::Vertical];

    /// Azimuthal placement around the beam, in degrees.
    pub fn azimuthal_offset(self) -> f64 {
        match self {
            Detector::Horizontal => -90.0,
            Detector::Vertical => 0.0,
        }
    }

    /// Row of this detector in a peak record.
    pub fn row(self) -> usize {
        match self {
            Detector::Horizontal => 0,
            Detector::Vertical => 1,
        }
    }

    /// Suffix used for the dataset names of this detector.
    pub fn suffix(self) -> &'static str {
        match self {
            Detector::Horizontal => "HD",
            Detector::Vertical => "VD",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Detector::Horizontal => "horizontal",
            Detector::Vertical => "vertical",
        }
    }
}

impl fmt::Display for Detector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Rotation axis of one goniometer stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    fn unit(self) -> Unit<Vector3<f64>> {
        match self {
            Axis::X => Vector3::x_axis(),
            Axis::Y => Vector3::y_axis(),
            Axis::Z => Vector3::z_axis(),
        }
    }

    /// Right-handed rotation by `degrees` about this axis.
    pub fn rotation(self, degrees: f64) -> Rotation3<f64> {
        Rotation3::from_axis_angle(&self.unit(), degrees.to_radians())
    }
}

/// Linear map from channel to detector scattering angle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorCalibration {
    pub reference_channel: f64,
    /// Scattering angle at the reference channel, in degrees
    pub reference_two_theta: f64,
    pub degrees_per_channel: f64,
}

impl Default for DetectorCalibration {
    fn default() -> Self {
        Self {
            reference_channel: 0.0,
            reference_two_theta: 0.0,
            degrees_per_channel: 0.01,
        }
    }
}

impl DetectorCalibration {
    pub fn two_theta(&self, channel: f64) -> f64 {
        self.reference_two_theta + (channel - self.reference_channel) * self.degrees_per_channel
    }
}

/// Goniometer axes and per-detector calibration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeometryConfig {
    /// Rotation axis of each positioner slot, outermost first
    pub axes: [Axis; POSITIONER_COUNT],
    pub horizontal: DetectorCalibration,
    pub vertical: DetectorCalibration,
}

impl Default for GeometryConfig {
    fn default() -> Self {
        Self {
            axes: [Axis::Y, Axis::X, Axis::Z, Axis::Y, Axis::X, Axis::Z],
            horizontal: DetectorCalibration::default(),
            vertical: DetectorCalibration::default(),
        }
    }
}

impl GeometryConfig {
    pub fn calibration(&self, detector: Detector) -> &DetectorCalibration {
        match detector {
            Detector::Horizontal => &self.horizontal,
            Detector::Vertical => &self.vertical,
        }
    }
}

/// Goniometer readings of one scan point, in degrees.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PositionerVector([f64; POSITIONER_COUNT]);

impl PositionerVector {
    pub fn new(angles: [f64; POSITIONER_COUNT]) -> Self {
        Self(angles)
    }

    /// Takes the first six readings; missing slots read zero.
    pub fn from_readings(readings: &[f64]) -> Self {
        let mut angles = [0.0; POSITIONER_COUNT];
        for (slot, value) in angles.iter_mut().zip(readings) {
            *slot = *value;
        }
        Self(angles)
    }

    pub fn angles(&self) -> &[f64; POSITIONER_COUNT] {
        &self.0
    }
}

/// Maps fitted channel positions to laboratory scattering angles.
#[derive(Debug, Clone, Default)]
pub struct AngleReconstructor {
    config: GeometryConfig,
}

impl AngleReconstructor {
    pub fn new(config: GeometryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GeometryConfig {
        &self.config
    }

    /// `(delta, two-theta)` of a peak at `channel` seen by `detector`.
    pub fn scattering_angles(
        &self,
        positioners: &PositionerVector,
        channel: f64,
        detector: Detector,
    ) -> (f64, f64) {
        let detector_tth = self.config.calibration(detector).two_theta(channel).to_radians();
        let phi = detector.azimuthal_offset().to_radians();
        let k_det = Vector3::new(
            detector_tth.sin() * phi.cos(),
            detector_tth.sin() * phi.sin(),
            detector_tth.cos(),
        );

        let rotation = self
            .config
            .axes
            .iter()
            .zip(positioners.angles())
            .fold(Rotation3::identity(), |acc, (axis, angle)| {
                acc * axis.rotation(*angle)
            });
        let k = rotation * k_det;

        let two_theta = k.z.clamp(-1.0, 1.0).acos().to_degrees();
        let delta = if k.x.hypot(k.y) < ON_AXIS_TOLERANCE {
            detector.azimuthal_offset()
        } else {
            k.y.atan2(k.x).to_degrees()
        };
        (delta, two_theta)
    }

    /// Row of a peak record: the six positioner angles, then delta,
    /// two-theta, position, intensity, FWHM, shape factor and goodness.
    pub fn reconstruct(
        &self,
        positioners: &PositionerVector,
        params: &[f64; PARAMS_PER_PEAK],
        detector: Detector,
    ) -> [f64; RECORD_WIDTH] {
        let (delta, two_theta) = self.scattering_angles(positioners, params[0], detector);

        let mut row = [0.0; RECORD_WIDTH];
        row[..POSITIONER_COUNT].copy_from_slice(positioners.angles());
        row[POSITIONER_COUNT] = delta;
        row[POSITIONER_COUNT + 1] = two_theta;
        row[POSITIONER_COUNT + 2..].copy_from_slice(&params[..5]);
        row
    }

    /// Uncertainty row matching [`reconstruct`](Self::reconstruct).
    ///
    /// The channel error is carried to delta and two-theta to first order;
    /// the slots after them hold the five fit uncertainties (the last one is
    /// the area error).
    pub fn reconstruct_uncertainty(
        &self,
        positioners: &PositionerVector,
        params: &[f64; PARAMS_PER_PEAK],
        uncertainties: &[f64; UNCERTAINTIES_PER_PEAK],
        detector: Detector,
    ) -> [f64; RECORD_WIDTH] {
        let channel = params[0];
        let sigma_channel = uncertainties[0];
        let (delta0, _) = self.scattering_angles(positioners, channel, detector);

        let d_delta = finite_difference::derivative(
            |c| wrap_degrees(self.scattering_angles(positioners, c, detector).0 - delta0),
            channel,
            None,
        );
        let d_two_theta = finite_difference::derivative(
            |c| self.scattering_angles(positioners, c, detector).1,
            channel,
            None,
        );

        let mut row = [0.0; RECORD_WIDTH];
        row[..POSITIONER_COUNT].copy_from_slice(positioners.angles());
        row[POSITIONER_COUNT] = d_delta.abs() * sigma_channel;
        row[POSITIONER_COUNT + 1] = d_two_theta.abs() * sigma_channel;
        row[POSITIONER_COUNT + 2..].copy_from_slice(uncertainties);
        row
    }
}

/// Maps an angle difference into (-180, 180].
fn wrap_degrees(angle: f64) -> f64 {
    let wrapped = angle.rem_euclid(360.0);
    if wrapped > 180.0 {
        wrapped - 360.0
    } else {
        wrapped
    }
}
