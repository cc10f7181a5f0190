//! Scattering angle reconstruction over random goniometer settings.

use approx::assert_relative_eq;
use edd_fit::geometry::{Axis, DetectorCalibration};
use edd_fit::{AngleReconstructor, Detector, GeometryConfig, PositionerVector};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

fn reconstructor() -> AngleReconstructor {
    let calibration = DetectorCalibration {
        reference_channel: 2048.0,
        reference_two_theta: 6.0,
        degrees_per_channel: 0.0015,
    };
    AngleReconstructor::new(GeometryConfig {
        horizontal: calibration,
        vertical: calibration,
        ..GeometryConfig::default()
    })
}

fn random_positioners(rng: &mut ChaCha8Rng) -> PositionerVector {
    let mut angles = [0.0; 6];
    for angle in angles.iter_mut() {
        *angle = rng.gen_range(-180.0..180.0);
    }
    PositionerVector::new(angles)
}

fn direction(delta: f64, two_theta: f64) -> [f64; 3] {
    let (d, t) = (delta.to_radians(), two_theta.to_radians());
    [t.sin() * d.cos(), t.sin() * d.sin(), t.cos()]
}

#[test]
fn test_angles_stay_in_range() {
    let reconstructor = reconstructor();
    let mut rng = ChaCha8Rng::seed_from_u64(42);

    for _ in 0..200 {
        let positioners = random_positioners(&mut rng);
        let channel = rng.gen_range(0.0..4096.0);
        for detector in Detector::ALL {
            let (delta, two_theta) = reconstructor.scattering_angles(&positioners, channel, detector);
            assert!((0.0..=180.0).contains(&two_theta));
            assert!(delta > -180.0 - 1e-9 && delta <= 180.0 + 1e-9);
        }
    }
}

#[test]
fn test_rotations_preserve_detector_opening() {
    // both detectors at the same channel keep their mutual angle whatever the
    // goniometer does: k_h · k_v = cos²(2θ)
    let reconstructor = reconstructor();
    let mut rng = ChaCha8Rng::seed_from_u64(3);

    for _ in 0..100 {
        let positioners = random_positioners(&mut rng);
        let channel = rng.gen_range(1000.0..3000.0);
        let detector_tth = reconstructor
            .config()
            .calibration(Detector::Vertical)
            .two_theta(channel)
            .to_radians();

        let (dh, th) = reconstructor.scattering_angles(&positioners, channel, Detector::Horizontal);
        let (dv, tv) = reconstructor.scattering_angles(&positioners, channel, Detector::Vertical);
        let (kh, kv) = (direction(dh, th), direction(dv, tv));
        let dot: f64 = kh.iter().zip(&kv).map(|(a, b)| a * b).sum();

        assert_relative_eq!(dot, detector_tth.cos().powi(2), epsilon = 1e-9);
    }
}

#[test]
fn test_beam_axis_rotations_only_shift_delta() {
    let config = GeometryConfig {
        axes: [Axis::Z; 6],
        ..reconstructor().config().clone()
    };
    let reconstructor = AngleReconstructor::new(config);
    let mut rng = ChaCha8Rng::seed_from_u64(11);
    let zero = PositionerVector::default();

    for _ in 0..50 {
        let positioners = random_positioners(&mut rng);
        let turn: f64 = positioners.angles().iter().sum();
        let channel = rng.gen_range(2100.0..4000.0);

        for detector in Detector::ALL {
            let (delta0, tth0) = reconstructor.scattering_angles(&zero, channel, detector);
            let (delta, tth) = reconstructor.scattering_angles(&positioners, channel, detector);
            assert_relative_eq!(tth, tth0, epsilon = 1e-9);

            let shift = (delta - delta0 - turn).rem_euclid(360.0);
            assert!(shift < 1e-7 || shift > 360.0 - 1e-7, "shift {}", shift);
        }
    }
}

#[test]
fn test_record_rows_per_detector() {
    let reconstructor = reconstructor();
    let positioners = PositionerVector::new([0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
    let params = [2548.0, 800.0, 5.0, 0.5, 1.1, 4500.0];

    let horizontal = reconstructor.reconstruct(&positioners, &params, Detector::Horizontal);
    let vertical = reconstructor.reconstruct(&positioners, &params, Detector::Vertical);

    // 500 channels above the reference
    assert_relative_eq!(horizontal[7], 6.75, epsilon = 1e-10);
    assert_relative_eq!(vertical[7], 6.75, epsilon = 1e-10);
    assert_relative_eq!(horizontal[6], -90.0, epsilon = 1e-10);
    assert_relative_eq!(vertical[6], 0.0, epsilon = 1e-10);
    assert_eq!(horizontal[8], 2548.0);
    assert_eq!(vertical[12], 1.1);
}
