//! Box fitting scenarios on synthetic diffraction windows.

use approx::assert_relative_eq;
use edd_fit::fit::{FitterConfig, PARAMS_PER_PEAK, UNCERTAINTIES_PER_PEAK};
use edd_fit::models::PseudoVoigt;
use edd_fit::{EddError, PeakFitter};

use crate::test_helpers::synthetic_trace;

#[test]
fn test_two_overlapping_shoulders() {
    let channels: Vec<usize> = (300..380).collect();
    let truth = [
        PseudoVoigt::new(332.0, 900.0, 6.0, 0.3),
        PseudoVoigt::new(345.0, 500.0, 5.0, 0.6),
    ];
    let counts = synthetic_trace(channels.iter().copied(), [40.0, 0.05], &truth, 0.0, 0);

    let fit = PeakFitter::default().fit(&channels, &counts, 2).unwrap();

    assert_eq!(fit.params.len(), 2 * PARAMS_PER_PEAK);
    assert_eq!(fit.uncertainties.len(), 2 * UNCERTAINTIES_PER_PEAK);
    for (k, expected) in truth.iter().enumerate() {
        let peak = fit.peak(k);
        assert_relative_eq!(peak.position, expected.position, epsilon = 1e-4);
        assert_relative_eq!(peak.intensity, expected.intensity, max_relative = 1e-4);
        assert_relative_eq!(peak.fwhm, expected.fwhm, max_relative = 1e-4);
        assert_relative_eq!(peak.area, expected.area(), max_relative = 1e-4);
    }
    // peaks are reported in channel order
    assert!(fit.peak(0).position < fit.peak(1).position);
}

#[test]
fn test_noise_sets_goodness_and_errors() {
    let channels: Vec<usize> = (0..120).collect();
    let truth = [PseudoVoigt::new(58.0, 2000.0, 8.0, 0.5)];
    let sigma = 4.0;
    let counts = synthetic_trace(channels.iter().copied(), [100.0, 0.1], &truth, sigma, 7);

    let fit = PeakFitter::default().fit(&channels, &counts, 1).unwrap();
    let peak = fit.peak(0);
    let error = fit.peak_uncertainty(0);

    // reduced chi-square estimates the noise variance
    assert_relative_eq!(peak.goodness, sigma * sigma, max_relative = 0.5);
    assert_relative_eq!(fit.redchi, peak.goodness);

    assert!(error.position > 0.0 && error.position < 0.5);
    assert!(error.intensity > 0.0);
    assert!(error.area > 0.0);
    assert!((peak.position - 58.0).abs() < 5.0 * error.position + 0.05);
    assert!((0.0..=1.0).contains(&peak.eta));
}

#[test]
fn test_curves_cover_the_window() {
    let channels: Vec<usize> = (40..100).collect();
    let truth = [PseudoVoigt::new(70.0, 300.0, 4.0, 0.5)];
    let counts = synthetic_trace(channels.iter().copied(), [10.0, 0.0], &truth, 0.0, 0);

    let fit = PeakFitter::default().fit(&channels, &counts, 1).unwrap();

    assert_eq!(fit.channels, channels);
    assert_eq!(fit.raw_data, counts);
    assert_eq!(fit.background.len(), channels.len());
    assert_eq!(fit.fitted_curve.len(), channels.len());
    for ((fitted, background), raw) in fit
        .fitted_curve
        .iter()
        .zip(&fit.background)
        .zip(&fit.raw_data)
    {
        assert!(fitted >= background);
        assert_relative_eq!(fitted, raw, epsilon = 1e-3);
    }
}

#[test]
fn test_constant_background_order() {
    let config = FitterConfig {
        background_order: 0,
        ..FitterConfig::default()
    };
    let fitter = PeakFitter::new(config);
    assert_eq!(fitter.parameter_count(1), 5);
    assert_eq!(fitter.min_samples(1), 10);

    let channels: Vec<usize> = (0..30).collect();
    let truth = [PseudoVoigt::new(14.0, 250.0, 3.0, 0.2)];
    let counts = synthetic_trace(channels.iter().copied(), [30.0, 0.0], &truth, 0.0, 0);
    let fit = fitter.fit(&channels, &counts, 1).unwrap();
    assert_relative_eq!(fit.peak(0).position, 14.0, epsilon = 1e-4);
}

#[test]
fn test_window_too_short_for_peak_count() {
    let fitter = PeakFitter::default();
    let channels: Vec<usize> = (0..25).collect();
    let counts = vec![1.0; 25];

    // 2 background terms + 3 x 4 peak terms, two samples each
    match fitter.fit(&channels, &counts, 3) {
        Err(EddError::InsufficientData {
            samples,
            required,
            nb_peaks,
        }) => {
            assert_eq!(samples, 25);
            assert_eq!(required, 28);
            assert_eq!(nb_peaks, 3);
        }
        other => panic!("expected InsufficientData, got {:?}", other),
    }

    let err = fitter.fit(&channels, &counts, 0).unwrap_err();
    assert!(err.is_box_level());
}
