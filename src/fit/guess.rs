//! Deterministic starting point for a box fit.

use crate::models::PolynomialBackground;

/// Number of samples averaged at each end of the window for the background line.
const EDGE_SAMPLES: usize = 3;

/// Starting values in the layout of [`MultiPeakProblem`](super::problem::MultiPeakProblem).
pub(crate) fn initial_parameters(
    x: &[f64],
    y: &[f64],
    background_order: usize,
    nb_peaks: usize,
    min_separation: usize,
    initial_eta: f64,
) -> Vec<f64> {
    let (intercept, slope) = edge_line(x, y);
    let origin = x.first().copied().unwrap_or(0.0);

    let mut params = vec![0.0; PolynomialBackground::term_count(background_order)];
    params[0] = intercept;
    if background_order >= 1 {
        params[1] = slope;
    }

    let signal: Vec<f64> = x
        .iter()
        .zip(y)
        .map(|(xi, yi)| yi - (intercept + slope * (xi - origin)))
        .collect();

    let default_width = (x.len() as f64 / (2.0 * nb_peaks as f64)).max(1.0);
    for index in pick_maxima(&signal, nb_peaks, min_separation) {
        let height = signal[index].max(f64::EPSILON);
        let fwhm = half_max_width(&signal, index).unwrap_or(default_width);
        params.extend_from_slice(&[x[index], height, fwhm, initial_eta]);
    }

    params
}

/// Line through the mean of the first and of the last few samples,
/// as `(value at the first channel, slope)`.
fn edge_line(x: &[f64], y: &[f64]) -> (f64, f64) {
    let n = x.len();
    let k = EDGE_SAMPLES.min(n);
    if k == 0 {
        return (0.0, 0.0);
    }
    let mean = |s: &[f64]| s.iter().sum::<f64>() / s.len() as f64;

    let (x_lo, y_lo) = (mean(&x[..k]), mean(&y[..k]));
    let (x_hi, y_hi) = (mean(&x[n - k..]), mean(&y[n - k..]));

    let slope = if x_hi > x_lo {
        (y_hi - y_lo) / (x_hi - x_lo)
    } else {
        0.0
    };
    (y_lo - slope * (x_lo - x[0]), slope)
}

/// Indices of the `count` highest local maxima at least `min_separation`
/// samples apart, sorted by channel. Ties go to the lower channel. When the
/// trace holds too few maxima the remaining peaks are spread evenly over
/// the window.
fn pick_maxima(signal: &[f64], count: usize, min_separation: usize) -> Vec<usize> {
    let n = signal.len();
    let mut candidates: Vec<usize> = (0..n)
        .filter(|&i| {
            let left = i == 0 || signal[i] >= signal[i - 1];
            let right = i + 1 == n || signal[i] >= signal[i + 1];
            left && right
        })
        .collect();
    candidates.sort_by(|&a, &b| signal[b].total_cmp(&signal[a]).then(a.cmp(&b)));

    let far_enough =
        |chosen: &[usize], i: usize| chosen.iter().all(|&c| c.abs_diff(i) >= min_separation);

    let mut chosen: Vec<usize> = Vec::with_capacity(count);
    for i in candidates {
        if chosen.len() == count {
            break;
        }
        if far_enough(&chosen, i) {
            chosen.push(i);
        }
    }

    let mut slot = 0;
    while chosen.len() < count && n > 0 {
        let i = ((2 * slot + 1) * n / (2 * count)).min(n - 1);
        if !chosen.contains(&i) {
            chosen.push(i);
        }
        slot += 1;
        if slot > n {
            break;
        }
    }
    // narrow windows are rejected before guessing, so this only guards the index arithmetic
    while chosen.len() < count {
        chosen.push(chosen.len().min(n.saturating_sub(1)));
    }

    chosen.sort_unstable();
    chosen
}

/// Width between the half-maximum crossings around `peak`, linearly interpolated.
fn half_max_width(signal: &[f64], peak: usize) -> Option<f64> {
    let half = signal[peak] / 2.0;
    if half <= 0.0 {
        return None;
    }

    let left = (0..peak).rev().find(|&i| signal[i] < half).map(|i| {
        let (a, b) = (signal[i], signal[i + 1]);
        i as f64 + (half - a) / (b - a)
    });
    let right = (peak + 1..signal.len()).find(|&i| signal[i] < half).map(|i| {
        let (a, b) = (signal[i - 1], signal[i]);
        (i - 1) as f64 + (a - half) / (a - b)
    });

    match (left, right) {
        (Some(l), Some(r)) => Some((r - l).max(1.0)),
        (Some(l), None) => Some((2.0 * (peak as f64 - l)).max(1.0)),
        (None, Some(r)) => Some((2.0 * (r - peak as f64)).max(1.0)),
        (None, None) => None,
    }
}
