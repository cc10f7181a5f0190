//! Per-point accumulation of box fits into peak-indexed tables.
//!
//! Every dimension is known before the first box of a point is fitted, so the
//! per-detector tables are allocated once with one row per peak of the scan.
//! Box results must arrive in box order for each detector; rows are written at
//! the offset of their box, which keeps the peak-major layout.

use ndarray::{s, Array2};

use crate::error::{EddError, Result};
use crate::fit::{BoxFit, PARAMS_PER_PEAK, UNCERTAINTIES_PER_PEAK};
use crate::geometry::Detector;
use crate::utils::reshape_rows;

/// Progress of one scan point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccumulatorState {
    /// No box reported yet
    Empty,
    /// The lowest box still missing a detector
    Accumulating(usize),
    /// Every box reported for both detectors
    Complete,
}

/// Peak table of one detector for one point.
#[derive(Debug, Clone)]
pub struct DetectorTable {
    /// One row of [`PARAMS_PER_PEAK`] values per peak
    pub params: Array2<f64>,
    /// One row of [`UNCERTAINTIES_PER_PEAK`] values per peak
    pub uncertainties: Array2<f64>,
    /// Whether the box holding each peak was fitted
    pub fitted: Vec<bool>,
    next_box: usize,
}

impl DetectorTable {
    fn new(total_peaks: usize) -> Self {
        Self {
            params: Array2::zeros((total_peaks, PARAMS_PER_PEAK)),
            uncertainties: Array2::zeros((total_peaks, UNCERTAINTIES_PER_PEAK)),
            fitted: vec![false; total_peaks],
            next_box: 0,
        }
    }

    /// True when every box of this detector was fitted.
    pub fn is_complete(&self) -> bool {
        self.fitted.iter().all(|&f| f)
    }

    /// Number of parameter values written so far.
    pub fn accumulated_len(&self) -> usize {
        self.fitted.iter().filter(|&&f| f).count() * PARAMS_PER_PEAK
    }
}

/// Collects the box fits of one scan point for both detectors.
#[derive(Debug, Clone)]
pub struct PointAccumulator {
    peaks_per_box: Vec<usize>,
    first_peak: Vec<usize>,
    tables: [DetectorTable; 2],
    state: AccumulatorState,
}

impl PointAccumulator {
    /// Preallocate the tables for boxes holding `peaks_per_box[i]` peaks each.
    pub fn new(peaks_per_box: &[usize]) -> Self {
        let first_peak: Vec<usize> = peaks_per_box
            .iter()
            .scan(0, |next, &n| {
                let first = *next;
                *next += n;
                Some(first)
            })
            .collect();
        let total_peaks = peaks_per_box.iter().sum();

        Self {
            peaks_per_box: peaks_per_box.to_vec(),
            first_peak,
            tables: [DetectorTable::new(total_peaks), DetectorTable::new(total_peaks)],
            state: if peaks_per_box.is_empty() {
                AccumulatorState::Complete
            } else {
                AccumulatorState::Empty
            },
        }
    }

    pub fn state(&self) -> AccumulatorState {
        self.state
    }

    pub fn total_peaks(&self) -> usize {
        self.peaks_per_box.iter().sum()
    }

    pub fn table(&self, detector: Detector) -> &DetectorTable {
        &self.tables[detector.row()]
    }

    /// Append the fit of `box_index` for `detector`.
    pub fn push_fit(&mut self, box_index: usize, detector: Detector, fit: &BoxFit) -> Result<()> {
        self.push(box_index, detector, &fit.params, &fit.uncertainties)
    }

    /// Append flat peak-major parameters and uncertainties of one box.
    ///
    /// Fails with [`EddError::ShapeMismatch`] when the box is out of order,
    /// the values do not split into whole peaks, or the peak count differs
    /// from the box layout.
    pub fn push(
        &mut self,
        box_index: usize,
        detector: Detector,
        params: &[f64],
        uncertainties: &[f64],
    ) -> Result<()> {
        self.expect_next(box_index, detector)?;

        let params = reshape_rows(params, PARAMS_PER_PEAK)?;
        let uncertainties = reshape_rows(uncertainties, UNCERTAINTIES_PER_PEAK)?;
        let expected = self.peaks_per_box[box_index];
        if params.nrows() != expected || uncertainties.nrows() != expected {
            return Err(EddError::ShapeMismatch(format!(
                "box {} on the {} detector holds {} peak(s), got {} parameter and {} uncertainty rows",
                box_index,
                detector,
                expected,
                params.nrows(),
                uncertainties.nrows()
            )));
        }

        let first = self.first_peak[box_index];
        let table = &mut self.tables[detector.row()];
        table
            .params
            .slice_mut(s![first..first + expected, ..])
            .assign(&params);
        table
            .uncertainties
            .slice_mut(s![first..first + expected, ..])
            .assign(&uncertainties);
        table.fitted[first..first + expected].fill(true);

        self.advance(detector);
        Ok(())
    }

    /// Record that `box_index` could not be fitted on `detector`.
    ///
    /// Its rows stay unfitted and are never reported as values.
    pub fn mark_failed(&mut self, box_index: usize, detector: Detector) -> Result<()> {
        self.expect_next(box_index, detector)?;
        self.advance(detector);
        Ok(())
    }

    /// Hand out the tables once every box has reported for both detectors.
    pub fn finish(self) -> Result<PointTables> {
        if self.state != AccumulatorState::Complete {
            return Err(EddError::ShapeMismatch(format!(
                "point finished in state {:?} with {} box(es) configured",
                self.state,
                self.peaks_per_box.len()
            )));
        }
        let [horizontal, vertical] = self.tables;
        Ok(PointTables {
            horizontal,
            vertical,
        })
    }

    fn expect_next(&self, box_index: usize, detector: Detector) -> Result<()> {
        let next = self.tables[detector.row()].next_box;
        if next >= self.peaks_per_box.len() {
            return Err(EddError::ShapeMismatch(format!(
                "box {} on the {} detector exceeds the {} configured box(es)",
                box_index,
                detector,
                self.peaks_per_box.len()
            )));
        }
        if box_index != next {
            return Err(EddError::ShapeMismatch(format!(
                "box {} on the {} detector arrived before box {}",
                box_index, detector, next
            )));
        }
        Ok(())
    }

    fn advance(&mut self, detector: Detector) {
        self.tables[detector.row()].next_box += 1;
        let lowest = self.tables.iter().map(|t| t.next_box).min().unwrap_or(0);
        self.state = if lowest == self.peaks_per_box.len() {
            AccumulatorState::Complete
        } else {
            AccumulatorState::Accumulating(lowest)
        };
    }
}

/// Completed peak tables of one point.
#[derive(Debug, Clone)]
pub struct PointTables {
    pub horizontal: DetectorTable,
    pub vertical: DetectorTable,
}

impl PointTables {
    pub fn table(&self, detector: Detector) -> &DetectorTable {
        match detector {
            Detector::Horizontal => &self.horizontal,
            Detector::Vertical => &self.vertical,
        }
    }

    pub fn total_peaks(&self) -> usize {
        self.horizontal.fitted.len()
    }

    /// Whether peak `k` was fitted on both detectors.
    pub fn peak_fitted(&self, k: usize) -> bool {
        self.horizontal.fitted[k] && self.vertical.fitted[k]
    }
}
