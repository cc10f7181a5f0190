use std::collections::hash_map::Entry;
use std::collections::HashMap;

use ndarray::ArrayD;

use super::{join_path, DataTree};
use crate::error::Result;
use crate::geometry::{Detector, RECORD_WIDTH};

/// Paths of the value and uncertainty tables of one peak.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeakHandle {
    pub values: String,
    pub uncertainties: String,
}

/// Peak angle records of one scan, keyed by peak index.
///
/// The two `2 x 13` tables of a peak are created the first time the peak is
/// written and overwritten row by row afterwards.
#[derive(Debug, Clone)]
pub struct PeakRecords {
    group: String,
    handles: HashMap<usize, PeakHandle>,
}

impl PeakRecords {
    pub fn new(group: &str) -> Self {
        Self {
            group: group.to_string(),
            handles: HashMap::new(),
        }
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    /// Number of peaks with tables in the tree.
    pub fn created(&self) -> usize {
        self.handles.len()
    }

    /// Handle of `peak`, creating its tables on first use.
    pub fn handle<T: DataTree + ?Sized>(&mut self, tree: &mut T, peak: usize) -> Result<&PeakHandle> {
        match self.handles.entry(peak) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let handle = PeakHandle {
                    values: join_path(&[&self.group, &format!("peak_{:04}", peak)]),
                    uncertainties: join_path(&[&self.group, &format!("uncertaintyPeak_{:04}", peak)]),
                };
                let rows = Detector::ALL.len();
                tree.create_dataset(&handle.values, ArrayD::zeros(vec![rows, RECORD_WIDTH]))?;
                tree.create_dataset(
                    &handle.uncertainties,
                    ArrayD::zeros(vec![rows, RECORD_WIDTH]),
                )?;
                log::debug!("Created peak record {}", handle.values);
                Ok(entry.insert(handle))
            }
        }
    }

    /// Overwrite the row of `detector` in both tables of `peak`.
    pub fn write<T: DataTree + ?Sized>(
        &mut self,
        tree: &mut T,
        peak: usize,
        detector: Detector,
        values: &[f64; RECORD_WIDTH],
        uncertainties: &[f64; RECORD_WIDTH],
    ) -> Result<()> {
        let handle = self.handle(tree, peak)?;
        tree.write_row(&handle.values, detector.row(), values)?;
        tree.write_row(&handle.uncertainties, detector.row(), uncertainties)
    }
}
