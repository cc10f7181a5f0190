//! # Data tree
//!
//! Input and output files are trees of named N-dimensional arrays and
//! strings, addressed by `/`-separated paths. Groups are implicit: a group
//! exists as soon as one node below it does.
//!
//! [`Hdf5Tree`] reads and writes HDF5 files (`hdf5` feature). [`MemoryTree`]
//! keeps everything in memory.

#[cfg(feature = "hdf5")]
mod hdf5_tree;
mod memory;
mod records;

#[cfg(feature = "hdf5")]
pub use hdf5_tree::Hdf5Tree;
pub use memory::MemoryTree;
pub use records::{PeakHandle, PeakRecords};

use ndarray::ArrayD;

use crate::error::Result;

/// Hierarchical key/value store of arrays and strings.
pub trait DataTree {
    /// Whether `path` names a node or a group.
    fn contains(&self, path: &str) -> bool;

    /// Create a new dataset; fails if `path` is already taken.
    fn create_dataset(&mut self, path: &str, data: ArrayD<f64>) -> Result<()>;

    /// Create or replace a dataset.
    fn write_dataset(&mut self, path: &str, data: ArrayD<f64>) -> Result<()>;

    /// Overwrite one row of an existing two-dimensional dataset.
    fn write_row(&mut self, path: &str, row: usize, values: &[f64]) -> Result<()>;

    /// Create or replace a string node.
    fn write_string(&mut self, path: &str, value: &str) -> Result<()>;

    fn read_array(&self, path: &str) -> Result<ArrayD<f64>>;

    fn read_string(&self, path: &str) -> Result<String>;

    /// Names of the direct children of the group at `path`.
    fn children(&self, path: &str) -> Vec<String>;

    /// Remove a node or a whole group. Returns whether anything was removed.
    fn remove(&mut self, path: &str) -> bool;

    /// Push pending writes to the backing storage.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Join path segments with `/`, ignoring empty segments.
pub fn join_path(segments: &[&str]) -> String {
    segments
        .iter()
        .map(|s| s.trim_matches('/'))
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}
