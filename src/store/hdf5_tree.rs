use std::path::Path;
use std::str::FromStr;

use hdf5::types::{VarLenAscii, VarLenUnicode};
use hdf5::{Dataset, File, Group};
use ndarray::{ArrayD, IxDyn};

use super::DataTree;
use crate::error::{EddError, Result};

/// A [`DataTree`] stored in an HDF5 file.
///
/// Arrays are `f64` datasets, strings are scalar variable-length UTF-8
/// datasets, and every path segment but the last is an HDF5 group. Integer
/// datasets of the beamline files are converted to `f64` when read.
#[derive(Debug)]
pub struct Hdf5Tree {
    file: File,
}

fn normalize(path: &str) -> &str {
    path.trim_matches('/')
}

/// Split a normalized path into its parent group and its last segment.
fn split(path: &str) -> (&str, &str) {
    path.rsplit_once('/').unwrap_or(("", path))
}

impl Hdf5Tree {
    /// Open an existing file read-only.
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            file: File::open(path)?,
        })
    }

    /// Open a file for writing, creating it (and its directory) if needed.
    /// Existing content is kept.
    pub fn append(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(Self {
            file: File::append(path)?,
        })
    }

    /// Create an empty file, truncating any existing one.
    pub fn create(path: &Path) -> Result<Self> {
        Ok(Self {
            file: File::create(path)?,
        })
    }

    /// Group at `path`, if every segment of it is a group.
    fn group_at(&self, path: &str) -> Option<Group> {
        let mut group = self.file.group("/").ok()?;
        for segment in normalize(path).split('/').filter(|s| !s.is_empty()) {
            if !group.link_exists(segment) {
                return None;
            }
            group = group.group(segment).ok()?;
        }
        Some(group)
    }

    /// Group at `path`, creating the missing segments.
    fn ensure_group(&self, path: &str) -> Result<Group> {
        let mut group = self.file.group("/")?;
        for segment in normalize(path).split('/').filter(|s| !s.is_empty()) {
            group = if group.link_exists(segment) {
                group.group(segment).map_err(|_| {
                    EddError::Store(format!("{} in {} is not a group", segment, path))
                })?
            } else {
                group.create_group(segment)?
            };
        }
        Ok(group)
    }

    fn dataset(&self, path: &str) -> Result<Dataset> {
        let path = normalize(path);
        if !self.contains(path) {
            return Err(EddError::MissingData(path.to_string()));
        }
        self.file
            .dataset(path)
            .map_err(|_| EddError::Store(format!("{} is not a dataset", path)))
    }

    /// Unlink the dataset at `path` so that it can be written anew.
    fn replace(&self, path: &str) -> Result<()> {
        if self.contains(path) {
            self.dataset(path)?;
            let (parent, name) = split(path);
            self.ensure_group(parent)?.unlink(name)?;
        }
        Ok(())
    }
}

impl DataTree for Hdf5Tree {
    fn contains(&self, path: &str) -> bool {
        let path = normalize(path);
        if path.is_empty() {
            return true;
        }
        let (parent, name) = split(path);
        self.group_at(parent)
            .is_some_and(|group| group.link_exists(name))
    }

    fn create_dataset(&mut self, path: &str, data: ArrayD<f64>) -> Result<()> {
        let path = normalize(path);
        if self.contains(path) {
            return Err(EddError::Store(format!("{} already exists", path)));
        }
        let (parent, name) = split(path);
        let flat: Vec<f64> = data.iter().copied().collect();
        self.ensure_group(parent)?
            .new_dataset::<f64>()
            .shape(data.shape().to_vec())
            .create(name)?
            .write_raw(flat.as_slice())?;
        Ok(())
    }

    fn write_dataset(&mut self, path: &str, data: ArrayD<f64>) -> Result<()> {
        let path = normalize(path);
        self.replace(path)?;
        self.create_dataset(path, data)
    }

    fn write_row(&mut self, path: &str, row: usize, values: &[f64]) -> Result<()> {
        let path = normalize(path);
        let dataset = self.dataset(path)?;
        let shape = dataset.shape();
        if shape.len() != 2 {
            return Err(EddError::Store(format!("{} is not a table", path)));
        }
        if row >= shape[0] || values.len() != shape[1] {
            return Err(EddError::Store(format!(
                "cannot write {} values to row {} of {} with shape {:?}",
                values.len(),
                row,
                path,
                shape
            )));
        }

        let mut table = dataset.read_raw::<f64>()?;
        let width = shape[1];
        table[row * width..(row + 1) * width].copy_from_slice(values);
        dataset.write_raw(table.as_slice())?;
        Ok(())
    }

    fn write_string(&mut self, path: &str, value: &str) -> Result<()> {
        let path = normalize(path);
        self.replace(path)?;
        let text = VarLenUnicode::from_str(value)
            .map_err(|e| EddError::Store(format!("{}: {}", path, e)))?;
        let (parent, name) = split(path);
        self.ensure_group(parent)?
            .new_dataset::<VarLenUnicode>()
            .shape(())
            .create(name)?
            .write_scalar(&text)?;
        Ok(())
    }

    fn read_array(&self, path: &str) -> Result<ArrayD<f64>> {
        let dataset = self.dataset(path)?;
        let shape = dataset.shape();
        let values = dataset.read_raw::<f64>()?;
        ArrayD::from_shape_vec(IxDyn(&shape), values)
            .map_err(|e| EddError::ShapeMismatch(format!("{}: {}", normalize(path), e)))
    }

    fn read_string(&self, path: &str) -> Result<String> {
        let dataset = self.dataset(path)?;
        match dataset.read_scalar::<VarLenUnicode>() {
            Ok(text) => Ok(text.as_str().to_string()),
            Err(_) => Ok(dataset.read_scalar::<VarLenAscii>()?.as_str().to_string()),
        }
    }

    fn children(&self, path: &str) -> Vec<String> {
        self.group_at(path)
            .and_then(|group| group.member_names().ok())
            .unwrap_or_default()
    }

    fn remove(&mut self, path: &str) -> bool {
        let path = normalize(path);
        if path.is_empty() || !self.contains(path) {
            return false;
        }
        let (parent, name) = split(path);
        self.group_at(parent)
            .is_some_and(|group| group.unlink(name).is_ok())
    }

    fn flush(&mut self) -> Result<()> {
        self.file.flush()?;
        Ok(())
    }
}
