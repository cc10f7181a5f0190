//! Matrix conversion utilities.
//!
//! The public API works on ndarray types while the linear solves go through
//! nalgebra. These helpers copy between the two representations.

use crate::error::{EddError, Result};
use nalgebra::{DMatrix, DVector};
use ndarray::{Array1, Array2};

/// Convert an ndarray Array2 to a nalgebra DMatrix.
pub fn ndarray_to_nalgebra(arr: &Array2<f64>) -> DMatrix<f64> {
    // ndarray is row-major by default, nalgebra is column-major
    DMatrix::from_fn(arr.nrows(), arr.ncols(), |i, j| arr[[i, j]])
}

/// Convert a nalgebra DMatrix to an ndarray Array2.
pub fn nalgebra_to_ndarray(mat: &DMatrix<f64>) -> Array2<f64> {
    Array2::from_shape_fn((mat.nrows(), mat.ncols()), |(i, j)| mat[(i, j)])
}

/// Convert an ndarray Array1 to a nalgebra DVector.
pub fn ndarray_vec_to_nalgebra(arr: &Array1<f64>) -> DVector<f64> {
    DVector::from_iterator(arr.len(), arr.iter().copied())
}

/// Convert a nalgebra DVector to an ndarray Array1.
pub fn nalgebra_vec_to_ndarray(vec: &DVector<f64>) -> Array1<f64> {
    Array1::from_iter(vec.iter().copied())
}

/// Reshape a flat vector into a row-major table with `width` columns.
///
/// Fails with `ShapeMismatch` when the length is not an exact multiple of the width.
pub fn reshape_rows(flat: &[f64], width: usize) -> Result<Array2<f64>> {
    if width == 0 || flat.len() % width != 0 {
        return Err(EddError::ShapeMismatch(format!(
            "{} values cannot be arranged in rows of {}",
            flat.len(),
            width
        )));
    }
    Array2::from_shape_vec((flat.len() / width, width), flat.to_vec())
        .map_err(|e| EddError::ShapeMismatch(e.to_string()))
}
