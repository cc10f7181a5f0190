use thiserror::Error;

/// Error types for the edd-fit library.
#[derive(Error, Debug)]
pub enum EddError {
    /// A requested detector, positioner or scan is absent from the input tree.
    #[error("Missing data: {0}")]
    MissingData(String),

    /// The fit window cannot constrain the requested number of peaks.
    #[error(
        "Insufficient data: {samples} samples cannot constrain {nb_peaks} peak(s), at least {required} required"
    )]
    InsufficientData {
        samples: usize,
        required: usize,
        nb_peaks: usize,
    },

    /// The optimizer failed to converge.
    #[error("Fit failed to converge: {0}")]
    FitConvergence(String),

    /// Accumulated parameters do not reshape into the expected peak table.
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    /// Error indicating a mismatch in array dimensions.
    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// Error indicating a singular matrix was encountered.
    #[error("Singular matrix encountered")]
    SingularMatrix,

    /// Linear algebra error.
    #[error("Linear algebra error: {0}")]
    LinearAlgebraError(String),

    /// Invalid or inconsistent configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Scan selector string could not be parsed.
    #[error("Invalid scan selector: {0}")]
    ScanSelector(String),

    /// Error reported by the data tree.
    #[error("Data tree error: {0}")]
    Store(String),

    /// A box-level failure with its location in the scan.
    #[error("Scan {scan}, point {point}, box {box_index}, {detector} detector: {source}")]
    BoxFailed {
        scan: String,
        point: usize,
        box_index: usize,
        detector: String,
        #[source]
        source: Box<EddError>,
    },

    /// I/O error wrapper.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// HDF5 library error.
    #[cfg(feature = "hdf5")]
    #[error("HDF5 error: {0}")]
    Hdf5Error(#[from] hdf5::Error),

    /// YAML serialization/deserialization error.
    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),
}

impl EddError {
    /// Whether this error comes from fitting a single box, as opposed to a
    /// structural problem with the point or the scan.
    pub fn is_box_level(&self) -> bool {
        match self {
            EddError::InsufficientData { .. } | EddError::FitConvergence(_) => true,
            EddError::BoxFailed { source, .. } => source.is_box_level(),
            _ => false,
        }
    }
}

/// Result type alias for edd-fit operations.
pub type Result<T> = std::result::Result<T, EddError>;
