use std::path::PathBuf;

use thiserror::Error;

/// The error type for `medeval` operations.
///
/// This enum encapsulates all possible errors that can occur while computing losses and
/// metrics or while generating a metrics report, ranging from configuration issues to
/// unreadable images.
#[derive(Error, Debug)]
pub enum MedEvalError {
    /// Error for when an invalid configuration is provided.
    /// This can happen if configuration parameters are logically inconsistent.
    #[error("Invalid configuration: {reason}")]
    InvalidConfiguration {
        /// The reason why the configuration is invalid.
        reason: String,
    },

    /// Error for when a configuration file cannot be loaded.
    #[error("Failed to load configuration {path}: {reason}")]
    ConfigLoadFailed {
        /// The configuration file path.
        path: PathBuf,
        /// The reason reported by the loader.
        reason: String,
    },

    /// Error for when an input tensor has an invalid shape.
    #[error("Invalid input tensor shape: expected {expected}, got {actual}")]
    InvalidTensorShape {
        /// The expected tensor shape.
        expected: String,
        /// The actual tensor shape.
        actual: String,
    },

    /// Error for when an input tensor holds values outside the accepted domain.
    #[error("Invalid tensor values: {reason}")]
    InvalidTensorValues {
        /// Description of the offending values.
        reason: String,
    },

    /// Error for when a metric name is not in the metric table.
    #[error("Unsupported metric: {name}")]
    UnsupportedMetric {
        /// The requested metric name.
        name: String,
    },

    /// Error for when a loss name is not in the loss table.
    #[error("Unsupported loss function: {name}")]
    UnsupportedLoss {
        /// The requested loss name.
        name: String,
    },

    /// Error for when a metric does not apply to the configured problem type.
    #[error("Metric {metric} is not defined for {problem_type} problems")]
    MetricNotApplicable {
        /// The requested metric.
        metric: String,
        /// The configured problem type.
        problem_type: String,
    },

    /// Error for when the input CSV lacks a required column.
    #[error("The input csv should have a column named {column}")]
    MissingColumn {
        /// The missing column name.
        column: String,
    },

    /// Error for when a CSV cell cannot be interpreted.
    #[error("Invalid value {value:?} in column {column} of row {row}")]
    InvalidCsvValue {
        /// The column holding the value.
        column: String,
        /// Zero-based data row index.
        row: usize,
        /// The raw cell content.
        value: String,
    },

    /// Error for when reading the input CSV fails.
    #[error("Failed to read csv: {path}")]
    CsvReadFailed {
        /// The CSV path.
        path: PathBuf,
        /// The underlying CSV error.
        #[source]
        source: csv::Error,
    },

    /// Error for when opening or decoding an image fails.
    #[error("Failed to read image: {path}: {reason}")]
    ImageReadFailed {
        /// The image path.
        path: PathBuf,
        /// The reason for the failure.
        reason: String,
    },

    /// Error for when a prediction and its target do not describe the same grid.
    #[error("Image geometry mismatch between {prediction} and {target}: {reason}")]
    GeometryMismatch {
        /// Prediction image path.
        prediction: PathBuf,
        /// Target image path.
        target: PathBuf,
        /// What differs.
        reason: String,
    },

    /// Error for file system operations.
    #[error("I/O error on {path}")]
    Io {
        /// The path involved.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Error for when the metrics report cannot be serialized.
    #[error("Failed to serialize metrics report")]
    Serialization(#[from] serde_json::Error),
}

/// A specialized `Result` type for `medeval` operations.
pub type MedEvalResult<T> = Result<T, MedEvalError>;

impl MedEvalError {
    /// Shorthand for [`MedEvalError::InvalidTensorShape`].
    pub(crate) fn shape(expected: impl Into<String>, actual: impl std::fmt::Debug) -> Self {
        Self::InvalidTensorShape {
            expected: expected.into(),
            actual: format!("{actual:?}"),
        }
    }

    /// Shorthand for [`MedEvalError::InvalidConfiguration`].
    pub(crate) fn config(reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            reason: reason.into(),
        }
    }
}
