//! Centralized error handling for WBTSdata
//!
//! Every stage of the pipeline reports failures through [`WbtsError`]. The
//! variants group into the four families the pipeline distinguishes:
//!
//! - load errors: [`WbtsError::FileNotFound`], [`WbtsError::Load`],
//!   [`WbtsError::MissingDimension`]
//! - schema errors: [`WbtsError::Schema`]
//! - alignment errors: [`WbtsError::Alignment`], [`WbtsError::Conflict`]
//! - QC errors: [`WbtsError::Qc`] (strict mode only)
//!
//! Each variant carries the file, variable or coordinate that identifies the
//! failure.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for WBTSdata operations
#[derive(Debug, Error)]
pub enum WbtsError {
    /// Input file does not exist
    #[error("File not found: {}", path.display())]
    FileNotFound { path: PathBuf },

    /// File exists but its structure cannot be turned into a dataset
    #[error("Failed to load '{}': {message}", path.display())]
    Load { path: PathBuf, message: String },

    /// A dimension the schema hint requires is absent from the file
    #[error("Required dimension '{dimension}' missing in '{}'", path.display())]
    MissingDimension { path: PathBuf, dimension: String },

    /// Canonical variable missing or unmappable, or inputs disagree on a variable's layout
    #[error("Schema error for variable '{variable}': {message}")]
    Schema { variable: String, message: String },

    /// Coordinate axes cannot be reconciled
    #[error("Alignment error on dimension '{dimension}': {message}")]
    Alignment { dimension: String, message: String },

    /// Non-numeric samples disagree and no tie-break applies
    #[error("Unresolvable conflict for variable '{variable}' at {coordinate}")]
    Conflict { variable: String, coordinate: String },

    /// Strict-mode QC rule violation
    #[error("QC rule '{rule}' flagged variable '{variable}' at {coordinate} (sample {index:?})")]
    Qc {
        rule: String,
        variable: String,
        index: Vec<usize>,
        /// Coordinate values of the sample, `DEPTH=10`-style
        coordinate: String,
    },

    /// Dataset invariant broken (shape mismatch, unknown dimension, non-monotonic axis)
    #[error("Invalid dataset structure: {message}")]
    InvalidStructure { message: String },

    /// Variable not found in a dataset
    #[error("Variable '{var}' not found in dataset")]
    VariableNotFound { var: String },

    /// Configuration file could not be interpreted
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// NetCDF library errors
    #[error("NetCDF error: {0}")]
    NetCDF(#[from] netcdf::Error),

    /// I/O operation errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Array shape or dimension error
    #[error("Array error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    /// Delimited table parsing errors
    #[error("Table error: {0}")]
    Csv(#[from] csv::Error),

    /// TOML configuration parsing errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// JSON report serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Thread pool configuration error
    #[error("Thread pool error: {0}")]
    ThreadPool(String),
}

impl WbtsError {
    /// Build a [`WbtsError::Load`] for `path`
    pub fn load(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Load {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Build a [`WbtsError::Schema`] for `variable`
    pub fn schema(variable: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Schema {
            variable: variable.into(),
            message: message.into(),
        }
    }

    /// Build a [`WbtsError::Alignment`] for `dimension`
    pub fn alignment(dimension: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Alignment {
            dimension: dimension.into(),
            message: message.into(),
        }
    }

    /// Build a [`WbtsError::InvalidStructure`]
    pub fn structure(message: impl Into<String>) -> Self {
        Self::InvalidStructure {
            message: message.into(),
        }
    }

    /// True for the load-error family
    pub fn is_load_error(&self) -> bool {
        matches!(
            self,
            Self::FileNotFound { .. } | Self::Load { .. } | Self::MissingDimension { .. }
        )
    }
}

/// Result type alias for WBTSdata operations
pub type Result<T> = std::result::Result<T, WbtsError>;
