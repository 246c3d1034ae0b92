//! Measurement file loading
//!
//! [`load_dataset`] turns one file into a [`Dataset`], picking the reader from
//! the file extension: NetCDF (`.nc`, `.nc4`, `.cdf`) goes through
//! [`crate::netcdf_io`], delimited text (`.csv`, `.tsv`, `.txt`, `.cal`)
//! through [`crate::table_io`]. [`load_many`] loads independent files on the
//! rayon pool and hands the results back only once every load has finished.

use crate::dataset::Dataset;
use crate::errors::{Result, WbtsError};
use crate::parallel::ParallelConfig;
use crate::{netcdf_io, table_io};
use log::{debug, info, warn};
use rayon::prelude::*;
use std::path::{Path, PathBuf};

/// A variable the caller expects to find, optionally with its units
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedVariable {
    pub name: String,
    pub units: Option<String>,
}

/// Structural expectations handed to the loader
///
/// Only the required dimensions are enforced. Expected variables drive
/// diagnostics and the `unexpected_variables` bookkeeping; anything else in
/// the file is still loaded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaHint {
    pub required_dimensions: Vec<String>,
    pub expected_variables: Vec<ExpectedVariable>,
    /// Column holding the coordinate axis of a delimited table, defaults to the first column
    pub index_column: Option<String>,
}

impl SchemaHint {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn require_dimension(mut self, name: impl Into<String>) -> Self {
        self.required_dimensions.push(name.into());
        self
    }

    #[must_use]
    pub fn expect(mut self, name: impl Into<String>, units: Option<&str>) -> Self {
        self.expected_variables.push(ExpectedVariable {
            name: name.into(),
            units: units.map(str::to_string),
        });
        self
    }

    #[must_use]
    pub fn with_index_column(mut self, name: impl Into<String>) -> Self {
        self.index_column = Some(name.into());
        self
    }

    pub fn is_expected(&self, name: &str) -> bool {
        self.expected_variables.iter().any(|v| v.name == name)
    }

    /// Fail with [`WbtsError::MissingDimension`] for the first absent required dimension
    pub fn check_dimensions(&self, path: &Path, dataset: &Dataset) -> Result<()> {
        match self
            .required_dimensions
            .iter()
            .find(|d| dataset.coordinate(d).is_none())
        {
            Some(dim) => Err(WbtsError::MissingDimension {
                path: path.to_path_buf(),
                dimension: dim.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Log expected variables that are absent or carry other units
    pub fn report_expectations(&self, path: &Path, dataset: &Dataset) {
        for expected in &self.expected_variables {
            match dataset.variable(&expected.name) {
                None => debug!(
                    "Expected variable '{}' not present in {}",
                    expected.name,
                    path.display()
                ),
                Some(var) => {
                    if let Some(units) = &expected.units {
                        if var.units() != Some(units.as_str()) {
                            warn!(
                                "Variable '{}' in {} has units {:?}, expected '{}'",
                                expected.name,
                                path.display(),
                                var.units(),
                                units
                            );
                        }
                    }
                }
            }
        }
    }

    /// Names of loaded variables the hint did not mention
    pub fn unexpected<'a>(&self, names: impl Iterator<Item = &'a str>) -> Vec<String> {
        if self.expected_variables.is_empty() {
            return Vec::new();
        }
        names
            .filter(|n| !self.is_expected(n))
            .map(str::to_string)
            .collect()
    }
}

/// Supported input formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    NetCDF,
    Table,
}

impl FileKind {
    /// Guess the format from the file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "nc" | "nc4" | "cdf" | "netcdf" => Some(Self::NetCDF),
            "csv" | "tsv" | "txt" | "cal" => Some(Self::Table),
            _ => None,
        }
    }
}

/// Load a single measurement file
///
/// # Errors
///
/// Returns a load error if the file does not exist, cannot be parsed, or lacks
/// a dimension the hint requires.
pub fn load_dataset(path: &Path, hint: &SchemaHint) -> Result<Dataset> {
    if !path.exists() {
        return Err(WbtsError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    let dataset = match FileKind::from_path(path) {
        Some(FileKind::NetCDF) => netcdf_io::read_netcdf(path, hint)?,
        Some(FileKind::Table) => table_io::read_table(path, hint)?,
        None => {
            return Err(WbtsError::load(
                path,
                "Unrecognised file extension (expected .nc, .csv, .tsv, .txt or .cal)",
            ))
        }
    };

    info!(
        "Loaded {} ({} dimension(s), {} variable(s))",
        path.display(),
        dataset.coordinates().len(),
        dataset.variable_names().len()
    );
    Ok(dataset)
}

/// Load independent files in parallel
///
/// Loads share no state. Results keep the order of `paths`; when several loads
/// fail the error of the earliest path is returned.
pub fn load_many(paths: &[PathBuf], hint: &SchemaHint, config: &ParallelConfig) -> Result<Vec<Dataset>> {
    debug!("Loading {} file(s) in parallel", paths.len());
    let results: Vec<Result<Dataset>> =
        config.install(|| paths.par_iter().map(|p| load_dataset(p, hint)).collect())?;
    results.into_iter().collect()
}
