//! Staged Loader -> Converter -> Merger/QC runs
//!
//! [`Pipeline::run`] keeps the output of every stage that succeeded, so a
//! failing merge still hands back the loaded and converted datasets.

use crate::cast_times::align_cast_times;
use crate::config::PipelineConfig;
use crate::convert::Converter;
use crate::dataset::{Dataset, Variable};
use crate::discover::{cruise_key, merged_files};
use crate::errors::{Result, WbtsError};
use crate::loader::{load_many, SchemaHint};
use crate::merge::{merge_datasets, MergeOptions, MergeOutput};
use log::{info, warn};
use ndarray::{ArrayD, IxDyn};
use std::fmt;
use std::path::{Path, PathBuf};

/// Name of the per-sample cruise identifier variable
pub const CRUISE_VARIABLE: &str = "GC_STRING";

/// Pipeline stages in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Load,
    Convert,
    Merge,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Load => "load",
            Self::Convert => "convert",
            Self::Merge => "merge",
        };
        write!(f, "{name}")
    }
}

/// Outputs of the stages that ran, and the failure that stopped the run
#[derive(Debug, Default)]
pub struct PipelineRun {
    pub loaded: Vec<Dataset>,
    pub converted: Vec<Dataset>,
    pub merged: Option<MergeOutput>,
    pub failure: Option<(Stage, WbtsError)>,
}

impl PipelineRun {
    pub fn is_complete(&self) -> bool {
        self.failure.is_none() && self.merged.is_some()
    }

    /// Last stage that produced its output
    pub fn completed_stage(&self) -> Option<Stage> {
        if self.merged.is_some() {
            Some(Stage::Merge)
        } else if !self.converted.is_empty() {
            Some(Stage::Convert)
        } else if !self.loaded.is_empty() {
            Some(Stage::Load)
        } else {
            None
        }
    }

    /// The merge output, or the error that stopped the run
    pub fn into_result(self) -> Result<MergeOutput> {
        match (self.merged, self.failure) {
            (_, Some((_, error))) => Err(error),
            (Some(output), None) => Ok(output),
            (None, None) => Err(WbtsError::structure("pipeline produced no merged dataset")),
        }
    }
}

/// A configured Loader -> Converter -> Merger/QC run
#[derive(Debug, Clone)]
pub struct Pipeline<'a> {
    config: &'a PipelineConfig,
    format: Option<String>,
    cruise: Option<String>,
    merge: MergeOptions,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        Self {
            config,
            format: None,
            cruise: None,
            merge: config.merge.clone(),
        }
    }

    /// Convert every input with this source format instead of detecting it
    #[must_use]
    pub fn with_format(mut self, format: Option<String>) -> Self {
        self.format = format;
        self
    }

    /// Use this cruise key instead of the one found in each input path
    #[must_use]
    pub fn with_cruise(mut self, cruise: Option<String>) -> Self {
        self.cruise = cruise;
        self
    }

    /// Merge options for this run, replacing the configured ones
    #[must_use]
    pub fn with_merge_options(mut self, merge: MergeOptions) -> Self {
        self.merge = merge;
        self
    }

    pub fn hint(&self) -> SchemaHint {
        self.config.hint_for(self.format.as_deref())
    }

    pub fn load(&self, paths: &[PathBuf]) -> Result<Vec<Dataset>> {
        load_many(paths, &self.hint(), &self.config.parallel())
    }

    /// Convert one dataset, stamping the metadata of cruise `key`
    pub fn convert_one(&self, dataset: &Dataset, key: Option<&str>) -> Result<Dataset> {
        let key = self.cruise.as_deref().or(key);
        let cruise_attrs = key
            .map(|k| self.config.cruise_attributes(k))
            .unwrap_or_default();
        let converted = Converter::new(&self.config.schema)
            .with_attributes(&cruise_attrs)
            .convert(dataset, self.format.as_deref())?;
        match key {
            Some(key) => with_cruise_variable(converted, key),
            None => Ok(converted),
        }
    }

    /// Convert datasets loaded from `paths`, taking cruise keys from the paths
    pub fn convert(&self, datasets: &[Dataset], paths: &[PathBuf]) -> Result<Vec<Dataset>> {
        datasets
            .iter()
            .enumerate()
            .map(|(i, ds)| {
                let key = paths.get(i).and_then(|p| cruise_key(p));
                self.convert_one(ds, key.as_deref())
            })
            .collect()
    }

    /// Merge converted datasets, first moving CTD casts onto LADCP times
    /// when configured
    pub fn merge(&self, converted: &[Dataset]) -> Result<MergeOutput> {
        if self.config.ctd_times_from_ladcp {
            merge_datasets(&align_cast_times(converted)?, &self.merge)
        } else {
            merge_datasets(converted, &self.merge)
        }
    }

    /// Run every stage over `paths`, stopping at the first failing stage
    pub fn run(&self, paths: &[PathBuf]) -> PipelineRun {
        let mut run = PipelineRun::default();

        match self.load(paths) {
            Ok(loaded) => run.loaded = loaded,
            Err(e) => {
                run.failure = Some((Stage::Load, e));
                return run;
            }
        }
        match self.convert(&run.loaded, paths) {
            Ok(converted) => run.converted = converted,
            Err(e) => {
                run.failure = Some((Stage::Convert, e));
                return run;
            }
        }
        match self.merge(&run.converted) {
            Ok(merged) => run.merged = Some(merged),
            Err(e) => run.failure = Some((Stage::Merge, e)),
        }

        if let Some((stage, error)) = &run.failure {
            warn!("Pipeline stopped at stage '{stage}': {error}");
        }
        run
    }
}

/// Add a `GC_STRING` text variable along `DATETIME` holding the cruise key
fn with_cruise_variable(dataset: Dataset, key: &str) -> Result<Dataset> {
    let Some(len) = dataset.dim_len("DATETIME") else {
        return Ok(dataset);
    };
    if dataset.contains_variable(CRUISE_VARIABLE) {
        return Ok(dataset);
    }
    let values = ArrayD::from_elem(IxDyn(&[len]), key.to_string());
    let var = Variable::text(vec!["DATETIME".to_string()], values)?
        .with_attribute("long_name", "Cruise identifier");
    dataset.with_variable(CRUISE_VARIABLE, var)
}

/// Merge the yearly products of `dir` into one all-years dataset
///
/// Reads `dir/Merged` when it exists, `dir` otherwise. Inputs are joined on a
/// union of their axes; `time_cruise_start` and `time_cruise_end` are set to
/// the dates of the first and last `DATETIME` value.
///
/// # Errors
///
/// Fails when no input holds any variable, or with the first load or merge error.
pub fn merge_years(dir: &Path, config: &PipelineConfig, max_files: Option<usize>) -> Result<MergeOutput> {
    let merged_dir = dir.join("Merged");
    let source = if merged_dir.is_dir() { merged_dir.as_path() } else { dir };
    let files = merged_files(source, &config.discovery, max_files)?;
    info!("Merging {} yearly file(s) from {}", files.len(), source.display());

    let hint = SchemaHint::new().require_dimension("DATETIME");
    let datasets = load_many(&files, &hint, &config.parallel())?;
    let valid: Vec<Dataset> = datasets
        .into_iter()
        .zip(&files)
        .filter_map(|(ds, path)| {
            if ds.variable_names().is_empty() {
                warn!("Dataset {} is empty or invalid", path.display());
                None
            } else {
                Some(ds)
            }
        })
        .collect();
    if valid.is_empty() {
        return Err(WbtsError::structure("No valid datasets found to merge"));
    }

    let mut options = config.merge.clone();
    options.extent_attributes = true;
    options.attributes.extend_from(&config.merge_years_attributes);
    let mut output = merge_datasets(&valid, &options)?;

    let mut attrs = output.dataset.attrs().clone();
    for (coverage, cruise) in [
        ("time_coverage_start", "time_cruise_start"),
        ("time_coverage_end", "time_cruise_end"),
    ] {
        let date = attrs
            .get_str(coverage)
            .and_then(|ts| ts.get(..10))
            .map(str::to_string);
        if let Some(date) = date {
            attrs.insert(cruise, date);
        }
    }
    output.dataset = output.dataset.with_attrs(attrs);
    Ok(output)
}
