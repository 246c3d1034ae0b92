//! WBTSdata: loading, converting, merging and quality-controlling WBTS hydrography
//!
//! A Rust library for the Western Boundary Time Series CTD and LADCP record.
//! Measurements are loaded from NetCDF files or delimited tables, converted
//! into one canonical schema, merged onto common coordinates and flagged by
//! quality-control rules. The merged dataset is written back to NetCDF and
//! accompanied by a JSON QC report.
//!
//! ## Key Features
//!
//! - **Canonical Schema**: name, unit and time-axis normalisation driven by configuration
//! - **Coordinate Reconciliation**: union, intersection or nearest-neighbour axes with tolerances
//! - **Deterministic Conflicts**: QC flag, then priority, then agreement or averaging
//! - **Quality Control**: range, rate-of-change, spike and non-finite rules that only raise flags
//! - **Parallel Loading**: independent files loaded on a Rayon pool
//!
//! ## Module Organization
//!
//! - [`dataset`]: the in-memory labeled dataset, attributes and QC flags
//! - [`loader`], [`netcdf_io`], [`table_io`]: reading (and writing) measurement files
//! - [`convert`]: the canonical schema and the converter
//! - [`merge`]: merge plans, conflict resolution, QC rules and reports
//! - [`metadata`]: inspection printouts and extent attributes
//! - [`discover`]: cruise directory and merged-file discovery
//! - [`cast_times`]: CTD casts moved onto the times of their LADCP casts
//! - [`pipeline`]: staged runs and the all-years merge
//! - [`config`]: TOML configuration
//! - [`parallel`]: parallel processing configuration
//! - [`errors`]: centralized error handling
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use std::path::Path;
//! use wbts_data::prelude::*;
//!
//! let schema = CanonicalSchema::wbts();
//! let ctd = load_dataset(Path::new("GC_2001_04/CTD/cast_001.nc"), &SchemaHint::new()).unwrap();
//! let ladcp = load_dataset(Path::new("GC_2001_04/ladcp_velfiles/cast_001.nc"), &SchemaHint::new()).unwrap();
//!
//! let converter = Converter::new(&schema);
//! let inputs = vec![
//!     converter.convert(&ctd, Some("ctd")).unwrap(),
//!     converter.convert(&ladcp, Some("ladcp")).unwrap(),
//! ];
//!
//! let output = merge_datasets(&inputs, &MergeOptions::default()).unwrap();
//! write_dataset(&output.dataset, Path::new("merged.nc")).unwrap();
//! println!("{}", output.report.to_json().unwrap());
//! ```

// Core modules
pub mod cast_times;
pub mod config;
pub mod convert;
pub mod dataset;
pub mod discover;
pub mod errors;
pub mod loader;
pub mod merge;
pub mod metadata;
pub mod netcdf_io;
pub mod parallel;
pub mod pipeline;
pub mod table_io;
pub mod time;

// Direct re-exports for the public API
pub use errors::*;

// High-level convenience API
pub mod prelude {
    //! Commonly used imports for convenience
    pub use crate::config::{CruiseInfo, PipelineConfig};
    pub use crate::convert::{CanonicalSchema, Converter};
    pub use crate::dataset::{AttrValue, AttributeBag, Coordinate, Dataset, QcFlag, Variable};
    pub use crate::errors::{Result, WbtsError};
    pub use crate::loader::{load_dataset, load_many, SchemaHint};
    pub use crate::merge::{
        merge_datasets, AxisPolicy, DimensionRule, MergeOptions, MergeOutput, QcCheck, QcReport,
        QcRule,
    };
    pub use crate::netcdf_io::{read_netcdf, write_dataset, NetCDFWriter};
    pub use crate::parallel::ParallelConfig;
    pub use crate::pipeline::{merge_years, Pipeline, PipelineRun, Stage};
}
