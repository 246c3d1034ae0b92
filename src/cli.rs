//! Defines command-line interface options using `clap` for the wbtsdata application.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use wbts_data::merge::AxisPolicy;

/// A CLI tool for converting, merging and quality-controlling WBTS CTD and LADCP data
#[derive(Parser, Debug)]
#[command(
    version,
    name = "wbtsdata",
    about = "Load, convert, merge and QC Western Boundary Time Series hydrography"
)]
pub struct Args {
    /// TOML configuration file. Built-in WBTS defaults when not set.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, default_value_t = false, global = true)]
    pub verbose: bool,

    /// Number of threads to use for parallel loading. Defaults to number of CPU cores.
    #[arg(short = 't', long, global = true)]
    pub threads: Option<usize>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List dimensions, variables and attributes of a file
    Inspect {
        /// Path to a NetCDF file or delimited table
        file: PathBuf,

        /// Describe a single variable (kind, shape, attributes, flags)
        #[arg(long)]
        variable: Option<String>,
    },

    /// Convert a file into the canonical schema
    Convert {
        file: PathBuf,

        /// Output NetCDF path
        #[arg(short, long)]
        output: PathBuf,

        /// Source format name from the schema. Detected when not set.
        #[arg(long)]
        format: Option<String>,

        /// Cruise key (GC_YYYY_MM) whose metadata is attached. Taken from the path when not set.
        #[arg(long)]
        cruise: Option<String>,
    },

    /// Convert and merge several files, then run quality control
    Merge {
        #[arg(required = true, num_args = 1..)]
        files: Vec<PathBuf>,

        /// Output NetCDF path
        #[arg(short, long)]
        output: PathBuf,

        /// Source format name applied to every input. Detected per file when not set.
        #[arg(long)]
        format: Option<String>,

        /// Axis policy for the dimensions selected with --dimension (all when none)
        #[arg(long, value_parser = parse_policy)]
        policy: Option<AxisPolicy>,

        /// Dimension the --policy and --tolerance apply to; repeatable
        #[arg(long = "dimension")]
        dimensions: Vec<String>,

        /// Snapping tolerance in coordinate units
        #[arg(long)]
        tolerance: Option<f64>,

        /// Priority of each input in order, used to break ties
        #[arg(long = "priority", num_args = 1..)]
        priorities: Vec<i32>,

        /// Fail on the first QC rule violation
        #[arg(long, default_value_t = false)]
        strict: bool,

        /// Replace samples flagged bad or missing with missing values
        #[arg(long, default_value_t = false)]
        remove_bad: bool,

        /// Write the QC report as JSON
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Merge the yearly merged files of a directory into one all-years file
    MergeYears {
        /// Directory holding the yearly files (or a `Merged` subdirectory)
        dir: PathBuf,

        /// Output NetCDF path
        #[arg(short, long)]
        output: PathBuf,

        /// Only merge the first N files
        #[arg(long)]
        max_files: Option<usize>,
    },

    /// List CTD and LADCP directories below a data root
    Discover { dir: PathBuf },
}

fn parse_policy(s: &str) -> Result<AxisPolicy, String> {
    s.parse::<AxisPolicy>().map_err(|e| e.to_string())
}
