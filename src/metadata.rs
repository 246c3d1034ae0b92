//! Dataset metadata inspection and extent attributes
//!
//! The printing helpers back the `inspect` command. [`extent_attributes`]
//! derives the geospatial and time coverage attributes stamped on merged
//! datasets.

use crate::dataset::{AttributeBag, Dataset, QcFlag, Variable};
use crate::errors::Result;
use crate::merge::FlagCounts;
use crate::time::{format_epoch_seconds, CfTimeUnits};

/// Structured metadata for a dataset variable
#[derive(Debug, Clone)]
pub struct VariableMetadata {
    pub name: String,
    pub kind: &'static str,
    pub dimensions: Vec<DimensionInfo>,
    pub attributes: AttributeBag,
    pub total_elements: usize,
    pub flags: FlagCounts,
}

/// Information about a dimension
#[derive(Debug, Clone, PartialEq)]
pub struct DimensionInfo {
    pub name: String,
    pub length: usize,
}

/// Min/mean/max/std over the present samples of a numeric variable
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VariableSummary {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

/// Prints global attributes and variables of a dataset.
pub fn print_metadata(dataset: &Dataset) {
    println!("\n===== Global Attributes =====");
    for (key, value) in dataset.attrs().iter() {
        println!("- {key}: {value}");
    }

    println!("\n===== Variables =====");
    for (name, var) in dataset.variables() {
        let dims: Vec<String> = var
            .dims()
            .iter()
            .zip(var.shape())
            .map(|(d, n)| format!("{d}[{n}]"))
            .collect();
        println!("- {} ({})", name, dims.join(", "));
    }
}

/// Lists all dimensions and variables in a clean, organized format.
pub fn list_variables_and_dimensions(dataset: &Dataset) {
    println!("\n Dimensions");
    println!("==============");

    if dataset.coordinates().is_empty() {
        println!("   (No dimensions found)");
    } else {
        for coord in dataset.coordinates() {
            match coord.units() {
                Some(units) => println!("    {} = {} ({units})", coord.name(), coord.len()),
                None => println!("    {} = {}", coord.name(), coord.len()),
            }
        }
    }

    println!("\n Variables");
    println!("=============");

    let mut count = 0;
    for (name, var) in dataset.variables() {
        count += 1;
        let shape: Vec<String> = var.shape().iter().map(ToString::to_string).collect();
        println!(
            "    {} ({}): [{}] = ({})",
            name,
            var.data().kind(),
            var.dims().join(", "),
            shape.join(" × ")
        );

        let key_attrs: Vec<String> = ["units", "long_name", "non_canonical"]
            .iter()
            .filter_map(|k| var.attrs().get(k).map(|v| format!("{k}: {v}")))
            .collect();
        if !key_attrs.is_empty() {
            println!("      └─ {}", key_attrs.join(", "));
        }
    }
    if count == 0 {
        println!("   (No variables found)");
    }

    println!("\n💡 Tip: Use --variable <name> to describe a single variable");
}

/// Describes a specific variable showing its kind, shape, flags and all attributes.
pub fn describe_variable(dataset: &Dataset, var_name: &str) -> Result<()> {
    let meta = get_variable_metadata(dataset, var_name)?;

    println!("\n Variable Description: {var_name}");
    println!("={}", "=".repeat(var_name.len() + 25));
    println!(" Kind: {}", meta.kind);

    if meta.dimensions.is_empty() {
        println!(" Dimensions: (scalar)");
    } else {
        let names: Vec<&str> = meta.dimensions.iter().map(|d| d.name.as_str()).collect();
        let shape: Vec<String> = meta.dimensions.iter().map(|d| d.length.to_string()).collect();
        println!(" Dimensions: [{}]", names.join(", "));
        println!(" Shape: ({})", shape.join(" × "));
    }

    if meta.attributes.is_empty() {
        println!("\n  Attributes: (none)");
    } else {
        println!("\n  Attributes:");
        for (key, value) in meta.attributes.iter() {
            println!("   • {key}: {value}");
        }
    }

    println!("\n QC Flags ({} samples):", meta.total_elements);
    for flag in QcFlag::ALL {
        println!("    {:<12} {}", flag.as_str(), meta.flags.get(flag));
    }

    let var = dataset.require_variable(var_name)?;
    if let Some(summary) = summarize(var) {
        println!("\n Summary of present samples:");
        println!("   Min: {}", summary.min);
        println!("   Max: {}", summary.max);
        println!("   Mean: {:.4}", summary.mean);
        println!("   Std Dev: {:.4}", summary.std_dev);
    }

    Ok(())
}

/// Get structured metadata for a variable
pub fn get_variable_metadata(dataset: &Dataset, var_name: &str) -> Result<VariableMetadata> {
    let var = dataset.require_variable(var_name)?;

    let dimensions: Vec<DimensionInfo> = var
        .dims()
        .iter()
        .zip(var.shape())
        .map(|(d, &length)| DimensionInfo {
            name: d.clone(),
            length,
        })
        .collect();

    let mut flags = FlagCounts::default();
    for flag in var.flags() {
        flags.add(*flag);
    }

    Ok(VariableMetadata {
        name: var_name.to_string(),
        kind: var.data().kind(),
        total_elements: var.shape().iter().product(),
        dimensions,
        attributes: var.attrs().clone(),
        flags,
    })
}

/// Statistics over the finite samples not flagged missing; `None` for text or empty variables
pub fn summarize(var: &Variable) -> Option<VariableSummary> {
    let values = var.values()?;
    let present: Vec<f64> = values
        .iter()
        .zip(var.flags())
        .filter(|(v, f)| v.is_finite() && **f != QcFlag::Missing)
        .map(|(v, _)| *v)
        .collect();
    if present.is_empty() {
        return None;
    }

    let count = present.len();
    let min = present.iter().copied().fold(f64::INFINITY, f64::min);
    let max = present.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mean = present.iter().sum::<f64>() / count as f64;
    let std_dev = (present.iter().map(|&x| (x - mean).powi(2)).sum::<f64>() / count as f64).sqrt();
    Some(VariableSummary {
        count,
        min,
        max,
        mean,
        std_dev,
    })
}

/// Finite range of a variable or coordinate named `name`
fn finite_range(dataset: &Dataset, name: &str) -> Option<(f64, f64)> {
    let values: Vec<f64> = match dataset.coordinate(name) {
        Some(coord) => coord.values().to_vec(),
        None => dataset.variable(name)?.values()?.iter().copied().collect(),
    };
    values
        .into_iter()
        .filter(|v| v.is_finite())
        .fold(None, |range, v| match range {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
}

/// Geospatial and time coverage attributes of a dataset
///
/// Reads `LATITUDE`, `LONGITUDE`, the `DEPTH` axis and the `DATETIME` axis.
/// Attributes whose source is absent or entirely missing are left out.
pub fn extent_attributes(dataset: &Dataset) -> AttributeBag {
    let mut attrs = AttributeBag::new();

    for (source, prefix) in [
        ("LATITUDE", "geospatial_lat"),
        ("LONGITUDE", "geospatial_lon"),
        ("DEPTH", "geospatial_vertical"),
    ] {
        if let Some((lo, hi)) = finite_range(dataset, source) {
            attrs.insert(format!("{prefix}_min"), lo);
            attrs.insert(format!("{prefix}_max"), hi);
        }
    }

    if let Some(time) = dataset.coordinate("DATETIME") {
        let (scale, offset) = time
            .units()
            .and_then(CfTimeUnits::parse)
            .map_or((1.0, 0.0), CfTimeUnits::to_epoch_linear);
        if let Some((lo, hi)) = finite_range(dataset, "DATETIME") {
            let (start, end) = (lo * scale + offset, hi * scale + offset);
            if let (Some(start), Some(end)) = (format_epoch_seconds(start), format_epoch_seconds(end)) {
                attrs.insert("time_coverage_start", start);
                attrs.insert("time_coverage_end", end);
            }
        }
    }
    attrs
}

/// `dataset` with its extent attributes recomputed
pub fn with_extent_attributes(dataset: Dataset) -> Dataset {
    let extent = extent_attributes(&dataset);
    let mut attrs = dataset.attrs().clone();
    attrs.extend_from(&extent);
    dataset.with_attrs(attrs)
}
