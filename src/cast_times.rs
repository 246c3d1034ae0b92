//! CTD cast times taken from the matching LADCP casts
//!
//! The CTD and the LADCP of one station are lowered together, but their files
//! carry timestamps from different clocks. Before merging, every CTD profile
//! whose cast number also appears in an LADCP input is moved onto that LADCP
//! profile's `DATETIME`, so both instruments land on the same row.
//! `TIME_FLAG` records where each CTD time came from.

use crate::convert::SOURCE_FORMAT_ATTR;
use crate::dataset::{Coordinate, Dataset, Variable};
use crate::errors::{Result, WbtsError};
use log::{debug, warn};
use ndarray::{ArrayD, IxDyn};
use std::collections::BTreeMap;

/// Per-profile cast number variable
pub const CAST_VARIABLE: &str = "CAST";

/// Per-profile time source variable
pub const TIME_FLAG_VARIABLE: &str = "TIME_FLAG";

/// `TIME_FLAG` of a CTD profile that kept its own time
pub const TIME_FROM_CTD: f64 = 0.0;

/// `TIME_FLAG` of a CTD profile moved onto the LADCP time
pub const TIME_FROM_LADCP: f64 = 1.0;

const TIME_DIMENSION: &str = "DATETIME";
const CTD_FORMAT: &str = "ctd";
const LADCP_FORMAT: &str = "ladcp";

fn source_format(dataset: &Dataset) -> Option<&str> {
    dataset.attrs().get_str(SOURCE_FORMAT_ATTR)
}

/// Cast number of every `DATETIME` profile
///
/// Read from a `CAST` variable along `DATETIME`, or from a global `cast`
/// attribute when the file holds a single profile.
pub fn cast_numbers(dataset: &Dataset) -> Vec<Option<i64>> {
    let Some(len) = dataset.dim_len(TIME_DIMENSION) else {
        return Vec::new();
    };
    let from_variable = dataset
        .variable(CAST_VARIABLE)
        .filter(|v| v.dims().len() == 1 && v.dims()[0] == TIME_DIMENSION)
        .and_then(Variable::values);
    if let Some(values) = from_variable {
        return values
            .iter()
            .map(|v| v.is_finite().then(|| v.round() as i64))
            .collect();
    }

    let from_attribute = dataset
        .attrs()
        .get("cast")
        .and_then(|v| v.as_f64())
        .filter(|v| v.is_finite())
        .map(|v| v.round() as i64);
    match from_attribute {
        Some(cast) if len == 1 => vec![Some(cast)],
        _ => vec![None; len],
    }
}

/// First LADCP time seen for every cast number, in input order
fn ladcp_times(datasets: &[Dataset]) -> BTreeMap<i64, f64> {
    let mut times = BTreeMap::new();
    for dataset in datasets
        .iter()
        .filter(|ds| source_format(ds) == Some(LADCP_FORMAT))
    {
        let Some(axis) = dataset.coordinate(TIME_DIMENSION) else {
            continue;
        };
        for (cast, time) in cast_numbers(dataset).into_iter().zip(axis.values()) {
            let Some(cast) = cast else {
                continue;
            };
            match times.get(&cast) {
                Some(existing) if *existing != *time => warn!(
                    "LADCP cast {cast} appears with two times, keeping {existing}"
                ),
                Some(_) => {}
                None => {
                    times.insert(cast, *time);
                }
            }
        }
    }
    times
}

fn retime(dataset: &Dataset, times: &BTreeMap<i64, f64>) -> Result<Dataset> {
    let Some(axis) = dataset.coordinate(TIME_DIMENSION) else {
        return Ok(dataset.clone());
    };

    let mut values = Vec::with_capacity(axis.len());
    let mut flags = Vec::with_capacity(axis.len());
    for (cast, own) in cast_numbers(dataset).into_iter().zip(axis.values()) {
        match cast.and_then(|c| times.get(&c)) {
            Some(ladcp) => {
                values.push(*ladcp);
                flags.push(TIME_FROM_LADCP);
            }
            None => {
                values.push(*own);
                flags.push(TIME_FROM_CTD);
            }
        }
    }

    let moved = flags.iter().filter(|f| **f == TIME_FROM_LADCP).count();
    debug!("Moved {moved} of {} CTD profile(s) onto LADCP times", axis.len());

    let retimed: Coordinate = axis
        .with_values(values, axis.attrs().clone())
        .map_err(|e| {
            WbtsError::alignment(
                TIME_DIMENSION,
                format!("CTD profiles out of order on LADCP times: {e}"),
            )
        })?;
    let flag_var = Variable::numeric(
        vec![TIME_DIMENSION.to_string()],
        ArrayD::from_shape_vec(IxDyn(&[flags.len()]), flags)?,
    )?
    .with_attribute("long_name", "Cast time source flag")
    .with_attribute("flag_values", vec![TIME_FROM_CTD, TIME_FROM_LADCP])
    .with_attribute("flag_meanings", "ctd_time ladcp_time");

    dataset
        .clone()
        .replace_coordinate(retimed)?
        .with_variable(TIME_FLAG_VARIABLE, flag_var)
}

/// Move CTD profiles onto the times of the LADCP casts with the same number
///
/// Inputs that are not CTD casts are returned unchanged. CTD inputs always
/// get a `TIME_FLAG` variable, also when no LADCP cast matches.
///
/// # Errors
///
/// Returns an alignment error when the moved times are no longer strictly
/// increasing along `DATETIME`.
pub fn align_cast_times(datasets: &[Dataset]) -> Result<Vec<Dataset>> {
    let times = ladcp_times(datasets);
    datasets
        .iter()
        .map(|ds| {
            if source_format(ds) == Some(CTD_FORMAT) {
                retime(ds, &times)
            } else {
                Ok(ds.clone())
            }
        })
        .collect()
}
