//! Delimited-table reading
//!
//! Calibrated CTD casts are often exported as one table per cast: a header row
//! of column names, then one row per sample. Column names may carry units in
//! brackets (`TEMP [degree_C]`). The index column becomes the only dimension,
//! every other column a variable along it.

use crate::dataset::{AttributeBag, Coordinate, Dataset, Variable};
use crate::errors::{Result, WbtsError};
use crate::loader::SchemaHint;
use csv::ReaderBuilder;
use log::debug;
use ndarray::{ArrayD, IxDyn};
use std::path::Path;

/// Split `TEMP [degree_C]` into `("TEMP", Some("degree_C"))`
pub fn split_header(header: &str) -> (String, Option<String>) {
    let header = header.trim();
    if let (Some(open), true) = (header.rfind('['), header.ends_with(']')) {
        let name = header[..open].trim().to_string();
        let units = header[open + 1..header.len() - 1].trim().to_string();
        if !name.is_empty() {
            return (name, (!units.is_empty()).then_some(units));
        }
    }
    (header.to_string(), None)
}

fn delimiter_for(path: &Path) -> u8 {
    match path.extension().and_then(|e| e.to_str()) {
        Some("tsv") => b'\t',
        _ => b',',
    }
}

enum Column {
    Numeric(Vec<f64>),
    Text(Vec<String>),
}

fn classify(cells: Vec<String>) -> Column {
    let parsed: Option<Vec<f64>> = cells
        .iter()
        .map(|c| {
            let c = c.trim();
            if c.is_empty() || c.eq_ignore_ascii_case("nan") {
                Some(f64::NAN)
            } else {
                c.parse::<f64>().ok()
            }
        })
        .collect();
    match parsed {
        Some(values) => Column::Numeric(values),
        None => Column::Text(cells.into_iter().map(|c| c.trim().to_string()).collect()),
    }
}

/// Read a delimited table into a one-dimensional dataset
///
/// The index column is the hint's `index_column`, or the first column. Columns
/// with any non-numeric cell become text variables; empty cells are missing.
///
/// # Errors
///
/// Returns a load error when the table is empty, the index column is absent or
/// not numeric, or the index is not strictly monotonic.
pub fn read_table(path: &Path, hint: &SchemaHint) -> Result<Dataset> {
    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter_for(path))
        .trim(csv::Trim::All)
        .comment(Some(b'#'))
        .from_path(path)
        .map_err(|e| WbtsError::load(path, e.to_string()))?;

    let headers: Vec<(String, Option<String>)> = reader
        .headers()
        .map_err(|e| WbtsError::load(path, e.to_string()))?
        .iter()
        .map(split_header)
        .collect();
    if headers.is_empty() {
        return Err(WbtsError::load(path, "Table has no header row"));
    }

    let mut cells: Vec<Vec<String>> = vec![Vec::new(); headers.len()];
    for (row, record) in reader.records().enumerate() {
        let record = record.map_err(|e| WbtsError::load(path, format!("row {}: {e}", row + 2)))?;
        if record.len() != headers.len() {
            return Err(WbtsError::load(
                path,
                format!(
                    "row {} has {} field(s), header has {}",
                    row + 2,
                    record.len(),
                    headers.len()
                ),
            ));
        }
        for (column, field) in cells.iter_mut().zip(record.iter()) {
            column.push(field.to_string());
        }
    }

    let index_pos = match &hint.index_column {
        Some(name) => headers
            .iter()
            .position(|(h, _)| h == name)
            .ok_or_else(|| WbtsError::MissingDimension {
                path: path.to_path_buf(),
                dimension: name.clone(),
            })?,
        None => 0,
    };
    let (dim_name, dim_units) = headers[index_pos].clone();

    let index_values = match classify(std::mem::take(&mut cells[index_pos])) {
        Column::Numeric(values) => values,
        Column::Text(_) => {
            return Err(WbtsError::load(
                path,
                format!("Index column '{dim_name}' is not numeric"),
            ))
        }
    };
    let mut coord_attrs = AttributeBag::new();
    if let Some(units) = dim_units {
        coord_attrs.insert("units", units);
    }
    let coord = Coordinate::new(dim_name.clone(), index_values, coord_attrs)
        .map_err(|e| WbtsError::load(path, e.to_string()))?;
    let len = coord.len();

    let mut dataset = Dataset::new().with_coordinate(coord)?;
    hint.check_dimensions(path, &dataset)?;

    for (pos, ((name, units), column)) in headers.into_iter().zip(cells).enumerate() {
        if pos == index_pos {
            continue;
        }
        let dims = vec![dim_name.clone()];
        let variable = match classify(column) {
            Column::Numeric(values) => {
                Variable::numeric(dims, ArrayD::from_shape_vec(IxDyn(&[len]), values)?)?
            }
            Column::Text(values) => {
                debug!("Column '{name}' in {} read as text", path.display());
                Variable::text(dims, ArrayD::from_shape_vec(IxDyn(&[len]), values)?)?
            }
        };
        let variable = match units {
            Some(u) => variable.with_attribute("units", u),
            None => variable,
        };
        dataset = dataset
            .with_variable(name, variable)
            .map_err(|e| WbtsError::load(path, e.to_string()))?;
    }

    let mut attrs = AttributeBag::new();
    let unexpected = hint.unexpected(dataset.variable_names().into_iter());
    if !unexpected.is_empty() {
        attrs.insert("unexpected_variables", unexpected);
    }
    hint.report_expectations(path, &dataset);

    Ok(dataset.with_attrs(attrs))
}
