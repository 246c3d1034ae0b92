//! NetCDF reading and writing
//!
//! [`read_netcdf`] turns a NetCDF file into a [`Dataset`]; [`NetCDFWriter`]
//! serializes a dataset back so that reading the written file yields the same
//! values, flags and metadata (apart from the `history` attribute).
//!
//! Conventions applied on both sides:
//! - fill values (`_FillValue`, `missing_value`, the CF default fill) become
//!   `NaN` in memory and [`FILL_VALUE_F64`] on disk
//! - flags of variable `X` live in a byte variable `X_QC` holding the
//!   Argo/OceanSITES codes, linked through `ancillary_variables`

use crate::dataset::{
    AttrValue, AttributeBag, Coordinate, Dataset, QcFlag, Variable, VariableData,
};
use crate::errors::{Result, WbtsError};
use crate::loader::SchemaHint;
use chrono::Utc;
use log::{debug, warn};
use ndarray::{ArrayD, Dimension, IxDyn};
use netcdf::{create, AttributeValue, File};
use std::collections::HashSet;
use std::{fs, path::Path};

/// Fill value for missing data (CF-conventions default for doubles)
pub const FILL_VALUE_F64: f64 = 9.969_209_968_386_869e36;

/// Suffix of ancillary QC flag variables
pub const QC_SUFFIX: &str = "_QC";

/// Suffix for a dimension's same-named variable that cannot serve as its axis
pub const AXIS_LABEL_SUFFIX: &str = "_labels";

const CONSUMED_ATTRIBUTES: [&str; 2] = ["_FillValue", "missing_value"];

/// Name of the flag variable belonging to `var_name`
pub fn qc_variable_name(var_name: &str) -> String {
    format!("{var_name}{QC_SUFFIX}")
}

/// Convert a NetCDF attribute value into the metadata bag representation
pub fn attr_from_netcdf(value: AttributeValue) -> Option<AttrValue> {
    let converted = match value {
        AttributeValue::Str(s) => AttrValue::Text(s),
        AttributeValue::Strs(ss) => AttrValue::Texts(ss),
        AttributeValue::Double(v) => AttrValue::Number(v),
        AttributeValue::Doubles(vs) => AttrValue::Numbers(vs),
        AttributeValue::Float(v) => AttrValue::Number(f64::from(v)),
        AttributeValue::Floats(vs) => AttrValue::Numbers(vs.into_iter().map(f64::from).collect()),
        AttributeValue::Longlong(v) => AttrValue::Integer(v),
        AttributeValue::Longlongs(vs) => AttrValue::Integers(vs),
        AttributeValue::Int(v) => AttrValue::Integer(i64::from(v)),
        AttributeValue::Ints(vs) => AttrValue::Integers(vs.into_iter().map(i64::from).collect()),
        AttributeValue::Uint(v) => AttrValue::Integer(i64::from(v)),
        AttributeValue::Uints(vs) => AttrValue::Integers(vs.into_iter().map(i64::from).collect()),
        AttributeValue::Short(v) => AttrValue::Integer(i64::from(v)),
        AttributeValue::Shorts(vs) => AttrValue::Integers(vs.into_iter().map(i64::from).collect()),
        AttributeValue::Ushort(v) => AttrValue::Integer(i64::from(v)),
        AttributeValue::Ushorts(vs) => {
            AttrValue::Integers(vs.into_iter().map(i64::from).collect())
        }
        AttributeValue::Schar(v) => AttrValue::Integer(i64::from(v)),
        AttributeValue::Schars(vs) => AttrValue::Integers(vs.into_iter().map(i64::from).collect()),
        AttributeValue::Uchar(v) => AttrValue::Integer(i64::from(v)),
        AttributeValue::Uchars(vs) => AttrValue::Integers(vs.into_iter().map(i64::from).collect()),
        _ => return None,
    };
    Some(converted)
}

fn attr_to_netcdf(value: &AttrValue) -> AttributeValue {
    match value {
        AttrValue::Text(s) => AttributeValue::Str(s.clone()),
        AttrValue::Texts(ss) => AttributeValue::Strs(ss.clone()),
        AttrValue::Integer(v) => AttributeValue::Longlong(*v),
        AttrValue::Integers(vs) => AttributeValue::Longlongs(vs.clone()),
        AttrValue::Number(v) => AttributeValue::Double(*v),
        AttrValue::Numbers(vs) => AttributeValue::Doubles(vs.clone()),
    }
}

/// How a NetCDF variable can be represented in memory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StorageKind {
    Numeric,
    Text,
    Unsupported,
}

fn storage_kind(var: &netcdf::Variable) -> (StorageKind, String) {
    let type_name = format!("{:?}", var.vartype()).to_lowercase();
    let kind = if type_name.starts_with("int") || type_name.starts_with("float") {
        StorageKind::Numeric
    } else if type_name.starts_with("string") {
        StorageKind::Text
    } else {
        StorageKind::Unsupported
    };
    (kind, type_name)
}

fn read_attributes(var: &netcdf::Variable, path: &Path) -> AttributeBag {
    let mut bag = AttributeBag::new();
    for attr in var.attributes() {
        match attr.value().ok().and_then(attr_from_netcdf) {
            Some(value) => bag.insert(attr.name(), value),
            None => warn!(
                "⚠ Skipped unsupported attribute type for '{}' on '{}' in {}",
                attr.name(),
                var.name(),
                path.display()
            ),
        }
    }
    bag
}

fn dimension_names(var: &netcdf::Variable) -> (Vec<String>, Vec<usize>) {
    var.dimensions()
        .iter()
        .map(|d| (d.name().to_string(), d.len()))
        .unzip()
}

fn read_numeric(var: &netcdf::Variable, shape: &[usize], attrs: &AttributeBag) -> Result<ArrayD<f64>> {
    let fills: Vec<f64> = CONSUMED_ATTRIBUTES
        .iter()
        .filter_map(|k| attrs.get(k).and_then(AttrValue::as_f64))
        .collect();

    let values: Vec<f64> = var
        .get_values::<f64, _>(..)?
        .into_iter()
        .map(|v| {
            let is_fill = fills.iter().any(|f| *f == v || (f.is_nan() && v.is_nan()))
                || v.abs() >= 9.9e36;
            if is_fill {
                f64::NAN
            } else {
                v
            }
        })
        .collect();

    Ok(ArrayD::from_shape_vec(IxDyn(shape), values)?)
}

fn read_text(var: &netcdf::Variable, shape: &[usize]) -> Result<ArrayD<String>> {
    let mut values = Vec::with_capacity(shape.iter().product());
    for index in ndarray::indices(IxDyn(shape)) {
        values.push(var.get_string(index.slice())?);
    }
    Ok(ArrayD::from_shape_vec(IxDyn(shape), values)?)
}

fn read_flags(var: &netcdf::Variable, shape: &[usize]) -> Result<ArrayD<QcFlag>> {
    let codes: Vec<QcFlag> = var
        .get_values::<u8, _>(..)?
        .into_iter()
        .map(QcFlag::from_code)
        .collect();
    Ok(ArrayD::from_shape_vec(IxDyn(shape), codes)?)
}

/// Axis of dimension `name`, or `None` when no variable can serve as one
fn read_coordinate(file: &File, name: &str, path: &Path) -> Result<Option<Coordinate>> {
    let Some(var) = file.variable(name) else {
        return Ok(None);
    };
    let (dims, _) = dimension_names(&var);
    if dims.len() != 1 || dims[0] != name || storage_kind(&var).0 != StorageKind::Numeric {
        return Ok(None);
    }

    let attrs = read_attributes(&var, path);
    let values = var.get_values::<f64, _>(..)?;
    Coordinate::new(name, values, attrs)
        .map(Some)
        .map_err(|e| WbtsError::load(path, e.to_string()))
}

/// Read a NetCDF file into a dataset
///
/// Unexpected variables are kept, and their names are listed in the
/// `unexpected_variables` attribute when the hint names expected variables.
/// Variables of types without an in-memory representation are listed in
/// `unreadable_variables` rather than failing the load.
///
/// # Errors
///
/// Returns a load error if the file cannot be opened or is structurally
/// inconsistent, or if a required dimension is missing.
pub fn read_netcdf(path: &Path, hint: &SchemaHint) -> Result<Dataset> {
    let file = netcdf::open(path).map_err(|e| WbtsError::load(path, e.to_string()))?;

    let mut dataset = Dataset::new();
    let mut axis_variables: HashSet<String> = HashSet::new();
    for dim in file.dimensions() {
        let name = dim.name();
        let coord = match read_coordinate(&file, &name, path)? {
            Some(coord) => {
                axis_variables.insert(name);
                coord
            }
            None => Coordinate::index(name, dim.len()),
        };
        dataset = dataset.with_coordinate(coord)?;
    }
    hint.check_dimensions(path, &dataset)?;

    let coordinate_names: HashSet<String> = dataset
        .dimension_names()
        .into_iter()
        .map(str::to_string)
        .collect();
    let all_names: HashSet<String> = file.variables().map(|v| v.name()).collect();
    // `X_QC` only counts as flags of `X` when both share the same dimensions
    let flag_names: HashSet<String> = all_names
        .iter()
        .filter(|n| {
            let Some(base) = n.strip_suffix(QC_SUFFIX) else {
                return false;
            };
            match (file.variable(base), file.variable(n)) {
                (Some(b), Some(q)) => dimension_names(&b).0 == dimension_names(&q).0,
                _ => false,
            }
        })
        .cloned()
        .collect();

    let mut unreadable = Vec::new();
    for var in file.variables() {
        let name = var.name();
        if axis_variables.contains(&name) || flag_names.contains(&name) {
            continue;
        }
        // Text station names and the like keep their values next to an index axis
        let stored_name = if coordinate_names.contains(&name) {
            format!("{name}{AXIS_LABEL_SUFFIX}")
        } else {
            name.clone()
        };

        let (dims, shape) = dimension_names(&var);
        let mut attrs = read_attributes(&var, path);
        let (kind, type_name) = storage_kind(&var);

        let data = match kind {
            StorageKind::Numeric => VariableData::Numeric(read_numeric(&var, &shape, &attrs)?),
            StorageKind::Text => VariableData::Text(read_text(&var, &shape)?),
            StorageKind::Unsupported => {
                debug!("Keeping unsupported variable '{name}' ({type_name}) as metadata only");
                unreadable.push(format!("{name} ({type_name})"));
                continue;
            }
        };

        for key in CONSUMED_ATTRIBUTES {
            attrs.remove(key);
        }
        let qc_name = qc_variable_name(&name);
        if attrs.get_str("ancillary_variables") == Some(qc_name.as_str()) {
            attrs.remove("ancillary_variables");
        }

        let mut variable = Variable::from_data(dims, data)
            .map_err(|e| WbtsError::load(path, format!("variable '{name}': {e}")))?
            .with_attrs(attrs);

        if flag_names.contains(&qc_name) {
            if let Some(qc_var) = file.variable(&qc_name) {
                variable = variable.with_flags(read_flags(&qc_var, &shape)?)?;
            }
        }

        dataset = dataset
            .with_variable(stored_name, variable)
            .map_err(|e| WbtsError::load(path, e.to_string()))?;
    }

    let mut global = AttributeBag::new();
    for attr in file.attributes() {
        match attr.value().ok().and_then(attr_from_netcdf) {
            Some(value) => global.insert(attr.name(), value),
            None => warn!(
                "⚠ Skipped unsupported global attribute '{}' in {}",
                attr.name(),
                path.display()
            ),
        }
    }

    let unexpected = hint.unexpected(dataset.variable_names().into_iter());
    if !unexpected.is_empty() {
        global.insert("unexpected_variables", unexpected);
    }
    if !unreadable.is_empty() {
        global.insert("unreadable_variables", unreadable);
    }
    hint.report_expectations(path, &dataset);

    Ok(dataset.with_attrs(global))
}

/// Writes datasets to NetCDF-4 files
pub struct NetCDFWriter<'a> {
    output_path: &'a Path,
    attribute_order: &'a [String],
}

impl<'a> NetCDFWriter<'a> {
    /// Create a new NetCDF writer
    pub fn new(output_path: &'a Path) -> Self {
        Self {
            output_path,
            attribute_order: &[],
        }
    }

    /// Write global attributes named here first, in this order
    #[must_use]
    pub fn with_attribute_order(mut self, order: &'a [String]) -> Self {
        self.attribute_order = order;
        self
    }

    /// Write `dataset`, replacing any existing file
    pub fn write(&self, dataset: &Dataset) -> Result<()> {
        if self.output_path.exists() {
            fs::remove_file(self.output_path)?;
        }

        let mut file = create(self.output_path)?;

        for coord in dataset.coordinates() {
            file.add_dimension(coord.name(), coord.len())?;
        }

        for coord in dataset.coordinates() {
            // Index axes have no coordinate variable on disk
            if coord.attrs().is_empty() && is_index_axis(coord.values()) {
                continue;
            }
            let mut var = file.add_variable::<f64>(coord.name(), &[coord.name()])?;
            for (key, value) in coord.attrs().iter() {
                var.put_attribute(key, attr_to_netcdf(value))?;
            }
            var.put_values(coord.values(), ..)?;
        }

        for (name, variable) in dataset.variables() {
            let dims: Vec<&str> = variable.dims().iter().map(String::as_str).collect();
            match variable.data() {
                VariableData::Numeric(values) => {
                    let mut var = file.add_variable::<f64>(name, &dims)?;
                    var.put_attribute("_FillValue", FILL_VALUE_F64)?;
                    for (key, value) in variable.attrs().iter() {
                        var.put_attribute(key, attr_to_netcdf(value))?;
                    }
                    var.put_attribute("ancillary_variables", qc_variable_name(name))?;
                    let raw: Vec<f64> = values
                        .iter()
                        .map(|v| if v.is_nan() { FILL_VALUE_F64 } else { *v })
                        .collect();
                    var.put_values(&raw, ..)?;
                }
                VariableData::Text(values) => {
                    let mut var = file.add_string_variable(name, &dims)?;
                    for (key, value) in variable.attrs().iter() {
                        var.put_attribute(key, attr_to_netcdf(value))?;
                    }
                    var.put_attribute("ancillary_variables", qc_variable_name(name))?;
                    for (index, value) in values.indexed_iter() {
                        var.put_string(value, index.slice())?;
                    }
                }
            }

            let mut qc_var = file.add_variable::<u8>(&qc_variable_name(name), &dims)?;
            qc_var.put_attribute("long_name", format!("quality flag of {name}"))?;
            qc_var.put_attribute(
                "flag_values",
                QcFlag::ALL.iter().map(|f| f.code()).collect::<Vec<u8>>(),
            )?;
            qc_var.put_attribute("flag_meanings", QcFlag::MEANINGS)?;
            let codes: Vec<u8> = variable.flags().iter().map(|f| f.code()).collect();
            qc_var.put_values(&codes, ..)?;
        }

        let ordered = self
            .attribute_order
            .iter()
            .filter_map(|k| dataset.attrs().get(k).map(|v| (k.as_str(), v)));
        let rest = dataset
            .attrs()
            .iter()
            .filter(|(k, _)| !self.attribute_order.contains(k) && k.as_str() != "history")
            .map(|(k, v)| (k.as_str(), v));
        for (key, value) in ordered.chain(rest) {
            if key == "history" {
                continue;
            }
            file.add_attribute(key, attr_to_netcdf(value))?;
        }

        let stamp = format!("Created by WBTSdata on {}", Utc::now().to_rfc3339());
        let history = match dataset.attrs().get_str("history") {
            Some(previous) => format!("{previous}\n{stamp}"),
            None => stamp,
        };
        file.add_attribute("history", history)?;

        debug!("Wrote {}", self.output_path.display());
        Ok(())
    }
}

fn is_index_axis(values: &[f64]) -> bool {
    values.iter().enumerate().all(|(i, v)| *v == i as f64)
}

/// Write `dataset` to `output_path` with default attribute order
pub fn write_dataset(dataset: &Dataset, output_path: &Path) -> Result<()> {
    NetCDFWriter::new(output_path).write(dataset)
}
