//! In-memory labeled dataset
//!
//! A [`Dataset`] holds named dimensions with their coordinate axes, variables
//! indexed by a subset of those dimensions, and a metadata bag. It is the
//! unit every pipeline stage consumes and produces.
//!
//! # Organization
//!
//! - [`attributes`]: the opaque metadata bag ([`AttributeBag`], [`AttrValue`])
//! - [`flags`]: per-sample QC categories ([`QcFlag`])
//!
//! # Invariants
//!
//! - every variable's shape matches the lengths of the dimensions it names
//! - coordinate axes are finite and strictly monotonic, and never change once
//!   built; transforms create new coordinates instead
//! - a variable's flag array has the same shape as its data, and missing
//!   samples are always flagged [`QcFlag::Missing`]
//!
//! Dataset transforms consume `self` and return a new dataset, so a dataset
//! borrowed by a consumer is never modified under it.

pub mod attributes;
pub mod flags;

pub use attributes::{AttrValue, AttributeBag};
pub use flags::QcFlag;

use crate::errors::{Result, WbtsError};
use ndarray::{ArrayD, IxDyn};
use std::collections::BTreeMap;

/// Attribute tagging variables that have no place in the canonical schema
pub const NON_CANONICAL_ATTR: &str = "non_canonical";

/// A dimension's coordinate axis
#[derive(Debug, Clone, PartialEq)]
pub struct Coordinate {
    name: String,
    values: Vec<f64>,
    attrs: AttributeBag,
}

impl Coordinate {
    /// Create a coordinate axis, checking that it is finite and strictly monotonic
    pub fn new(name: impl Into<String>, values: Vec<f64>, attrs: AttributeBag) -> Result<Self> {
        let name = name.into();

        if let Some(pos) = values.iter().position(|v| !v.is_finite()) {
            return Err(WbtsError::structure(format!(
                "Coordinate '{name}' has a non-finite value at index {pos}"
            )));
        }

        let increasing = values.windows(2).all(|w| w[0] < w[1]);
        let decreasing = values.windows(2).all(|w| w[0] > w[1]);
        if !(increasing || decreasing) {
            return Err(WbtsError::structure(format!(
                "Coordinate '{name}' is not strictly monotonic"
            )));
        }

        Ok(Self {
            name,
            values,
            attrs,
        })
    }

    /// Index axis `0..len` for dimensions without a coordinate variable
    pub fn index(name: impl Into<String>, len: usize) -> Self {
        Self {
            name: name.into(),
            values: (0..len).map(|i| i as f64).collect(),
            attrs: AttributeBag::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn attrs(&self) -> &AttributeBag {
        &self.attrs
    }

    pub fn units(&self) -> Option<&str> {
        self.attrs.get_str("units")
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Same axis under another dimension name
    #[must_use]
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: self.values.clone(),
            attrs: self.attrs.clone(),
        }
    }

    /// New axis with the same name, validated like [`Coordinate::new`]
    pub fn with_values(&self, values: Vec<f64>, attrs: AttributeBag) -> Result<Self> {
        Self::new(self.name.clone(), values, attrs)
    }
}

/// Sample storage of a variable
#[derive(Debug, Clone, PartialEq)]
pub enum VariableData {
    /// Numeric samples, `NaN` marks a missing sample
    Numeric(ArrayD<f64>),
    /// Text samples, an empty string marks a missing sample
    Text(ArrayD<String>),
}

impl VariableData {
    pub fn shape(&self) -> &[usize] {
        match self {
            Self::Numeric(a) => a.shape(),
            Self::Text(a) => a.shape(),
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Numeric(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Numeric(_) => "numeric",
            Self::Text(_) => "text",
        }
    }

    /// Whether the sample at `index` is absent
    pub fn is_missing(&self, index: &[usize]) -> bool {
        match self {
            Self::Numeric(a) => a.get(IxDyn(index)).map_or(true, |v| v.is_nan()),
            Self::Text(a) => a.get(IxDyn(index)).map_or(true, String::is_empty),
        }
    }

    fn missing_mask(&self) -> ArrayD<QcFlag> {
        match self {
            Self::Numeric(a) => a.mapv(|v| if v.is_nan() { QcFlag::Missing } else { QcFlag::Good }),
            Self::Text(a) => a.map(|s| {
                if s.is_empty() {
                    QcFlag::Missing
                } else {
                    QcFlag::Good
                }
            }),
        }
    }
}

/// A named array with its dimensions, flags and attributes
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    dims: Vec<String>,
    data: VariableData,
    flags: ArrayD<QcFlag>,
    attrs: AttributeBag,
}

impl Variable {
    /// Numeric variable; `NaN` samples start out flagged missing, the rest good
    pub fn numeric(dims: Vec<String>, data: ArrayD<f64>) -> Result<Self> {
        Self::from_data(dims, VariableData::Numeric(data))
    }

    /// Text variable; empty samples start out flagged missing, the rest good
    pub fn text(dims: Vec<String>, data: ArrayD<String>) -> Result<Self> {
        Self::from_data(dims, VariableData::Text(data))
    }

    pub fn from_data(dims: Vec<String>, data: VariableData) -> Result<Self> {
        if dims.len() != data.shape().len() {
            return Err(WbtsError::structure(format!(
                "Variable declares {} dimension(s) [{}] but its data has {}",
                dims.len(),
                dims.join(", "),
                data.shape().len()
            )));
        }
        let flags = data.missing_mask();
        Ok(Self {
            dims,
            data,
            flags,
            attrs: AttributeBag::new(),
        })
    }

    #[must_use]
    pub fn with_attrs(mut self, attrs: AttributeBag) -> Self {
        self.attrs = attrs;
        self
    }

    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.attrs.insert(key, value);
        self
    }

    /// Attach existing flags; missing samples are escalated to [`QcFlag::Missing`]
    pub fn with_flags(mut self, flags: ArrayD<QcFlag>) -> Result<Self> {
        if flags.shape() != self.data.shape() {
            return Err(WbtsError::structure(format!(
                "Flag shape {:?} does not match data shape {:?}",
                flags.shape(),
                self.data.shape()
            )));
        }
        let mask = self.data.missing_mask();
        self.flags = ndarray::Zip::from(&flags)
            .and(&mask)
            .map_collect(|f, m| f.escalate(*m));
        Ok(self)
    }

    pub fn dims(&self) -> &[String] {
        &self.dims
    }

    pub fn data(&self) -> &VariableData {
        &self.data
    }

    /// Numeric samples, `None` for text variables
    pub fn values(&self) -> Option<&ArrayD<f64>> {
        match &self.data {
            VariableData::Numeric(a) => Some(a),
            VariableData::Text(_) => None,
        }
    }

    pub fn flags(&self) -> &ArrayD<QcFlag> {
        &self.flags
    }

    pub fn attrs(&self) -> &AttributeBag {
        &self.attrs
    }

    pub fn attrs_mut(&mut self) -> &mut AttributeBag {
        &mut self.attrs
    }

    pub fn units(&self) -> Option<&str> {
        self.attrs.get_str("units")
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn is_non_canonical(&self) -> bool {
        self.attrs.get_str(NON_CANONICAL_ATTR) == Some("true")
    }

    /// Raise the flag at `index` to `flag` if `flag` is more severe
    ///
    /// Returns true when the stored flag changed.
    pub fn escalate_flag(&mut self, index: &[usize], flag: QcFlag) -> bool {
        match self.flags.get_mut(IxDyn(index)) {
            Some(current) if flag > *current => {
                *current = flag;
                true
            }
            _ => false,
        }
    }

    /// Replace the flag at `index` unconditionally
    ///
    /// This is the only way to lower a flag. Missing samples stay missing.
    pub fn override_flag(&mut self, index: &[usize], flag: QcFlag) -> Result<()> {
        let missing = self.data.is_missing(index);
        let slot = self.flags.get_mut(IxDyn(index)).ok_or_else(|| {
            WbtsError::structure(format!("Flag index {index:?} out of bounds"))
        })?;
        *slot = if missing { QcFlag::Missing } else { flag };
        Ok(())
    }

    /// Copy with every numeric sample passed through `f`; text variables are cloned
    pub(crate) fn map_numeric(&self, f: impl Fn(f64) -> f64) -> Self {
        match &self.data {
            VariableData::Numeric(a) => {
                let data = VariableData::Numeric(a.mapv(f));
                let mask = data.missing_mask();
                let flags = ndarray::Zip::from(&self.flags)
                    .and(&mask)
                    .map_collect(|flag, m| flag.escalate(*m));
                Self {
                    dims: self.dims.clone(),
                    data,
                    flags,
                    attrs: self.attrs.clone(),
                }
            }
            VariableData::Text(_) => self.clone(),
        }
    }

    /// Copy with every sample flagged at or above `threshold` replaced by a missing value
    ///
    /// Returns the copy and the number of samples removed.
    pub(crate) fn remove_flagged(&self, threshold: QcFlag) -> (Self, usize) {
        let present = self.data.missing_mask();
        let remove = ndarray::Zip::from(&self.flags)
            .and(&present)
            .map_collect(|f, m| *f >= threshold && *m != QcFlag::Missing);
        let count = remove.iter().filter(|r| **r).count();
        let data = match &self.data {
            VariableData::Numeric(a) => VariableData::Numeric(
                ndarray::Zip::from(a)
                    .and(&remove)
                    .map_collect(|v, r| if *r { f64::NAN } else { *v }),
            ),
            VariableData::Text(a) => VariableData::Text(
                ndarray::Zip::from(a)
                    .and(&remove)
                    .map_collect(|s, r| if *r { String::new() } else { s.clone() }),
            ),
        };
        let mask = data.missing_mask();
        let flags = ndarray::Zip::from(&self.flags)
            .and(&mask)
            .map_collect(|flag, m| flag.escalate(*m));
        let var = Self {
            dims: self.dims.clone(),
            data,
            flags,
            attrs: self.attrs.clone(),
        };
        (var, count)
    }
}

/// Labeled multidimensional container
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    coords: Vec<Coordinate>,
    variables: BTreeMap<String, Variable>,
    attrs: AttributeBag,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a dimension with its coordinate axis
    pub fn with_coordinate(mut self, coord: Coordinate) -> Result<Self> {
        if self.coordinate(coord.name()).is_some() {
            return Err(WbtsError::structure(format!(
                "Dimension '{}' declared twice",
                coord.name()
            )));
        }
        if self.variables.contains_key(coord.name()) {
            return Err(WbtsError::structure(format!(
                "Dimension '{}' clashes with a variable of the same name",
                coord.name()
            )));
        }
        self.coords.push(coord);
        Ok(self)
    }

    /// Add or replace a variable after checking it against the declared dimensions
    pub fn with_variable(mut self, name: impl Into<String>, var: Variable) -> Result<Self> {
        let name = name.into();
        self.check_variable(&name, &var)?;
        self.variables.insert(name, var);
        Ok(self)
    }

    #[must_use]
    pub fn without_variable(mut self, name: &str) -> Self {
        self.variables.remove(name);
        self
    }

    #[must_use]
    pub fn with_attrs(mut self, attrs: AttributeBag) -> Self {
        self.attrs = attrs;
        self
    }

    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.attrs.insert(key, value);
        self
    }

    /// Rename a dimension in its coordinate and in every variable using it
    pub fn rename_dimension(mut self, from: &str, to: &str) -> Result<Self> {
        if from == to {
            return Ok(self);
        }
        let pos = self
            .coords
            .iter()
            .position(|c| c.name() == from)
            .ok_or_else(|| WbtsError::structure(format!("Unknown dimension '{from}'")))?;
        if self.coordinate(to).is_some() || self.variables.contains_key(to) {
            return Err(WbtsError::structure(format!(
                "Cannot rename dimension '{from}' to '{to}': name already in use"
            )));
        }
        self.coords[pos] = self.coords[pos].renamed(to);
        for var in self.variables.values_mut() {
            for d in var.dims.iter_mut().filter(|d| d.as_str() == from) {
                *d = to.to_string();
            }
        }
        Ok(self)
    }

    pub fn rename_variable(mut self, from: &str, to: &str) -> Result<Self> {
        if from == to {
            return Ok(self);
        }
        let var = self
            .variables
            .remove(from)
            .ok_or_else(|| WbtsError::VariableNotFound {
                var: from.to_string(),
            })?;
        if self.variables.contains_key(to) || self.coordinate(to).is_some() {
            return Err(WbtsError::structure(format!(
                "Cannot rename variable '{from}' to '{to}': name already in use"
            )));
        }
        self.variables.insert(to.to_string(), var);
        Ok(self)
    }

    /// Swap a coordinate for another of the same name and length
    pub fn replace_coordinate(mut self, coord: Coordinate) -> Result<Self> {
        let pos = self
            .coords
            .iter()
            .position(|c| c.name() == coord.name())
            .ok_or_else(|| WbtsError::structure(format!("Unknown dimension '{}'", coord.name())))?;
        if self.coords[pos].len() != coord.len() {
            return Err(WbtsError::structure(format!(
                "Replacement axis for '{}' has length {} instead of {}",
                coord.name(),
                coord.len(),
                self.coords[pos].len()
            )));
        }
        self.coords[pos] = coord;
        Ok(self)
    }

    pub fn coordinate(&self, name: &str) -> Option<&Coordinate> {
        self.coords.iter().find(|c| c.name() == name)
    }

    /// Coordinates in declaration order
    pub fn coordinates(&self) -> &[Coordinate] {
        &self.coords
    }

    pub fn dimension_names(&self) -> Vec<&str> {
        self.coords.iter().map(Coordinate::name).collect()
    }

    pub fn dim_len(&self, name: &str) -> Option<usize> {
        self.coordinate(name).map(Coordinate::len)
    }

    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.variables.get(name)
    }

    /// Flags and attributes may change through this, never shapes or dimensions
    pub(crate) fn variable_mut(&mut self, name: &str) -> Option<&mut Variable> {
        self.variables.get_mut(name)
    }

    /// Variable by name, or [`WbtsError::VariableNotFound`]
    pub fn require_variable(&self, name: &str) -> Result<&Variable> {
        self.variable(name).ok_or_else(|| WbtsError::VariableNotFound {
            var: name.to_string(),
        })
    }

    /// Variables sorted by name
    pub fn variables(&self) -> impl Iterator<Item = (&String, &Variable)> {
        self.variables.iter()
    }

    pub fn variable_names(&self) -> Vec<&str> {
        self.variables.keys().map(String::as_str).collect()
    }

    pub fn contains_variable(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    pub fn attrs(&self) -> &AttributeBag {
        &self.attrs
    }

    /// Human-readable coordinate labels of a sample, e.g. `DEPTH=10`
    pub fn describe_index(&self, dims: &[String], index: &[usize]) -> String {
        dims.iter()
            .zip(index)
            .map(|(d, &i)| match self.coordinate(d).and_then(|c| c.values().get(i)) {
                Some(v) => format!("{d}={v}"),
                None => format!("{d}[{i}]"),
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn check_variable(&self, name: &str, var: &Variable) -> Result<()> {
        if self.coordinate(name).is_some() {
            return Err(WbtsError::structure(format!(
                "Variable '{name}' clashes with a dimension of the same name"
            )));
        }
        for (dim, &len) in var.dims().iter().zip(var.shape()) {
            let declared = self.dim_len(dim).ok_or_else(|| {
                WbtsError::structure(format!(
                    "Variable '{name}' uses undeclared dimension '{dim}'"
                ))
            })?;
            if declared != len {
                return Err(WbtsError::structure(format!(
                    "Variable '{name}' has length {len} along '{dim}' but the dimension has length {declared}"
                )));
            }
        }
        Ok(())
    }
}
