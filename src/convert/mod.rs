//! Conversion into the canonical schema
//!
//! A [`Converter`] renames source variables and dimensions, converts units
//! with linear transforms, normalises time axes and stamps the schema's global
//! attributes. The input dataset is never modified; a new one is returned.
//!
//! Converting a dataset that is already canonical returns an equal dataset:
//! canonical variables are looked up under their own name, identity unit
//! conversions leave the samples untouched, and every attribute written is a
//! function of the schema alone.

pub mod schema;

pub use schema::{
    CanonicalSchema, CanonicalVariable, LinearConversion, SourceFormat, UnitConversion,
    VariableMapping,
};

use crate::dataset::{AttributeBag, Coordinate, Dataset, Variable, NON_CANONICAL_ATTR};
use crate::errors::{Result, WbtsError};
use crate::time::{CfTimeUnits, CANONICAL_TIME_UNITS};
use log::{debug, info, warn};
use ndarray::{ArrayD, IxDyn};
use std::collections::BTreeMap;

/// Dataset attribute naming the source format a dataset was converted from
pub const SOURCE_FORMAT_ATTR: &str = "source_format";

/// Applies a [`CanonicalSchema`] to datasets
#[derive(Debug, Clone)]
pub struct Converter<'a> {
    schema: &'a CanonicalSchema,
    extra_attributes: AttributeBag,
}

impl<'a> Converter<'a> {
    pub fn new(schema: &'a CanonicalSchema) -> Self {
        Self {
            schema,
            extra_attributes: AttributeBag::new(),
        }
    }

    /// Additional global attributes, e.g. cruise metadata, applied last
    #[must_use]
    pub fn with_attributes(mut self, attrs: &AttributeBag) -> Self {
        self.extra_attributes.extend_from(attrs);
        self
    }

    pub fn schema(&self) -> &'a CanonicalSchema {
        self.schema
    }

    /// Guess the source format of `dataset`
    ///
    /// The `instrument` attribute decides when it names a known instrument.
    /// Otherwise the format with the most of its source variables present
    /// wins, earlier formats first on ties.
    pub fn detect_format(&self, dataset: &Dataset) -> Option<&'a SourceFormat> {
        if let Some(instrument) = dataset.attrs().get_str("instrument") {
            let by_instrument = self.schema.formats.iter().find(|f| {
                f.instruments
                    .iter()
                    .any(|i| i.eq_ignore_ascii_case(instrument.trim()))
            });
            if by_instrument.is_some() {
                return by_instrument;
            }
        }

        let mut best: Option<(&'a SourceFormat, usize)> = None;
        for format in &self.schema.formats {
            let hits = format
                .variables
                .iter()
                .filter(|m| dataset.contains_variable(&m.source))
                .count();
            if hits > 0 && best.map_or(true, |(_, n)| hits > n) {
                best = Some((format, hits));
            }
        }
        best.map(|(format, _)| format)
    }

    /// Convert `dataset` into the canonical schema
    ///
    /// `format` selects a source format by name; when `None` it is detected.
    ///
    /// # Errors
    ///
    /// Returns a schema error when the named format is unknown, a source unit
    /// has no conversion to the canonical unit, or a required canonical
    /// variable has neither a source nor a default.
    pub fn convert(&self, dataset: &Dataset, format: Option<&str>) -> Result<Dataset> {
        let format = match format {
            Some(name) => Some(
                self.schema
                    .format(name)
                    .ok_or_else(|| WbtsError::schema(name, "unknown source format"))?,
            ),
            None => self.detect_format(dataset),
        };
        match format {
            Some(f) => debug!("Converting with source format '{}'", f.name),
            None => debug!("No source format matched, keeping canonical variables only"),
        }

        let renamed = self.rename_dimensions(dataset.clone(), format)?;
        let mut converted = Dataset::new();
        for coord in renamed.coordinates() {
            converted = converted.with_coordinate(normalise_time_axis(coord)?)?;
        }

        let variables = self.convert_variables(&renamed, format)?;
        for (name, var) in variables {
            converted = converted.with_variable(name, var)?;
        }
        converted = self.fill_required(converted)?;

        let mut attrs = renamed.attrs().clone();
        attrs.extend_from(&self.schema.global_attributes);
        if let Some(f) = format {
            attrs.extend_from(&f.attributes);
            attrs.insert(SOURCE_FORMAT_ATTR, f.name.clone());
        }
        attrs.extend_from(&self.extra_attributes);
        if let Some(key) = attrs.missing_keys(&self.schema.required_attributes).first() {
            return Err(WbtsError::schema(*key, "required global attribute missing"));
        }

        info!(
            "Converted dataset: {} variable(s), {} non-canonical",
            converted.variable_names().len(),
            converted
                .variables()
                .filter(|(_, v)| v.is_non_canonical())
                .count()
        );
        Ok(converted.with_attrs(attrs))
    }

    fn rename_dimensions(&self, mut dataset: Dataset, format: Option<&SourceFormat>) -> Result<Dataset> {
        let Some(format) = format else {
            return Ok(dataset);
        };
        for (from, to) in &format.dimensions {
            if dataset.coordinate(from).is_none() {
                continue;
            }
            if dataset.coordinate(to).is_some() {
                warn!("Dimension '{from}' not renamed: '{to}' already present");
                continue;
            }
            debug!("Renaming dimension '{from}' to '{to}'");
            dataset = dataset.rename_dimension(from, to)?;
        }
        Ok(dataset)
    }

    fn convert_variables(
        &self,
        dataset: &Dataset,
        format: Option<&SourceFormat>,
    ) -> Result<BTreeMap<String, Variable>> {
        let mut out = BTreeMap::new();

        // Variables already under a canonical name claim it before any mapped source
        for (name, var) in dataset.variables() {
            if let Some(canonical) = self.schema.canonical(name) {
                let var = self.canonicalize(name, var, canonical, None)?;
                out.insert(name.clone(), var);
            }
        }

        for (name, var) in dataset.variables() {
            if self.schema.canonical(name).is_some() {
                continue;
            }
            let mapping = format.and_then(|f| f.mapping(name));
            let var = normalise_time_variable(var);
            match mapping.and_then(|m| self.schema.canonical(&m.canonical).map(|c| (m, c))) {
                Some((mapping, canonical)) if !out.contains_key(&canonical.name) => {
                    debug!("Mapping '{name}' to '{}'", canonical.name);
                    let var = self.canonicalize(name, &var, canonical, Some(mapping))?;
                    out.insert(canonical.name.clone(), var);
                }
                Some((_, canonical)) => {
                    warn!(
                        "'{name}' maps to '{}' which is already provided, keeping it as non-canonical",
                        canonical.name
                    );
                    out.insert(name.clone(), self.passthrough(name, var));
                }
                None => {
                    out.insert(name.clone(), self.passthrough(name, var));
                }
            }
        }
        Ok(out)
    }

    fn canonicalize(
        &self,
        source: &str,
        var: &Variable,
        canonical: &CanonicalVariable,
        mapping: Option<&VariableMapping>,
    ) -> Result<Variable> {
        let from_units = var
            .units()
            .map(str::to_string)
            .or_else(|| mapping.and_then(|m| m.source_units.clone()));

        let conversion = match (mapping.and_then(|m| m.conversion), &canonical.units, &from_units) {
            (Some(explicit), _, _) => explicit,
            (None, Some(to), Some(from)) => {
                self.schema.conversion_between(from, to).ok_or_else(|| {
                    WbtsError::schema(
                        &canonical.name,
                        format!("no conversion from '{from}' to '{to}' for source variable '{source}'"),
                    )
                })?
            }
            _ => LinearConversion::IDENTITY,
        };

        let mut converted = if conversion.is_identity() {
            var.clone()
        } else {
            if !var.data().is_numeric() {
                return Err(WbtsError::schema(
                    &canonical.name,
                    format!("text variable '{source}' cannot be unit-converted"),
                ));
            }
            debug!(
                "Converting '{source}' with scale {} offset {}",
                conversion.scale, conversion.offset
            );
            var.map_numeric(|v| conversion.apply(v))
        };

        let attrs = converted.attrs_mut();
        attrs.remove(NON_CANONICAL_ATTR);
        if let Some(units) = &canonical.units {
            attrs.insert("units", units.clone());
        }
        if let Some(long_name) = &canonical.long_name {
            attrs.insert("long_name", long_name.clone());
        }
        if let Some(standard_name) = &canonical.standard_name {
            attrs.insert("standard_name", standard_name.clone());
        }
        Ok(converted)
    }

    /// Unrecognised variable: preferred-unit conversion only, then tagged
    fn passthrough(&self, name: &str, var: Variable) -> Variable {
        let var = match var.units().and_then(|u| self.schema.preferred_target(u)) {
            Some((target, conversion)) if var.data().is_numeric() => {
                let target = target.to_string();
                debug!("Converting non-canonical '{name}' to '{target}'");
                var.map_numeric(|v| conversion.apply(v))
                    .with_attribute("units", target)
            }
            _ => var,
        };
        var.with_attribute(NON_CANONICAL_ATTR, "true")
    }

    fn fill_required(&self, mut dataset: Dataset) -> Result<Dataset> {
        for canonical in self.schema.variables.iter().filter(|v| v.required) {
            if dataset.contains_variable(&canonical.name) {
                continue;
            }
            let Some(default) = canonical.default else {
                return Err(WbtsError::schema(
                    &canonical.name,
                    "required variable has no source in the input and no default",
                ));
            };
            let shape = canonical
                .dims
                .iter()
                .map(|d| {
                    dataset.dim_len(d).ok_or_else(|| {
                        WbtsError::schema(
                            &canonical.name,
                            format!("dimension '{d}' needed for the default is not present"),
                        )
                    })
                })
                .collect::<Result<Vec<_>>>()?;

            debug!("Filling required '{}' with default {default}", canonical.name);
            let mut var = Variable::numeric(canonical.dims.clone(), ArrayD::from_elem(IxDyn(&shape), default))?;
            let attrs = var.attrs_mut();
            if let Some(units) = &canonical.units {
                attrs.insert("units", units.clone());
            }
            if let Some(long_name) = &canonical.long_name {
                attrs.insert("long_name", long_name.clone());
            }
            if let Some(standard_name) = &canonical.standard_name {
                attrs.insert("standard_name", standard_name.clone());
            }
            dataset = dataset.with_variable(canonical.name.clone(), var)?;
        }
        Ok(dataset)
    }
}

fn time_conversion(units: Option<&str>) -> Option<LinearConversion> {
    let units = units?;
    if units == CANONICAL_TIME_UNITS {
        return None;
    }
    let parsed = CfTimeUnits::parse(units)?;
    // Epoch seconds spelled differently only need the units rewritten
    if parsed.is_canonical() {
        return Some(LinearConversion::new(1.0, 0.0));
    }
    let (scale, offset) = parsed.to_epoch_linear();
    Some(LinearConversion::new(scale, offset))
}

/// Time axis in canonical units; other axes are returned as they are
fn normalise_time_axis(coord: &Coordinate) -> Result<Coordinate> {
    match time_conversion(coord.units()) {
        Some(conversion) => {
            let mut attrs = coord.attrs().clone();
            attrs.insert("units", CANONICAL_TIME_UNITS);
            coord.with_values(
                coord.values().iter().map(|&v| conversion.apply(v)).collect(),
                attrs,
            )
        }
        None => Ok(coord.clone()),
    }
}

fn normalise_time_variable(var: &Variable) -> Variable {
    match time_conversion(var.units()) {
        Some(conversion) if var.data().is_numeric() => var
            .map_numeric(|v| conversion.apply(v))
            .with_attribute("units", CANONICAL_TIME_UNITS),
        _ => var.clone(),
    }
}

/// Convert with the given schema, detecting the source format
pub fn convert_dataset(dataset: &Dataset, schema: &CanonicalSchema) -> Result<Dataset> {
    Converter::new(schema).convert(dataset, None)
}
