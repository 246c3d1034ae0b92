//! Canonical schema tables
//!
//! The schema is plain configuration: canonical variables, the known source
//! formats with their name/unit mappings, and a table of linear unit
//! conversions. [`CanonicalSchema::wbts`] builds the tables used for the
//! WBTS CTD and LADCP products; any of it can be replaced from TOML.

use crate::dataset::AttributeBag;
use crate::errors::{Result, WbtsError};
use crate::loader::SchemaHint;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// `value * scale + offset`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearConversion {
    pub scale: f64,
    #[serde(default)]
    pub offset: f64,
}

impl LinearConversion {
    pub const IDENTITY: Self = Self {
        scale: 1.0,
        offset: 0.0,
    };

    pub fn new(scale: f64, offset: f64) -> Self {
        Self { scale, offset }
    }

    #[must_use]
    pub fn apply(self, value: f64) -> f64 {
        value * self.scale + self.offset
    }

    #[must_use]
    pub fn is_identity(self) -> bool {
        self.scale == 1.0 && self.offset == 0.0
    }

    /// Reverse transform; `None` for a zero scale
    #[must_use]
    pub fn inverse(self) -> Option<Self> {
        (self.scale != 0.0).then(|| Self::new(1.0 / self.scale, -self.offset / self.scale))
    }
}

/// Entry of the units table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitConversion {
    pub from: String,
    pub to: String,
    pub scale: f64,
    #[serde(default)]
    pub offset: f64,
}

impl UnitConversion {
    pub fn new(from: &str, to: &str, scale: f64, offset: f64) -> Self {
        Self {
            from: from.to_string(),
            to: to.to_string(),
            scale,
            offset,
        }
    }

    pub fn linear(&self) -> LinearConversion {
        LinearConversion::new(self.scale, self.offset)
    }
}

/// A variable of the canonical schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalVariable {
    pub name: String,
    #[serde(default)]
    pub units: Option<String>,
    #[serde(default)]
    pub long_name: Option<String>,
    #[serde(default)]
    pub standard_name: Option<String>,
    /// Conversion fails when a required variable has neither a source nor a default
    #[serde(default)]
    pub required: bool,
    /// Fill value for a required variable no source provides (`nan` allowed)
    #[serde(default)]
    pub default: Option<f64>,
    /// Dimensions a defaulted variable is created over
    #[serde(default)]
    pub dims: Vec<String>,
}

impl CanonicalVariable {
    pub fn new(name: &str, units: Option<&str>, long_name: &str, standard_name: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            units: units.map(str::to_string),
            long_name: Some(long_name.to_string()),
            standard_name: standard_name.map(str::to_string),
            required: false,
            default: None,
            dims: Vec::new(),
        }
    }

    /// Mark as required, optionally with a default filled over `dims`
    #[must_use]
    pub fn required(mut self, default: Option<f64>, dims: &[&str]) -> Self {
        self.required = true;
        self.default = default;
        self.dims = dims.iter().map(|d| d.to_string()).collect();
        self
    }
}

/// Source variable -> canonical variable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableMapping {
    pub source: String,
    pub canonical: String,
    /// Units assumed when the source variable carries none
    #[serde(default)]
    pub source_units: Option<String>,
    /// Explicit conversion, bypassing the units table
    #[serde(default)]
    pub conversion: Option<LinearConversion>,
}

impl VariableMapping {
    pub fn new(source: &str, canonical: &str, source_units: Option<&str>) -> Self {
        Self {
            source: source.to_string(),
            canonical: canonical.to_string(),
            source_units: source_units.map(str::to_string),
            conversion: None,
        }
    }
}

/// A known source format (instrument product)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceFormat {
    pub name: String,
    /// Values of the `instrument` attribute identifying this format
    #[serde(default)]
    pub instruments: Vec<String>,
    #[serde(default)]
    pub variables: Vec<VariableMapping>,
    /// Dimension renames, source name -> canonical name
    #[serde(default)]
    pub dimensions: BTreeMap<String, String>,
    /// Global attributes set on datasets of this format
    #[serde(default)]
    pub attributes: AttributeBag,
}

impl SourceFormat {
    /// Mapping for a source variable name
    pub fn mapping(&self, source: &str) -> Option<&VariableMapping> {
        self.variables.iter().find(|m| m.source == source)
    }

    /// Loader hint listing the source variables and units this format expects
    pub fn hint(&self) -> SchemaHint {
        self.variables.iter().fold(SchemaHint::new(), |hint, m| {
            hint.expect(m.source.clone(), m.source_units.as_deref())
        })
    }
}

/// The complete canonical schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalSchema {
    #[serde(default)]
    pub variables: Vec<CanonicalVariable>,
    #[serde(default)]
    pub formats: Vec<SourceFormat>,
    #[serde(default)]
    pub units: Vec<UnitConversion>,
    /// Units non-canonical variables are converted into when the table allows
    #[serde(default)]
    pub preferred_units: Vec<String>,
    /// Global attributes every canonical dataset carries
    #[serde(default)]
    pub global_attributes: AttributeBag,
    /// Global attributes that must be present after conversion
    #[serde(default)]
    pub required_attributes: Vec<String>,
    /// Order of global attributes in written files
    #[serde(default)]
    pub attribute_order: Vec<String>,
}

impl Default for CanonicalSchema {
    fn default() -> Self {
        Self::wbts()
    }
}

impl CanonicalSchema {
    /// Schema without any variable, format or conversion
    pub fn empty() -> Self {
        Self {
            variables: Vec::new(),
            formats: Vec::new(),
            units: Vec::new(),
            preferred_units: Vec::new(),
            global_attributes: AttributeBag::new(),
            required_attributes: Vec::new(),
            attribute_order: Vec::new(),
        }
    }

    pub fn canonical(&self, name: &str) -> Option<&CanonicalVariable> {
        self.variables.iter().find(|v| v.name == name)
    }

    pub fn format(&self, name: &str) -> Option<&SourceFormat> {
        self.formats.iter().find(|f| f.name.eq_ignore_ascii_case(name))
    }

    /// Linear conversion between two units
    ///
    /// Identical units give the identity; otherwise the units table is
    /// searched in both directions.
    pub fn conversion_between(&self, from: &str, to: &str) -> Option<LinearConversion> {
        if from == to {
            return Some(LinearConversion::IDENTITY);
        }
        if let Some(entry) = self.units.iter().find(|u| u.from == from && u.to == to) {
            return Some(entry.linear());
        }
        self.units
            .iter()
            .find(|u| u.from == to && u.to == from)
            .and_then(|u| u.linear().inverse())
    }

    /// Preferred unit reachable from `from` through the units table
    pub fn preferred_target(&self, from: &str) -> Option<(&str, LinearConversion)> {
        if self.preferred_units.iter().any(|p| p == from) {
            return None;
        }
        self.units
            .iter()
            .find(|u| u.from == from && self.preferred_units.contains(&u.to))
            .map(|u| (u.to.as_str(), u.linear()))
    }

    /// Check the schema's internal consistency
    pub fn validate(&self) -> Result<()> {
        for format in &self.formats {
            for mapping in &format.variables {
                if self.canonical(&mapping.canonical).is_none() {
                    return Err(WbtsError::schema(
                        &mapping.canonical,
                        format!(
                            "format '{}' maps '{}' to a variable the schema does not define",
                            format.name, mapping.source
                        ),
                    ));
                }
            }
        }
        for var in &self.variables {
            if var.default.is_some() && var.dims.is_empty() && var.required {
                return Err(WbtsError::schema(
                    &var.name,
                    "a defaulted variable needs the dimensions to create it over",
                ));
            }
        }
        Ok(())
    }

    /// Canonical tables for the WBTS CTD and LADCP products
    pub fn wbts() -> Self {
        let profile = ["DATETIME", "DEPTH"];
        let variables = vec![
            CanonicalVariable::new(
                "TEMP",
                Some("degree_C"),
                "Sea water temperature",
                Some("sea_water_temperature"),
            )
            .required(Some(f64::NAN), &profile),
            CanonicalVariable::new(
                "PSAL",
                Some("1e-3"),
                "Practical salinity",
                Some("sea_water_practical_salinity"),
            )
            .required(Some(f64::NAN), &profile),
            CanonicalVariable::new(
                "DOXY",
                Some("umol/kg"),
                "Dissolved oxygen",
                Some("moles_of_oxygen_per_unit_mass_in_sea_water"),
            ),
            CanonicalVariable::new(
                "U_WATER_VELOCITY",
                Some("m/s"),
                "Eastward water velocity",
                Some("eastward_sea_water_velocity"),
            )
            .required(Some(f64::NAN), &profile),
            CanonicalVariable::new(
                "V_WATER_VELOCITY",
                Some("m/s"),
                "Northward water velocity",
                Some("northward_sea_water_velocity"),
            )
            .required(Some(f64::NAN), &profile),
            CanonicalVariable::new("ERROR_VELOCITY", Some("m/s"), "Error velocity", None)
                .required(Some(f64::NAN), &profile),
            CanonicalVariable::new("LATITUDE", Some("degrees_north"), "Latitude", Some("latitude"))
                .required(None, &["DATETIME"]),
            CanonicalVariable::new(
                "LONGITUDE",
                Some("degrees_east"),
                "Longitude",
                Some("longitude"),
            )
            .required(None, &["DATETIME"]),
            CanonicalVariable::new("CAST", None, "Cast number", None),
            CanonicalVariable::new("TIME_FLAG", None, "Cast time source flag", None),
            CanonicalVariable::new("GC_STRING", None, "Cruise identifier", None),
        ];

        let ctd = SourceFormat {
            name: "ctd".to_string(),
            instruments: vec!["CTD".to_string()],
            variables: vec![
                VariableMapping::new("te", "TEMP", Some("degree_C")),
                VariableMapping::new("temperature", "TEMP", Some("degree_C")),
                VariableMapping::new("t090C", "TEMP", Some("degree_C")),
                VariableMapping::new("sa", "PSAL", Some("1e-3")),
                VariableMapping::new("salinity", "PSAL", Some("1e-3")),
                VariableMapping::new("sal00", "PSAL", Some("1e-3")),
                VariableMapping::new("ox", "DOXY", Some("umol/kg")),
                VariableMapping::new("oxygen", "DOXY", Some("umol/kg")),
                VariableMapping::new("latitude", "LATITUDE", Some("degrees_north")),
                VariableMapping::new("longitude", "LONGITUDE", Some("degrees_east")),
                VariableMapping::new("cast", "CAST", None),
                VariableMapping::new("time_flag", "TIME_FLAG", None),
                VariableMapping::new("gc_string", "GC_STRING", None),
            ],
            dimensions: BTreeMap::from([
                ("pr".to_string(), "DEPTH".to_string()),
                ("PRES".to_string(), "DEPTH".to_string()),
                ("time".to_string(), "DATETIME".to_string()),
            ]),
            attributes: [
                ("title", "CTD data of the Abaco Cruise"),
                ("instrument", "CTD"),
            ]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.into()))
            .collect(),
        };

        let ladcp = SourceFormat {
            name: "ladcp".to_string(),
            instruments: vec![
                "LADCP".to_string(),
                "Lowered Acoustic Doppler Current Profilers".to_string(),
            ],
            variables: vec![
                VariableMapping::new("u", "U_WATER_VELOCITY", Some("m/s")),
                VariableMapping::new("u_water_velocity_component", "U_WATER_VELOCITY", Some("m/s")),
                VariableMapping::new("v", "V_WATER_VELOCITY", Some("m/s")),
                VariableMapping::new("v_water_velocity_component", "V_WATER_VELOCITY", Some("m/s")),
                VariableMapping::new("ev", "ERROR_VELOCITY", Some("m/s")),
                VariableMapping::new("error_velocity", "ERROR_VELOCITY", Some("m/s")),
                VariableMapping::new("latitude", "LATITUDE", Some("degrees_north")),
                VariableMapping::new("longitude", "LONGITUDE", Some("degrees_east")),
                VariableMapping::new("cast", "CAST", None),
            ],
            dimensions: BTreeMap::from([
                ("z".to_string(), "DEPTH".to_string()),
                ("depth".to_string(), "DEPTH".to_string()),
                ("time".to_string(), "DATETIME".to_string()),
            ]),
            attributes: [
                ("title", "LADCP data of the Abaco Cruise"),
                ("instrument", "Lowered Acoustic Doppler Current Profilers"),
            ]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.into()))
            .collect(),
        };

        let units = vec![
            UnitConversion::new("cm/s", "m/s", 0.01, 0.0),
            UnitConversion::new("mm/s", "m/s", 0.001, 0.0),
            UnitConversion::new("K", "degree_C", 1.0, -273.15),
            UnitConversion::new("degC", "degree_C", 1.0, 0.0),
            UnitConversion::new("deg C", "degree_C", 1.0, 0.0),
            UnitConversion::new("PSU", "1e-3", 1.0, 0.0),
            UnitConversion::new("psu", "1e-3", 1.0, 0.0),
            UnitConversion::new("ml/l", "umol/kg", 43.570, 0.0),
        ];

        let global_attributes: AttributeBag = [
            ("project", "Western Boundary Time Series"),
            ("web_link", "https://www.aoml.noaa.gov/phod/wbts/data.php"),
            ("comment", "GIT repository: https://github.com/ocean-uhh/WBTSdata"),
            ("featureType", "profile"),
            ("Conventions", "CF-1.11"),
            ("contributing_institutions", "University of Hamburg - Institute of Oceanography"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.into()))
        .collect();

        let attribute_order = [
            "title",
            "project",
            "project_id",
            "platform",
            "geospatial_lat_min",
            "geospatial_lat_max",
            "geospatial_lon_min",
            "geospatial_lon_max",
            "geospatial_vertical_min",
            "geospatial_vertical_max",
            "time_coverage_start",
            "time_coverage_end",
            "sections",
            "contributor_name",
            "contributor_email",
            "contributor_role",
            "contributing_institutions",
            "web_link",
            "comment",
            "date_created",
            "featureType",
            "Conventions",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        Self {
            variables,
            formats: vec![ctd, ladcp],
            units,
            preferred_units: vec![
                "m/s".to_string(),
                "degree_C".to_string(),
                "1e-3".to_string(),
                "umol/kg".to_string(),
            ],
            global_attributes,
            required_attributes: vec!["project".to_string(), "Conventions".to_string()],
            attribute_order,
        }
    }
}
