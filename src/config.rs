//! Pipeline configuration
//!
//! Everything the pipeline needs beyond its inputs lives in one
//! [`PipelineConfig`], read from TOML. Missing sections fall back to the
//! built-in WBTS defaults.
//!
//! ```toml
//! input_dir = "../data/input"
//! output_dir = "../data"
//! threads = 4
//!
//! [cruises.GC_2001_04]
//! cruise_id = "AB0104 / OC365-9"
//! start_date = "2001-04-26"
//! end_date = "2001-05-07"
//! ship = "R/V OCEANUS"
//! sections = "Abaco and Northwest Providence Channel Sections"
//! ```

use crate::convert::CanonicalSchema;
use crate::dataset::AttributeBag;
use crate::discover::{is_cruise_key, DiscoveryOptions};
use crate::errors::{Result, WbtsError};
use crate::loader::SchemaHint;
use crate::merge::MergeOptions;
use crate::parallel::ParallelConfig;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Metadata of one cruise
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CruiseInfo {
    pub cruise_id: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub ship: Option<String>,
    pub sections: Option<String>,
    /// Further global attributes for datasets of this cruise
    pub attributes: AttributeBag,
}

impl CruiseInfo {
    /// Global attributes describing the cruise `key`
    pub fn to_attributes(&self, key: &str) -> AttributeBag {
        let mut attrs = AttributeBag::new();
        attrs.insert("cruise_key", key);
        let fields = [
            ("cruise_id", &self.cruise_id),
            ("time_cruise_start", &self.start_date),
            ("time_cruise_end", &self.end_date),
            ("ship", &self.ship),
            ("sections", &self.sections),
        ];
        for (name, value) in fields {
            if let Some(value) = value {
                attrs.insert(name, value.clone());
            }
        }
        attrs.extend_from(&self.attributes);
        attrs
    }
}

/// Complete pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub input_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    /// Threads for parallel loads; all cores when unset
    pub threads: Option<usize>,
    pub schema: CanonicalSchema,
    pub merge: MergeOptions,
    pub discovery: DiscoveryOptions,
    /// Cruise metadata keyed by `GC_YYYY_MM`
    pub cruises: BTreeMap<String, CruiseInfo>,
    /// Global attributes of the all-years product
    pub merge_years_attributes: AttributeBag,
    /// Move CTD casts onto the times of LADCP casts with the same number
    pub ctd_times_from_ladcp: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let merge = MergeOptions {
            qc_rules: MergeOptions::wbts_rules(),
            attributes: [
                ("title", "CTD and LADCP data of the Abaco Cruise"),
                (
                    "platform",
                    "CTD and Lowered Acoustic Doppler Current Profilers (LADCP)",
                ),
            ]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.into()))
            .collect(),
            ..MergeOptions::default()
        };
        Self {
            input_dir: None,
            output_dir: None,
            threads: None,
            schema: CanonicalSchema::wbts(),
            merge,
            discovery: DiscoveryOptions::default(),
            cruises: BTreeMap::new(),
            merge_years_attributes: [(
                "sections".to_string(),
                "Abaco, Northwest Providence Channel and 27N Florida Straits Sections".into(),
            )]
            .into_iter()
            .collect(),
            ctd_times_from_ladcp: true,
        }
    }
}

impl PipelineConfig {
    /// Parse and validate a TOML configuration
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and validate a TOML configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(WbtsError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        debug!("Reading configuration from {}", path.display());
        Self::from_toml_str(&fs::read_to_string(path)?)
    }

    /// `from_file` when a path is given, the defaults otherwise
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.threads == Some(0) {
            return Err(WbtsError::Config {
                message: "threads must be at least 1".to_string(),
            });
        }
        if let Some(key) = self.cruises.keys().find(|k| !is_cruise_key(k)) {
            return Err(WbtsError::Config {
                message: format!("cruise key '{key}' is not of the form GC_YYYY_MM"),
            });
        }
        for (dim, rule) in &self.merge.dimensions {
            if !(rule.tolerance >= 0.0) {
                return Err(WbtsError::Config {
                    message: format!("tolerance of dimension '{dim}' must be non-negative"),
                });
            }
        }
        self.schema.validate()
    }

    pub fn parallel(&self) -> ParallelConfig {
        ParallelConfig::new(self.threads)
    }

    /// Cruise metadata as global attributes; empty for unknown keys
    pub fn cruise_attributes(&self, key: &str) -> AttributeBag {
        self.cruises
            .get(key)
            .map(|c| c.to_attributes(key))
            .unwrap_or_default()
    }

    /// Loader hint for a named source format, or an empty hint
    pub fn hint_for(&self, format: Option<&str>) -> SchemaHint {
        format
            .and_then(|f| self.schema.format(f))
            .map(|f| f.hint())
            .unwrap_or_default()
    }
}
