//! Merging canonical datasets and quality control
//!
//! [`merge_datasets`] aligns N canonical datasets onto common coordinates,
//! settles samples several inputs provide, runs the QC rules and returns the
//! merged dataset together with a [`QcReport`].
//!
//! # Organization
//!
//! - [`plan`]: target axes and per-input index maps
//! - [`conflict`]: per-cell tie-breaking
//! - [`qc`]: flagging rules and explicit removal of flagged samples
//! - [`report`]: the serialisable report

pub mod conflict;
pub mod plan;
pub mod qc;
pub mod report;

pub use conflict::{ConflictRecord, Resolution};
pub use plan::{AxisPolicy, DimensionRule, MergePlan};
pub use qc::{apply_rules, remove_flagged, QcCheck, QcRule, RuleHit};
pub use report::{AttributeDisagreement, FlagCounts, QcReport};

use crate::dataset::{AttrValue, AttributeBag, Dataset, QcFlag, Variable, VariableData};
use crate::errors::{Result, WbtsError};
use crate::metadata;
use conflict::{Candidate, Resolved, Sample};
use log::{debug, info};
use ndarray::{indices, ArrayD, Dimension, IxDyn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Attributes never carried from the inputs into a merged dataset
const DROPPED_ATTRIBUTES: [&str; 1] = ["history"];

/// Merge and QC settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeOptions {
    /// Rule for dimensions without an entry in `dimensions`
    pub axis: DimensionRule,
    pub dimensions: BTreeMap<String, DimensionRule>,
    /// Priority of each input by position; missing entries are 0
    pub priorities: Vec<i32>,
    pub qc_rules: Vec<QcRule>,
    /// Fail on the first QC rule violation
    pub strict: bool,
    /// Replace samples flagged at or above this with missing values
    pub remove_threshold: Option<QcFlag>,
    /// Global attributes set on the merged dataset, overriding the inputs'
    pub attributes: AttributeBag,
    /// Compute geospatial and time coverage attributes
    pub extent_attributes: bool,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            axis: DimensionRule::default(),
            dimensions: BTreeMap::new(),
            priorities: Vec::new(),
            qc_rules: Vec::new(),
            strict: false,
            remove_threshold: None,
            attributes: AttributeBag::new(),
            extent_attributes: true,
        }
    }
}

impl MergeOptions {
    pub fn priority(&self, input: usize) -> i32 {
        self.priorities.get(input).copied().unwrap_or(0)
    }

    /// Rule for one dimension
    #[must_use]
    pub fn with_dimension(mut self, dimension: &str, rule: DimensionRule) -> Self {
        self.dimensions.insert(dimension.to_string(), rule);
        self
    }

    /// QC rules for WBTS temperature, salinity and velocity profiles
    pub fn wbts_rules() -> Vec<QcRule> {
        let velocities = ["U_WATER_VELOCITY", "V_WATER_VELOCITY"];
        vec![
            QcRule::new(QcCheck::NonFinite),
            QcRule::new(QcCheck::Range {
                min: -2.5,
                max: 40.0,
            })
            .for_variables(&["TEMP"]),
            QcRule::new(QcCheck::Range { min: 2.0, max: 41.0 }).for_variables(&["PSAL"]),
            QcRule::new(QcCheck::Range { min: -3.0, max: 3.0 }).for_variables(&velocities),
            QcRule::new(QcCheck::Spike {
                dimension: "DEPTH".to_string(),
                threshold: 6.0,
            })
            .for_variables(&["TEMP"]),
            QcRule::new(QcCheck::Spike {
                dimension: "DEPTH".to_string(),
                threshold: 0.9,
            })
            .for_variables(&["PSAL"]),
        ]
    }
}

/// A merged dataset and its report
#[derive(Debug, Clone)]
pub struct MergeOutput {
    pub dataset: Dataset,
    pub report: QcReport,
}

/// Merge canonical datasets onto common coordinates and run QC
///
/// # Errors
///
/// Returns an alignment error when axes cannot be reconciled, a schema error
/// when inputs disagree on a variable's dimensions, kind or units, a conflict
/// error for tied differing text samples, and a QC error in strict mode.
pub fn merge_datasets(inputs: &[Dataset], options: &MergeOptions) -> Result<MergeOutput> {
    if inputs.is_empty() {
        return Err(WbtsError::structure("No datasets to merge"));
    }
    info!("Merging {} dataset(s)", inputs.len());

    let plan = MergePlan::build(inputs, &options.dimensions, options.axis)?;
    let priorities: Vec<i32> = (0..inputs.len()).map(|i| options.priority(i)).collect();
    let mut report = QcReport::new(inputs.len());

    let mut merged = Dataset::new();
    for axis in plan.axes() {
        merged = merged.with_coordinate(axis.target.clone())?;
    }

    let names: BTreeSet<&str> = inputs.iter().flat_map(|ds| ds.variable_names()).collect();
    for name in names {
        let holders: Vec<(usize, &Variable)> = inputs
            .iter()
            .enumerate()
            .filter_map(|(i, ds)| ds.variable(name).map(|v| (i, v)))
            .collect();
        check_layout(name, &holders)?;

        let (attrs, disagreements) = merge_attributes(
            name,
            holders.iter().map(|(i, v)| (priorities[*i], v.attrs())),
        );
        report.attribute_disagreements.extend(disagreements);

        let (var, conflicts) = merge_variable(name, &holders, &plan, &merged, &priorities)?;
        if !conflicts.is_empty() {
            debug!("'{name}': {} conflict(s) resolved", conflicts.len());
        }
        report.conflicts.extend(conflicts);
        merged = merged.with_variable(name, var.with_attrs(attrs))?;
    }

    let (mut attrs, disagreements) = merge_attributes(
        "global",
        inputs
            .iter()
            .enumerate()
            .map(|(i, ds)| (priorities[i], ds.attrs())),
    );
    report.attribute_disagreements.extend(disagreements);
    attrs.extend_from(&options.attributes);
    let merged = merged.with_attrs(attrs);

    let (mut merged, hits) = apply_rules(&merged, &options.qc_rules, options.strict)?;
    report.rule_hits = hits;

    if let Some(threshold) = options.remove_threshold {
        let (cleaned, removed) = remove_flagged(&merged, threshold)?;
        report.removed_samples = removed;
        merged = cleaned;
    }
    if options.extent_attributes {
        merged = metadata::with_extent_attributes(merged);
    }
    report.count_flags(&merged);

    info!(
        "Merged into {} variable(s): {} conflict(s), {} QC rule hit(s)",
        merged.variable_names().len(),
        report.conflicts.len(),
        report.rule_hits.iter().map(|h| h.samples).sum::<usize>()
    );
    Ok(MergeOutput {
        dataset: merged,
        report,
    })
}

fn check_layout(name: &str, holders: &[(usize, &Variable)]) -> Result<()> {
    let Some((first_input, first)) = holders.first() else {
        return Ok(());
    };
    for (input, var) in &holders[1..] {
        if var.dims() != first.dims() {
            return Err(WbtsError::schema(
                name,
                format!(
                    "input {first_input} has dimensions [{}], input {input} has [{}]",
                    first.dims().join(", "),
                    var.dims().join(", ")
                ),
            ));
        }
        if var.data().kind() != first.data().kind() {
            return Err(WbtsError::schema(
                name,
                format!(
                    "input {first_input} is {}, input {input} is {}",
                    first.data().kind(),
                    var.data().kind()
                ),
            ));
        }
        if var.units() != first.units() {
            return Err(WbtsError::schema(
                name,
                format!(
                    "input {first_input} has units {:?}, input {input} has {:?}",
                    first.units(),
                    var.units()
                ),
            ));
        }
    }
    Ok(())
}

fn row_major_strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1; shape.len()];
    for i in (0..shape.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * shape[i + 1];
    }
    strides
}

fn merge_variable(
    name: &str,
    holders: &[(usize, &Variable)],
    plan: &MergePlan,
    merged: &Dataset,
    priorities: &[i32],
) -> Result<(Variable, Vec<ConflictRecord>)> {
    let Some((_, template)) = holders.first() else {
        return Err(WbtsError::VariableNotFound {
            var: name.to_string(),
        });
    };
    let dims = template.dims().to_vec();
    let shape = dims
        .iter()
        .map(|d| {
            merged
                .dim_len(d)
                .ok_or_else(|| WbtsError::structure(format!("No target axis for dimension '{d}'")))
        })
        .collect::<Result<Vec<_>>>()?;
    let strides = row_major_strides(&shape);

    let mut cells: Vec<Vec<Candidate<'_>>> = vec![Vec::new(); shape.iter().product()];
    for &(input, var) in holders {
        for idx in indices(var.shape()) {
            let idx = idx.slice();
            let Some(target) = plan.target_index(input, &dims, idx) else {
                continue;
            };
            let offset: usize = target.iter().zip(&strides).map(|(t, s)| t * s).sum();
            let value = match var.data() {
                VariableData::Numeric(a) => Sample::Number(a[idx]),
                VariableData::Text(a) => Sample::Text(a[idx].as_str()),
            };
            cells[offset].push(Candidate {
                input,
                priority: priorities[input],
                value,
                flag: var.flags()[idx],
            });
        }
    }

    let mut values = Vec::with_capacity(cells.len());
    let mut flags = Vec::with_capacity(cells.len());
    let mut conflicts = Vec::new();
    for (idx, candidates) in indices(shape.as_slice()).into_iter().zip(&cells) {
        let coordinate = if candidates.len() > 1 {
            merged.describe_index(&dims, idx.slice())
        } else {
            String::new()
        };
        let outcome = conflict::resolve(name, &coordinate, candidates)?;
        values.push(outcome.value);
        flags.push(outcome.flag);
        conflicts.extend(outcome.record);
    }

    let data = if template.data().is_numeric() {
        let numbers = values
            .into_iter()
            .map(|v| match v {
                Some(Resolved::Number(n)) => n,
                _ => f64::NAN,
            })
            .collect();
        VariableData::Numeric(ArrayD::from_shape_vec(IxDyn(&shape), numbers)?)
    } else {
        let texts = values
            .into_iter()
            .map(|v| match v {
                Some(Resolved::Text(s)) => s,
                _ => String::new(),
            })
            .collect();
        VariableData::Text(ArrayD::from_shape_vec(IxDyn(&shape), texts)?)
    };
    let flags = ArrayD::from_shape_vec(IxDyn(&shape), flags)?;
    let var = Variable::from_data(dims, data)?.with_flags(flags)?;
    Ok((var, conflicts))
}

/// Key-wise merge: highest priority wins, ties take the smallest rendering
fn merge_attributes<'a>(
    scope: &str,
    bags: impl Iterator<Item = (i32, &'a AttributeBag)>,
) -> (AttributeBag, Vec<AttributeDisagreement>) {
    let mut by_key: BTreeMap<&'a str, Vec<(i32, &'a AttrValue)>> = BTreeMap::new();
    for (priority, bag) in bags {
        for (key, value) in bag.iter() {
            if DROPPED_ATTRIBUTES.contains(&key.as_str()) {
                continue;
            }
            by_key.entry(key.as_str()).or_default().push((priority, value));
        }
    }

    let mut merged = AttributeBag::new();
    let mut disagreements = Vec::new();
    for (key, offered) in by_key {
        let top = offered.iter().map(|(p, _)| *p).max().unwrap_or_default();
        let Some(chosen) = offered
            .iter()
            .filter(|(p, _)| *p == top)
            .map(|(_, v)| *v)
            .min_by_key(|v| v.to_string())
        else {
            continue;
        };

        let distinct: BTreeSet<String> = offered.iter().map(|(_, v)| v.to_string()).collect();
        if distinct.len() > 1 {
            disagreements.push(AttributeDisagreement {
                scope: scope.to_string(),
                key: key.to_string(),
                values: distinct.into_iter().collect(),
                chosen: chosen.to_string(),
            });
        }
        merged.insert(key, chosen.clone());
    }
    (merged, disagreements)
}
