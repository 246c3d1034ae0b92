//! Quality-control rules
//!
//! Rules run in the configured order over every targeted numeric variable and
//! only escalate flags; data is never touched. Removing flagged samples is a
//! separate explicit step, [`remove_flagged`].

use crate::dataset::{Coordinate, Dataset, QcFlag, Variable};
use crate::errors::{Result, WbtsError};
use log::{debug, warn};
use ndarray::{indices, ArrayD, Dimension};
use serde::{Deserialize, Serialize};

/// The check a rule performs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QcCheck {
    /// Finite values outside `[min, max]` are bad
    Range { min: f64, max: f64 },
    /// Adjacent samples changing faster than `max_rate` per coordinate unit are questionable
    RateOfChange { dimension: String, max_rate: f64 },
    /// Samples standing out from both neighbours by more than `threshold` are bad
    Spike { dimension: String, threshold: f64 },
    /// Infinite values are missing
    NonFinite,
}

impl QcCheck {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Range { .. } => "range",
            Self::RateOfChange { .. } => "rate_of_change",
            Self::Spike { .. } => "spike",
            Self::NonFinite => "non_finite",
        }
    }

    /// Flag given to samples the check rejects
    pub fn flag(&self) -> QcFlag {
        match self {
            Self::Range { .. } | Self::Spike { .. } => QcFlag::Bad,
            Self::RateOfChange { .. } => QcFlag::Questionable,
            Self::NonFinite => QcFlag::Missing,
        }
    }

    fn dimension(&self) -> Option<&str> {
        match self {
            Self::RateOfChange { dimension, .. } | Self::Spike { dimension, .. } => Some(dimension),
            _ => None,
        }
    }
}

/// A check and the variables it applies to
///
/// ```toml
/// [[merge.qc_rules]]
/// kind = "range"
/// variables = ["TEMP"]
/// min = -2.5
/// max = 40.0
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QcRule {
    /// Targeted variables; every numeric variable when empty
    #[serde(default)]
    pub variables: Vec<String>,
    #[serde(flatten)]
    pub check: QcCheck,
}

impl QcRule {
    pub fn new(check: QcCheck) -> Self {
        Self {
            variables: Vec::new(),
            check,
        }
    }

    #[must_use]
    pub fn for_variables(mut self, variables: &[&str]) -> Self {
        self.variables = variables.iter().map(|v| v.to_string()).collect();
        self
    }

    fn targets(&self, dataset: &Dataset) -> Vec<String> {
        if self.variables.is_empty() {
            return dataset
                .variables()
                .filter(|(_, v)| v.data().is_numeric())
                .map(|(n, _)| n.clone())
                .collect();
        }
        self.variables
            .iter()
            .filter(|name| match dataset.variable(name) {
                Some(v) if v.data().is_numeric() => true,
                Some(_) => {
                    warn!("QC rule '{}' skips text variable '{name}'", self.check.name());
                    false
                }
                None => {
                    warn!("QC rule '{}' targets absent variable '{name}'", self.check.name());
                    false
                }
            })
            .cloned()
            .collect()
    }
}

/// Samples one rule rejected in one variable
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleHit {
    pub rule: String,
    pub variable: String,
    /// Samples the rule rejected
    pub samples: usize,
    /// Rejected samples whose flag was raised
    pub escalated: usize,
}

/// Rejected sample indices, in row-major order
fn violations(check: &QcCheck, values: &ArrayD<f64>, axis: Option<(usize, &Coordinate)>) -> Vec<Vec<usize>> {
    let mut hits = Vec::new();
    for idx in indices(values.shape()) {
        let idx = idx.slice();
        let v = values[idx];
        let rejected = match (check, axis) {
            (QcCheck::Range { min, max }, _) => v.is_finite() && (v < *min || v > *max),
            (QcCheck::NonFinite, _) => v.is_infinite(),
            (QcCheck::RateOfChange { max_rate, .. }, Some((p, coord))) => {
                idx[p] > 0 && {
                    let mut prev = idx.to_vec();
                    prev[p] -= 1;
                    let u = values[prev.as_slice()];
                    let dc = (coord.values()[idx[p]] - coord.values()[idx[p] - 1]).abs();
                    v.is_finite() && u.is_finite() && dc > 0.0 && (v - u).abs() / dc > *max_rate
                }
            }
            (QcCheck::Spike { threshold, .. }, Some((p, coord))) => {
                idx[p] > 0 && idx[p] + 1 < coord.len() && {
                    let mut prev = idx.to_vec();
                    let mut next = idx.to_vec();
                    prev[p] -= 1;
                    next[p] += 1;
                    let (v1, v3) = (values[prev.as_slice()], values[next.as_slice()]);
                    v1.is_finite()
                        && v.is_finite()
                        && v3.is_finite()
                        && (v - (v3 + v1) / 2.0).abs() - ((v3 - v1) / 2.0).abs() > *threshold
                }
            }
            _ => false,
        };
        if rejected {
            hits.push(idx.to_vec());
        }
    }
    hits
}

fn check_variable(dataset: &Dataset, check: &QcCheck, name: &str, var: &Variable) -> Option<Vec<Vec<usize>>> {
    let values = var.values()?;
    let axis = match check.dimension() {
        Some(dim) => {
            let Some(p) = var.dims().iter().position(|d| d == dim) else {
                debug!("QC rule '{}' skips '{name}': no dimension '{dim}'", check.name());
                return None;
            };
            Some((p, dataset.coordinate(dim)?))
        }
        None => None,
    };
    Some(violations(check, values, axis))
}

/// Run `rules` over a copy of `dataset`
///
/// # Errors
///
/// In strict mode the first rejected sample fails with [`WbtsError::Qc`].
pub fn apply_rules(dataset: &Dataset, rules: &[QcRule], strict: bool) -> Result<(Dataset, Vec<RuleHit>)> {
    let mut checked = dataset.clone();
    let mut hits = Vec::new();

    for rule in rules {
        for name in rule.targets(&checked) {
            let Some(var) = checked.variable(&name) else {
                continue;
            };
            let Some(rejected) = check_variable(&checked, &rule.check, &name, var) else {
                continue;
            };
            if rejected.is_empty() {
                continue;
            }
            if strict {
                return Err(WbtsError::Qc {
                    rule: rule.check.name().to_string(),
                    coordinate: checked.describe_index(var.dims(), &rejected[0]),
                    variable: name,
                    index: rejected[0].clone(),
                });
            }

            let flag = rule.check.flag();
            let escalated = match checked.variable_mut(&name) {
                Some(var) => rejected
                    .iter()
                    .filter(|idx| var.escalate_flag(idx, flag))
                    .count(),
                None => 0,
            };
            debug!(
                "QC rule '{}' rejected {} sample(s) of '{name}'",
                rule.check.name(),
                rejected.len()
            );
            hits.push(RuleHit {
                rule: rule.check.name().to_string(),
                variable: name,
                samples: rejected.len(),
                escalated,
            });
        }
    }
    Ok((checked, hits))
}

/// Replace every sample flagged at or above `threshold` with a missing value
///
/// Returns the new dataset and the number of samples removed.
pub fn remove_flagged(dataset: &Dataset, threshold: QcFlag) -> Result<(Dataset, usize)> {
    let mut cleaned = dataset.clone();
    let mut removed = 0;
    for (name, var) in dataset.variables() {
        let (var, count) = var.remove_flagged(threshold);
        if count > 0 {
            debug!("Removed {count} sample(s) of '{name}' flagged {threshold} or worse");
            removed += count;
            cleaned = cleaned.with_variable(name.clone(), var)?;
        }
    }
    Ok((cleaned, removed))
}
