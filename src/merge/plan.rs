//! Coordinate reconciliation
//!
//! A [`MergePlan`] holds, for every dimension of the inputs, the target axis
//! and each input's map from source index to target index. It is derived
//! from the inputs and the per-dimension [`DimensionRule`]s and never stored.

use crate::dataset::{AttributeBag, Coordinate, Dataset};
use crate::errors::{Result, WbtsError};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// How the target axis of a dimension is built
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AxisPolicy {
    /// Every value of every input, near values snapped together
    #[default]
    Union,
    /// Only values present in every input carrying the dimension
    Intersection,
    /// The first input's axis; other inputs snap onto it
    Nearest,
}

impl fmt::Display for AxisPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Union => "union",
            Self::Intersection => "intersection",
            Self::Nearest => "nearest",
        };
        write!(f, "{name}")
    }
}

impl FromStr for AxisPolicy {
    type Err = WbtsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "union" => Ok(Self::Union),
            "intersection" => Ok(Self::Intersection),
            "nearest" => Ok(Self::Nearest),
            other => Err(WbtsError::Config {
                message: format!("unknown axis policy '{other}'"),
            }),
        }
    }
}

/// Policy and tolerance for one dimension
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DimensionRule {
    #[serde(default)]
    pub policy: AxisPolicy,
    /// Largest distance at which two values count as the same point
    #[serde(default)]
    pub tolerance: f64,
}

impl DimensionRule {
    pub fn new(policy: AxisPolicy, tolerance: f64) -> Self {
        Self { policy, tolerance }
    }
}

/// Target axis of one dimension and the per-input index maps onto it
#[derive(Debug, Clone, PartialEq)]
pub struct AxisPlan {
    pub target: Coordinate,
    /// `maps[input][source_index]`; `None` for inputs without the dimension
    pub maps: Vec<Option<Vec<Option<usize>>>>,
}

impl AxisPlan {
    pub fn dimension(&self) -> &str {
        self.target.name()
    }

    /// Target index of `source` in input `input`
    pub fn map(&self, input: usize, source: usize) -> Option<usize> {
        self.maps.get(input)?.as_ref()?.get(source).copied().flatten()
    }
}

/// Target axes for every dimension, sorted by dimension name
#[derive(Debug, Clone, PartialEq)]
pub struct MergePlan {
    axes: Vec<AxisPlan>,
}

impl MergePlan {
    /// Reconcile the coordinate axes of `inputs`
    ///
    /// `rules` overrides `default` for the dimensions it names.
    ///
    /// # Errors
    ///
    /// Returns an alignment error when inputs declare different units for a
    /// dimension, a tolerance collapses two samples of one input, an
    /// intersection is empty, or a nearest-policy input has no sample in range.
    pub fn build(
        inputs: &[Dataset],
        rules: &BTreeMap<String, DimensionRule>,
        default: DimensionRule,
    ) -> Result<Self> {
        let dimensions: BTreeSet<&str> = inputs
            .iter()
            .flat_map(|ds| ds.dimension_names())
            .collect();

        let axes = dimensions
            .into_iter()
            .map(|dim| {
                let rule = rules.get(dim).copied().unwrap_or(default);
                let axes: Vec<Option<&Coordinate>> =
                    inputs.iter().map(|ds| ds.coordinate(dim)).collect();
                plan_axis(dim, &axes, rule)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { axes })
    }

    pub fn axes(&self) -> &[AxisPlan] {
        &self.axes
    }

    pub fn axis(&self, dimension: &str) -> Option<&AxisPlan> {
        self.axes.iter().find(|a| a.dimension() == dimension)
    }

    /// Target index of a sample of input `input`; `None` when a coordinate was dropped
    pub fn target_index(&self, input: usize, dims: &[String], source: &[usize]) -> Option<Vec<usize>> {
        dims.iter()
            .zip(source)
            .map(|(d, &s)| self.axis(d)?.map(input, s))
            .collect()
    }
}

fn plan_axis(dim: &str, axes: &[Option<&Coordinate>], rule: DimensionRule) -> Result<AxisPlan> {
    if !(rule.tolerance >= 0.0) {
        return Err(WbtsError::alignment(
            dim,
            format!("tolerance must be a non-negative number, got {}", rule.tolerance),
        ));
    }
    let attrs = coordinate_attrs(dim, axes)?;

    let (target_values, maps) = match rule.policy {
        AxisPolicy::Union | AxisPolicy::Intersection => cluster_axes(dim, axes, rule)?,
        AxisPolicy::Nearest => snap_to_first(dim, axes, rule.tolerance)?,
    };

    for (input, map) in maps.iter().enumerate() {
        if let Some(map) = map {
            check_collapse(dim, input, map, &target_values)?;
        }
    }

    debug!(
        "Axis '{dim}' ({}, tolerance {}): {} target value(s)",
        rule.policy,
        rule.tolerance,
        target_values.len()
    );
    let target = Coordinate::new(dim, target_values, attrs)
        .map_err(|e| WbtsError::alignment(dim, e.to_string()))?;
    Ok(AxisPlan { target, maps })
}

/// Coordinate attributes shared by all inputs; units must agree
fn coordinate_attrs(dim: &str, axes: &[Option<&Coordinate>]) -> Result<AttributeBag> {
    let units: BTreeSet<Option<&str>> = axes.iter().flatten().map(|c| c.units()).collect();
    if units.len() > 1 {
        let listed: Vec<String> = units
            .iter()
            .map(|u| u.map_or_else(|| "<none>".to_string(), |u| format!("'{u}'")))
            .collect();
        return Err(WbtsError::alignment(
            dim,
            format!("inputs declare different units: {}", listed.join(", ")),
        ));
    }

    let mut attrs = AttributeBag::new();
    for coord in axes.iter().flatten() {
        for (key, value) in coord.attrs().iter() {
            // Lexicographically smallest rendering wins so the result is order-independent
            let replace = attrs
                .get(key)
                .map_or(true, |current| value.to_string() < current.to_string());
            if replace {
                attrs.insert(key.clone(), value.clone());
            }
        }
    }
    Ok(attrs)
}

type AxisMaps = Vec<Option<Vec<Option<usize>>>>;

/// Union and intersection: sort every value, cut into clusters whose spread is
/// within tolerance, represent each cluster by its smallest value
fn cluster_axes(dim: &str, axes: &[Option<&Coordinate>], rule: DimensionRule) -> Result<(Vec<f64>, AxisMaps)> {
    let mut all: Vec<f64> = axes.iter().flatten().flat_map(|c| c.values().iter().copied()).collect();
    all.sort_by(f64::total_cmp);

    let mut starts: Vec<f64> = Vec::new();
    for v in all {
        match starts.last() {
            Some(&start) if v - start <= rule.tolerance => {}
            _ => starts.push(v),
        }
    }

    let cluster_of = |v: f64| starts.partition_point(|&s| s <= v).saturating_sub(1);
    let cluster_maps: Vec<Option<Vec<usize>>> = axes
        .iter()
        .map(|axis| axis.map(|c| c.values().iter().map(|&v| cluster_of(v)).collect()))
        .collect();

    let keep: Vec<bool> = match rule.policy {
        AxisPolicy::Intersection => {
            let mut coverage = vec![0usize; starts.len()];
            let mut carrying = 0;
            for map in cluster_maps.iter().flatten() {
                carrying += 1;
                let distinct: BTreeSet<usize> = map.iter().copied().collect();
                for cluster in distinct {
                    coverage[cluster] += 1;
                }
            }
            coverage.iter().map(|&n| n == carrying).collect()
        }
        _ => vec![true; starts.len()],
    };

    let mut renumber = vec![None; starts.len()];
    let mut target = Vec::new();
    for (cluster, &start) in starts.iter().enumerate() {
        if keep[cluster] {
            renumber[cluster] = Some(target.len());
            target.push(start);
        }
    }
    if target.is_empty() && !starts.is_empty() {
        return Err(WbtsError::alignment(
            dim,
            "intersection of the input axes is empty",
        ));
    }

    let maps = cluster_maps
        .into_iter()
        .map(|map| map.map(|m| m.into_iter().map(|cluster| renumber[cluster]).collect()))
        .collect();
    Ok((target, maps))
}

/// Nearest: the first input carrying the dimension defines the axis
fn snap_to_first(dim: &str, axes: &[Option<&Coordinate>], tolerance: f64) -> Result<(Vec<f64>, AxisMaps)> {
    let Some(reference) = axes.iter().flatten().next() else {
        return Ok((Vec::new(), vec![None; axes.len()]));
    };
    let target = reference.values().to_vec();

    let mut maps = Vec::with_capacity(axes.len());
    for (input, axis) in axes.iter().enumerate() {
        let Some(coord) = axis else {
            maps.push(None);
            continue;
        };
        let map: Vec<Option<usize>> = coord
            .values()
            .iter()
            .map(|&v| nearest_within(&target, v, tolerance))
            .collect();
        if !coord.is_empty() && map.iter().all(Option::is_none) {
            return Err(WbtsError::alignment(
                dim,
                format!("input {input} has no sample within {tolerance} of the reference axis"),
            ));
        }
        let dropped = map.iter().filter(|m| m.is_none()).count();
        if dropped > 0 {
            debug!("Axis '{dim}': dropping {dropped} sample(s) of input {input} outside tolerance");
        }
        maps.push(Some(map));
    }
    Ok((target, maps))
}

fn nearest_within(target: &[f64], value: f64, tolerance: f64) -> Option<usize> {
    target
        .iter()
        .enumerate()
        .map(|(i, &t)| (i, (t - value).abs()))
        .filter(|&(_, d)| d <= tolerance)
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(i, _)| i)
}

fn check_collapse(dim: &str, input: usize, map: &[Option<usize>], target: &[f64]) -> Result<()> {
    let mut seen: BTreeMap<usize, usize> = BTreeMap::new();
    for (source, t) in map.iter().enumerate() {
        let Some(t) = *t else { continue };
        if let Some(previous) = seen.insert(t, source) {
            return Err(WbtsError::alignment(
                dim,
                format!(
                    "samples {previous} and {source} of input {input} both fall onto {}",
                    target[t]
                ),
            ));
        }
    }
    Ok(())
}
