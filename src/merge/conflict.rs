//! Conflict resolution between inputs covering the same sample
//!
//! The outcome depends only on the set of candidates, never on the order the
//! inputs were given in:
//!
//! 1. missing candidates are ignored
//! 2. the least severe flag wins
//! 3. on equal flags the highest priority wins
//! 4. still tied: identical values are kept, numbers are averaged, differing
//!    text is an error

use crate::dataset::QcFlag;
use crate::errors::{Result, WbtsError};
use serde::Serialize;
use std::fmt;

/// One input's sample at a target cell
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sample<'a> {
    Number(f64),
    Text(&'a str),
}

impl Sample<'_> {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(v) => Some(*v),
            Self::Text(_) => None,
        }
    }

    fn same_as(&self, other: &Sample<'_>) -> bool {
        match (self, other) {
            (Sample::Number(a), Sample::Number(b)) => a.to_bits() == b.to_bits() || a == b,
            (Sample::Text(a), Sample::Text(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Sample<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(v) => write!(f, "{v}"),
            Self::Text(s) => write!(f, "{s:?}"),
        }
    }
}

/// A sample offered by one input
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate<'a> {
    pub input: usize,
    pub priority: i32,
    pub value: Sample<'a>,
    pub flag: QcFlag,
}

/// Merged value of a cell
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
    Number(f64),
    Text(String),
}

/// How a conflict was settled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Single best QC flag
    Flag,
    /// Single highest priority among the best-flagged candidates
    Priority,
    /// Top candidates agree
    Identical,
    /// Mean of the top numeric candidates
    Averaged,
}

/// Candidate as listed in the report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateSummary {
    pub input: usize,
    pub priority: i32,
    pub value: String,
    pub flag: QcFlag,
}

/// A resolved conflict
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConflictRecord {
    pub variable: String,
    pub coordinate: String,
    pub candidates: Vec<CandidateSummary>,
    pub resolution: Resolution,
    pub value: String,
}

/// Outcome for one cell
#[derive(Debug, Clone, PartialEq)]
pub struct CellOutcome {
    pub value: Option<Resolved>,
    pub flag: QcFlag,
    pub record: Option<ConflictRecord>,
}

impl CellOutcome {
    fn missing() -> Self {
        Self {
            value: None,
            flag: QcFlag::Missing,
            record: None,
        }
    }
}

fn resolved(sample: Sample<'_>) -> Resolved {
    match sample {
        Sample::Number(v) => Resolved::Number(v),
        Sample::Text(s) => Resolved::Text(s.to_string()),
    }
}

fn render(value: &Resolved) -> String {
    match value {
        Resolved::Number(v) => v.to_string(),
        Resolved::Text(s) => format!("{s:?}"),
    }
}

/// Settle the candidates of one cell of `variable` located at `coordinate`
///
/// A record is produced only when the present candidates disagree.
///
/// # Errors
///
/// Returns [`WbtsError::Conflict`] when differing text samples remain tied
/// after the flag and priority rules.
pub fn resolve(variable: &str, coordinate: &str, candidates: &[Candidate<'_>]) -> Result<CellOutcome> {
    let present: Vec<&Candidate<'_>> = candidates
        .iter()
        .filter(|c| c.flag != QcFlag::Missing)
        .collect();

    let Some(first) = present.first() else {
        return Ok(CellOutcome::missing());
    };
    let best_flag = present.iter().map(|c| c.flag).min().unwrap_or(QcFlag::Missing);
    if present.iter().all(|c| c.value.same_as(&first.value)) {
        return Ok(CellOutcome {
            value: Some(resolved(first.value)),
            flag: best_flag,
            record: None,
        });
    }

    let best_flagged: Vec<&Candidate<'_>> =
        present.iter().copied().filter(|c| c.flag == best_flag).collect();
    let top_priority = best_flagged.iter().map(|c| c.priority).max().unwrap_or_default();
    let top: Vec<&Candidate<'_>> = best_flagged
        .iter()
        .copied()
        .filter(|c| c.priority == top_priority)
        .collect();

    let (value, resolution) = if best_flagged.len() == 1 {
        (resolved(best_flagged[0].value), Resolution::Flag)
    } else if top.len() == 1 {
        (resolved(top[0].value), Resolution::Priority)
    } else if top.iter().all(|c| c.value.same_as(&top[0].value)) {
        (resolved(top[0].value), Resolution::Identical)
    } else {
        match top.iter().map(|c| c.value.as_f64()).collect::<Option<Vec<f64>>>() {
            Some(mut values) => {
                // Sorted so the float sum does not depend on input order
                values.sort_by(f64::total_cmp);
                let mean = values.iter().sum::<f64>() / values.len() as f64;
                (Resolved::Number(mean), Resolution::Averaged)
            }
            None => {
                return Err(WbtsError::Conflict {
                    variable: variable.to_string(),
                    coordinate: coordinate.to_string(),
                })
            }
        }
    };

    let mut summaries: Vec<CandidateSummary> = present
        .iter()
        .map(|c| CandidateSummary {
            input: c.input,
            priority: c.priority,
            value: c.value.to_string(),
            flag: c.flag,
        })
        .collect();
    summaries.sort_by_key(|c| c.input);

    let record = ConflictRecord {
        variable: variable.to_string(),
        coordinate: coordinate.to_string(),
        candidates: summaries,
        resolution,
        value: render(&value),
    };
    Ok(CellOutcome {
        value: Some(value),
        flag: best_flag,
        record: Some(record),
    })
}
