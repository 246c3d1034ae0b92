//! QC report produced alongside every merge

use super::conflict::{ConflictRecord, Resolution};
use super::qc::RuleHit;
use crate::dataset::{Dataset, QcFlag};
use crate::errors::Result;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Sample counts per flag category
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlagCounts {
    pub good: usize,
    pub questionable: usize,
    pub bad: usize,
    pub missing: usize,
}

impl FlagCounts {
    pub fn add(&mut self, flag: QcFlag) {
        match flag {
            QcFlag::Good => self.good += 1,
            QcFlag::Questionable => self.questionable += 1,
            QcFlag::Bad => self.bad += 1,
            QcFlag::Missing => self.missing += 1,
        }
    }

    pub fn get(&self, flag: QcFlag) -> usize {
        match flag {
            QcFlag::Good => self.good,
            QcFlag::Questionable => self.questionable,
            QcFlag::Bad => self.bad,
            QcFlag::Missing => self.missing,
        }
    }

    pub fn total(&self) -> usize {
        self.good + self.questionable + self.bad + self.missing
    }

    fn absorb(&mut self, other: &FlagCounts) {
        self.good += other.good;
        self.questionable += other.questionable;
        self.bad += other.bad;
        self.missing += other.missing;
    }
}

/// Metadata key the inputs disagreed on
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttributeDisagreement {
    /// `global` or the variable name
    pub scope: String,
    pub key: String,
    /// Distinct values offered, sorted
    pub values: Vec<String>,
    pub chosen: String,
}

/// Summary of a merge and QC pass
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QcReport {
    pub inputs: usize,
    pub variables: BTreeMap<String, FlagCounts>,
    pub totals: FlagCounts,
    pub conflicts: Vec<ConflictRecord>,
    pub rule_hits: Vec<RuleHit>,
    pub attribute_disagreements: Vec<AttributeDisagreement>,
    pub removed_samples: usize,
}

impl QcReport {
    pub fn new(inputs: usize) -> Self {
        Self {
            inputs,
            ..Self::default()
        }
    }

    /// Recount flags from `dataset`, replacing earlier counts
    pub fn count_flags(&mut self, dataset: &Dataset) {
        self.variables.clear();
        self.totals = FlagCounts::default();
        for (name, var) in dataset.variables() {
            let mut counts = FlagCounts::default();
            for flag in var.flags() {
                counts.add(*flag);
            }
            self.totals.absorb(&counts);
            self.variables.insert(name.clone(), counts);
        }
    }

    /// Number of conflicts settled with `resolution`
    pub fn conflicts_resolved_by(&self, resolution: Resolution) -> usize {
        self.conflicts
            .iter()
            .filter(|c| c.resolution == resolution)
            .count()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }
}
