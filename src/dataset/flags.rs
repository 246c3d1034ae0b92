//! Per-sample quality-control flags
//!
//! Flags are ordered by severity. Quality control only ever raises a flag;
//! lowering one goes through an explicit override on the variable.

use serde::{Deserialize, Serialize};
use std::fmt;

/// QC category attached to every sample of a variable
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum QcFlag {
    #[default]
    Good,
    Questionable,
    Bad,
    Missing,
}

impl QcFlag {
    /// All flags, least severe first
    pub const ALL: [QcFlag; 4] = [
        QcFlag::Good,
        QcFlag::Questionable,
        QcFlag::Bad,
        QcFlag::Missing,
    ];

    /// Space-separated meanings matching [`QcFlag::ALL`], for `flag_meanings`
    pub const MEANINGS: &'static str = "good questionable bad missing";

    /// Argo/OceanSITES flag code written to `<VAR>_QC` variables
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Good => 1,
            Self::Questionable => 3,
            Self::Bad => 4,
            Self::Missing => 9,
        }
    }

    /// Decode a flag written by [`QcFlag::code`]
    ///
    /// Codes 0 (no QC) and 2 (probably good) read as `Good`; codes 5 to 8
    /// (changed, interpolated, unused) read as `Questionable`.
    #[must_use]
    pub const fn from_code(code: u8) -> Self {
        match code {
            0..=2 => Self::Good,
            3 | 5..=8 => Self::Questionable,
            4 => Self::Bad,
            _ => Self::Missing,
        }
    }

    /// The more severe of `self` and `other`
    #[must_use]
    pub fn escalate(self, other: QcFlag) -> QcFlag {
        self.max(other)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Good => "good",
            Self::Questionable => "questionable",
            Self::Bad => "bad",
            Self::Missing => "missing",
        }
    }
}

impl fmt::Display for QcFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for QcFlag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "good" => Ok(Self::Good),
            "questionable" => Ok(Self::Questionable),
            "bad" => Ok(Self::Bad),
            "missing" => Ok(Self::Missing),
            other => Err(format!("Unknown QC flag '{other}'")),
        }
    }
}
