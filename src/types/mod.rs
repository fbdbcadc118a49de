#![forbid(unsafe_code)]

//! Value types shared by every planmentor component.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// Stable identifier of a normalized query.
///
/// Zero is reserved for "not trackable" and is never stored.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(pub u64);

/// Engine-side identifier of one prepared-statement handle.
///
/// A fingerprint may be prepared under several statement names; each one gets
/// its own handle. The engine owns the plan object behind it.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatementHandle(pub u64);

impl Fingerprint {
    /// The reserved "not trackable" fingerprint.
    pub const UNTRACKED: Fingerprint = Fingerprint(0);

    /// Returns true if the fingerprint may be stored.
    #[inline]
    pub fn is_trackable(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for StatementHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u64> for Fingerprint {
    fn from(value: u64) -> Self {
        Fingerprint(value)
    }
}

impl From<Fingerprint> for u64 {
    fn from(value: Fingerprint) -> Self {
        value.0
    }
}

/// Enforced plan-cache decision for a fingerprint.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanMode {
    /// Let the planner choose between generic and custom plans.
    #[default]
    Auto,
    /// Always reuse the generic plan.
    ForceGeneric,
    /// Always build a custom plan.
    ForceCustom,
}

impl PlanMode {
    /// Numeric code used by the administrative interface.
    pub fn code(self) -> i32 {
        match self {
            PlanMode::Auto => 0,
            PlanMode::ForceGeneric => 1,
            PlanMode::ForceCustom => 2,
        }
    }

    /// Returns true for either forced mode.
    pub fn is_forced(self) -> bool {
        !matches!(self, PlanMode::Auto)
    }
}

impl fmt::Display for PlanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlanMode::Auto => "auto",
            PlanMode::ForceGeneric => "force_generic",
            PlanMode::ForceCustom => "force_custom",
        };
        f.write_str(name)
    }
}

impl TryFrom<i32> for PlanMode {
    type Error = MentorError;

    fn try_from(code: i32) -> Result<Self> {
        match code {
            0 => Ok(PlanMode::Auto),
            1 => Ok(PlanMode::ForceGeneric),
            2 => Ok(PlanMode::ForceCustom),
            other => Err(MentorError::InvalidArgument(format!(
                "unknown plan mode code {other}"
            ))),
        }
    }
}

impl FromStr for PlanMode {
    type Err = MentorError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(PlanMode::Auto),
            "generic" | "force_generic" | "force-generic" => Ok(PlanMode::ForceGeneric),
            "custom" | "force_custom" | "force-custom" => Ok(PlanMode::ForceCustom),
            other => Err(MentorError::InvalidArgument(format!(
                "unknown plan mode '{other}'"
            ))),
        }
    }
}

/// One execution measurement reported by the engine.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecSample {
    /// Blocks touched by the execution (hits + reads + temp reads).
    pub io_cost: i64,
    /// Wall-clock execution time in milliseconds.
    pub exec_time_ms: f64,
}

impl ExecSample {
    /// Builds a sample.
    pub fn new(io_cost: i64, exec_time_ms: f64) -> Self {
        Self {
            io_cost,
            exec_time_ms,
        }
    }
}

/// Errors surfaced by planmentor.
#[derive(thiserror::Error, Debug)]
pub enum MentorError {
    /// Caller supplied input the operation cannot accept.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The shared store reached its configured capacity.
    #[error("shared statistics store is full ({capacity} entries)")]
    ResourceExhausted {
        /// Configured entry limit.
        capacity: usize,
    },
    /// Bookkeeping disagreed with itself, usually a teardown race.
    #[error("inconsistent state: {0}")]
    InconsistentState(String),
    /// Settings could not be loaded or failed validation.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, MentorError>;
