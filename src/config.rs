//! Runtime-tunable settings.
//!
//! Every decision point takes a fresh [`SettingsHandle::snapshot`], so edits
//! published through [`SettingsHandle::update`] or a config reload apply to the
//! next event without restarting anything.
//!
//! Settings can be read from TOML:
//!
//! ```toml
//! drift_enabled = true
//! min_samples = 100
//! max_samples = 1000
//! min_samples_per_kind = 5
//! ring_capacity = 10
//!
//! [thresholds]
//! generic_cv_max = 0.3
//! custom_cv_min = 0.5
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Largest ring-buffer window an entry may keep.
pub const MAX_RING_CAPACITY: usize = 64;

/// Errors raised while loading or validating settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Settings file could not be read.
    #[error("failed to read config {path}: {source}")]
    Read {
        /// File that failed.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Settings file is not valid TOML for [`MentorSettings`].
    #[error("failed to parse config {path}: {source}")]
    Parse {
        /// File that failed.
        path: PathBuf,
        /// Underlying TOML error.
        source: toml::de::Error,
    },
    /// Inline TOML text could not be parsed.
    #[error("failed to parse config: {0}")]
    ParseInline(#[from] toml::de::Error),
    /// Settings could not be serialized.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    /// A value is outside its accepted range.
    #[error("invalid setting `{field}`: {reason}")]
    Invalid {
        /// Offending field.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },
}

/// Constants of the dominance and reconsideration heuristics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyThresholds {
    /// Base of the I/O scaling factor `base + avgPlanWeight` used by the drift
    /// corrector's dominance tests.
    pub plan_weight_base: f64,
    /// Coefficient of variation at or below which a workload counts as stable.
    pub generic_cv_max: f64,
    /// Coefficient of variation above which a workload counts as skewed.
    pub custom_cv_min: f64,
    /// Multiplier applied to the last planning time by the regression rules.
    pub plan_time_factor: f64,
    /// `avgIoCost / refIoCost` above which a forced generic plan regressed.
    pub io_regression_ratio: f64,
    /// `refIoCost / avgIoCost` below which a forced custom plan stopped paying off.
    pub io_recovery_ratio: f64,
}

impl Default for PolicyThresholds {
    fn default() -> Self {
        Self {
            plan_weight_base: 1.0,
            generic_cv_max: 0.3,
            custom_cv_min: 0.5,
            plan_time_factor: 2.0,
            io_regression_ratio: 1.0,
            io_recovery_ratio: 2.0,
        }
    }
}

/// All tunables consumed by the drift corrector and the policy engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MentorSettings {
    /// Enables the per-session drift corrector.
    pub drift_enabled: bool,
    /// Combined generic+custom samples required before a drift decision.
    pub min_samples: u32,
    /// Combined sample count at which drift accumulators restart.
    pub max_samples: u32,
    /// Generic and custom samples must each exceed this before a drift decision.
    pub min_samples_per_kind: u32,
    /// Custom plans the planner must have built before its costs are trusted.
    pub min_custom_plans: u32,
    /// Ring-buffer window for shared entries created or reset from now on.
    pub ring_capacity: usize,
    /// Upper bound on the number of shared entries.
    pub max_entries: usize,
    /// Keep entries whose refcount dropped to zero so learned history survives.
    pub retain_released_entries: bool,
    /// Heuristic constants.
    pub thresholds: PolicyThresholds,
}

impl Default for MentorSettings {
    fn default() -> Self {
        Self {
            drift_enabled: true,
            min_samples: 100,
            max_samples: 1000,
            min_samples_per_kind: 5,
            min_custom_plans: 5,
            ring_capacity: 10,
            max_entries: 65_536,
            retain_released_entries: true,
            thresholds: PolicyThresholds::default(),
        }
    }
}

impl MentorSettings {
    /// Parses settings from TOML text and validates them.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let settings: MentorSettings = toml::from_str(raw)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reads and validates a TOML settings file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let settings: MentorSettings =
            toml::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        settings.validate()?;
        debug!(path = %path.display(), "loaded planmentor settings");
        Ok(settings)
    }

    /// Renders the settings as pretty TOML.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Checks ranges and cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_samples > self.max_samples {
            return Err(ConfigError::Invalid {
                field: "min_samples",
                reason: format!(
                    "{} exceeds max_samples {}",
                    self.min_samples, self.max_samples
                ),
            });
        }
        if self.ring_capacity == 0 || self.ring_capacity > MAX_RING_CAPACITY {
            return Err(ConfigError::Invalid {
                field: "ring_capacity",
                reason: format!(
                    "{} is outside 1..={MAX_RING_CAPACITY}",
                    self.ring_capacity
                ),
            });
        }
        if self.max_entries == 0 {
            return Err(ConfigError::Invalid {
                field: "max_entries",
                reason: "must be positive".into(),
            });
        }
        let t = &self.thresholds;
        for (field, value) in [
            ("thresholds.plan_weight_base", t.plan_weight_base),
            ("thresholds.generic_cv_max", t.generic_cv_max),
            ("thresholds.custom_cv_min", t.custom_cv_min),
            ("thresholds.plan_time_factor", t.plan_time_factor),
            ("thresholds.io_regression_ratio", t.io_regression_ratio),
            ("thresholds.io_recovery_ratio", t.io_recovery_ratio),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("{value} must be a finite non-negative number"),
                });
            }
        }
        Ok(())
    }
}

/// Shared, hot-swappable view of [`MentorSettings`].
#[derive(Clone, Debug, Default)]
pub struct SettingsHandle {
    inner: Arc<RwLock<MentorSettings>>,
}

impl SettingsHandle {
    /// Wraps validated settings.
    pub fn new(settings: MentorSettings) -> Result<Self, ConfigError> {
        settings.validate()?;
        Ok(Self {
            inner: Arc::new(RwLock::new(settings)),
        })
    }

    /// Copies the current settings.
    pub fn snapshot(&self) -> MentorSettings {
        self.inner.read().clone()
    }

    /// Applies `edit` to a copy and publishes it if it still validates.
    pub fn update<F>(&self, edit: F) -> Result<(), ConfigError>
    where
        F: FnOnce(&mut MentorSettings),
    {
        let mut next = self.snapshot();
        edit(&mut next);
        next.validate()?;
        *self.inner.write() = next;
        Ok(())
    }

    /// Replaces the settings wholesale.
    pub fn replace(&self, settings: MentorSettings) -> Result<(), ConfigError> {
        settings.validate()?;
        *self.inner.write() = settings;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_constants() {
        let s = MentorSettings::default();
        assert!(s.drift_enabled);
        assert_eq!(s.min_samples, 100);
        assert_eq!(s.max_samples, 1000);
        assert_eq!(s.ring_capacity, 10);
        assert_eq!(s.thresholds.generic_cv_max, 0.3);
        assert_eq!(s.thresholds.custom_cv_min, 0.5);
        assert!(s.validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let s = MentorSettings::from_toml_str(
            "min_samples = 10\n[thresholds]\ngeneric_cv_max = 0.25\n",
        )
        .unwrap();
        assert_eq!(s.min_samples, 10);
        assert_eq!(s.max_samples, 1000);
        assert_eq!(s.thresholds.generic_cv_max, 0.25);
        assert_eq!(s.thresholds.custom_cv_min, 0.5);
    }

    #[test]
    fn rejects_inverted_sample_bounds() {
        let err = MentorSettings::from_toml_str("min_samples = 50\nmax_samples = 10\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "min_samples", .. }));
    }

    #[test]
    fn update_is_atomic_on_validation_failure() {
        let handle = SettingsHandle::default();
        let err = handle.update(|s| s.ring_capacity = 0).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "ring_capacity", .. }));
        assert_eq!(handle.snapshot().ring_capacity, 10);
        handle.update(|s| s.ring_capacity = 4).unwrap();
        assert_eq!(handle.snapshot().ring_capacity, 4);
    }

    #[test]
    fn load_reports_path_on_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mentor.toml");
        fs::write(&path, "min_samples = \"lots\"").unwrap();
        let err = MentorSettings::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("mentor.toml"));
    }

    #[test]
    fn toml_roundtrip_of_defaults() {
        let rendered = MentorSettings::default().to_toml_string().unwrap();
        let parsed = MentorSettings::from_toml_str(&rendered).unwrap();
        assert_eq!(parsed, MentorSettings::default());
    }
}
