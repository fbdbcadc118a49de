#![forbid(unsafe_code)]

//! Operator surface.
//!
//! Thin wrappers over the [`PolicyEngine`](crate::policy::PolicyEngine) used
//! by tools and the `planmentor` CLI to inspect and steer plan-mode decisions.

mod entries;
mod modes;
mod options;

/// Read-only enumeration of shared entries.
pub use entries::{show_entries, EntryRow};

/// Mode changes, bulk reset, reconsideration and configuration reload.
///
/// Every call that can change an enforced mode bumps the generation clock so
/// sessions pick the change up before their next plan.
pub use modes::{reconsider, reload_config, reset, set_mode};

/// Options for [`set_mode`].
pub use options::SetModeOptions;

/// Totals returned by [`reconsider`].
pub use crate::policy::ReconsiderReport;
